//! Flush strategies.
//!
//! A consumer bound to a [`FlushStrategy`] is not run inside the flush that
//! notified it. The runtime posts one task to the strategy's host instead,
//! and a later notification cancels and replaces that task, so a burst of
//! changes collapses into a single run.
//!
//! The host is whatever drives the surrounding event loop. [`ManualHost`]
//! is a deterministic queue for tests and embedders with their own loop;
//! [`TokioHost`] posts onto a tokio `LocalSet`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

/// When a deferred task should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// After the current turn of the event loop.
    Tick,
    /// At the next frame boundary.
    Frame,
    /// After the given quiet period.
    Idle(Duration),
}

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Cancels a posted task. Dropping the hook leaves the task scheduled.
pub struct CancelHook(Option<Box<dyn FnOnce()>>);

impl CancelHook {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self(Some(Box::new(cancel)))
    }

    /// A hook for hosts that cannot cancel.
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.0.take() {
            cancel();
        }
    }
}

impl fmt::Debug for CancelHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHook")
            .field("armed", &self.0.is_some())
            .finish()
    }
}

/// An event loop that can run tasks later.
pub trait DeferredHost {
    fn post(&self, timing: Timing, task: Task) -> CancelHook;
}

/// A host bound to a timing.
#[derive(Clone)]
pub struct FlushStrategy {
    host: Rc<dyn DeferredHost>,
    timing: Timing,
}

impl FlushStrategy {
    pub fn new(host: impl DeferredHost + 'static, timing: Timing) -> Self {
        Self {
            host: Rc::new(host),
            timing,
        }
    }

    pub fn next_tick(host: impl DeferredHost + 'static) -> Self {
        Self::new(host, Timing::Tick)
    }

    pub fn next_frame(host: impl DeferredHost + 'static) -> Self {
        Self::new(host, Timing::Frame)
    }

    /// Run once `delay` has passed without a further notification.
    pub fn debounce(host: impl DeferredHost + 'static, delay: Duration) -> Self {
        Self::new(host, Timing::Idle(delay))
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub(crate) fn post(&self, task: Task) -> CancelHook {
        self.host.post(self.timing, task)
    }
}

impl fmt::Debug for FlushStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushStrategy")
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

struct Posted {
    timing: Timing,
    due: Duration,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    queue: BTreeMap<u64, Posted>,
}

/// A host that runs nothing until told to.
///
/// Clones share one queue. Time is virtual and only moves through
/// [`ManualHost::advance`].
///
/// ```rust
/// use ripple_core::{FlushStrategy, ManualHost, Runtime};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let rt = Runtime::new();
/// let host = ManualHost::new();
/// let value = rt.source(0);
/// let runs = Rc::new(Cell::new(0));
///
/// let _consumer = {
///     let (value, runs) = (value.clone(), runs.clone());
///     rt.consumer_with(FlushStrategy::next_tick(host.clone()), move || {
///         value.get();
///         runs.set(runs.get() + 1);
///     })
/// };
///
/// value.set(1);
/// value.set(2);
/// assert_eq!(runs.get(), 1);
///
/// host.run_ticks();
/// assert_eq!(runs.get(), 2);
/// ```
#[derive(Clone, Default)]
pub struct ManualHost {
    state: Rc<RefCell<ManualState>>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting.
    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Virtual time elapsed so far.
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Run tick tasks until none remain, including ones they post.
    pub fn run_ticks(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.take_next(|posted| posted.timing == Timing::Tick) {
            task();
            ran += 1;
        }
        ran
    }

    /// Run the frame tasks queued at the time of the call.
    pub fn run_frame(&self) -> usize {
        let ids: Vec<u64> = self
            .state
            .borrow()
            .queue
            .iter()
            .filter(|(_, posted)| posted.timing == Timing::Frame)
            .map(|(id, _)| *id)
            .collect();

        let mut ran = 0;
        for id in ids {
            let posted = self.state.borrow_mut().queue.remove(&id);
            if let Some(posted) = posted {
                (posted.task)();
                ran += 1;
            }
        }
        ran
    }

    /// Move virtual time forward and run idle tasks that came due, earliest
    /// first.
    pub fn advance(&self, by: Duration) -> usize {
        let now = {
            let mut state = self.state.borrow_mut();
            state.now += by;
            state.now
        };

        let mut ran = 0;
        loop {
            let next = {
                let state = self.state.borrow();
                state
                    .queue
                    .iter()
                    .filter(|(_, posted)| {
                        matches!(posted.timing, Timing::Idle(_)) && posted.due <= now
                    })
                    .min_by_key(|(id, posted)| (posted.due, **id))
                    .map(|(id, _)| *id)
            };
            let Some(id) = next else {
                break;
            };
            let posted = self.state.borrow_mut().queue.remove(&id);
            if let Some(posted) = posted {
                (posted.task)();
                ran += 1;
            }
        }
        ran
    }

    fn take_next(&self, select: impl Fn(&Posted) -> bool) -> Option<Task> {
        let mut state = self.state.borrow_mut();
        let id = state
            .queue
            .iter()
            .find(|(_, posted)| select(posted))
            .map(|(id, _)| *id)?;
        state.queue.remove(&id).map(|posted| posted.task)
    }
}

impl DeferredHost for ManualHost {
    fn post(&self, timing: Timing, task: Task) -> CancelHook {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            let due = match timing {
                Timing::Idle(delay) => state.now + delay,
                Timing::Tick | Timing::Frame => state.now,
            };
            state.queue.insert(id, Posted { timing, due, task });
            id
        };

        let state: Weak<RefCell<ManualState>> = Rc::downgrade(&self.state);
        CancelHook::new(move || {
            if let Some(state) = state.upgrade() {
                let removed = state.borrow_mut().queue.remove(&id);
                drop(removed);
            }
        })
    }
}

impl fmt::Debug for ManualHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualHost")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

/// A host backed by the tokio runtime.
///
/// Tasks are spawned with `tokio::task::spawn_local`, so posting must
/// happen inside a `LocalSet`. Frames are approximated by a fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct TokioHost {
    frame_interval: Duration,
}

impl TokioHost {
    pub fn new() -> Self {
        Self::with_frame_interval(Duration::from_millis(16))
    }

    pub fn with_frame_interval(frame_interval: Duration) -> Self {
        Self { frame_interval }
    }
}

impl Default for TokioHost {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredHost for TokioHost {
    fn post(&self, timing: Timing, task: Task) -> CancelHook {
        let frame_interval = self.frame_interval;
        let handle = tokio::task::spawn_local(async move {
            match timing {
                Timing::Tick => tokio::task::yield_now().await,
                Timing::Frame => tokio::time::sleep(frame_interval).await,
                Timing::Idle(delay) => tokio::time::sleep(delay).await,
            }
            task();
        });
        CancelHook::new(move || handle.abort())
    }
}
