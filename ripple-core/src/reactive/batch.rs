//! Batching and the flush loop.
//!
//! Writes only mark and queue. Queued consumers run once the outermost
//! batch closes, and every write or execution opens an implicit batch, so
//! a burst of writes inside [`Runtime::batch`] reaches each consumer at
//! most once.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};

use indexmap::IndexSet;

use super::runtime::{Runtime, RuntimeInner};
use crate::error::{panic_message, ReactiveError};
use crate::graph::{Flags, NodeKey};

/// Batch nesting and the queue of consumers waiting for a flush.
#[derive(Default)]
pub(crate) struct BatchState {
    depth: Cell<usize>,
    flushing: Cell<bool>,
    /// Insertion-ordered and duplicate-free.
    pub(crate) pending: RefCell<IndexSet<NodeKey>>,
}

impl BatchState {
    pub(crate) fn depth(&self) -> usize {
        self.depth.get()
    }
}

/// Clears the flushing flag however the flush loop exits.
struct FlushingGuard<'a>(&'a Cell<bool>);

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl RuntimeInner {
    pub(crate) fn start_batch(&self) {
        self.batch.depth.set(self.batch.depth.get() + 1);
    }

    pub(crate) fn end_batch(&self) {
        let depth = self.batch.depth.get().saturating_sub(1);
        self.batch.depth.set(depth);
        if depth == 0 {
            self.flush();
        }
    }

    /// Drain the consumer queue until it stays empty.
    ///
    /// Consumers that write sources queue further rounds. The loop gives up
    /// after `max_flush_iterations` rounds and reports
    /// [`ReactiveError::FlushLimit`].
    pub(crate) fn flush(&self) {
        if self.batch.depth.get() > 0 || self.batch.flushing.get() {
            return;
        }
        self.batch.flushing.set(true);
        let _flushing = FlushingGuard(&self.batch.flushing);

        let limit = self.config.max_flush_iterations;
        let mut rounds = 0usize;
        loop {
            let queued = std::mem::take(&mut *self.batch.pending.borrow_mut());
            if queued.is_empty() {
                break;
            }
            rounds += 1;

            if rounds > limit {
                {
                    let mut graph = self.graph.borrow_mut();
                    for key in &queued {
                        if let Some(flags) = graph.flags_mut(*key) {
                            flags.remove(Flags::NOTIFIED);
                        }
                        // Otherwise the marks left upstream would keep every
                        // later write from reaching the dropped consumer.
                        graph.release_notified(*key);
                    }
                }
                tracing::warn!(
                    rounds = limit,
                    dropped = queued.len(),
                    label = %self.config.label,
                    "flush did not settle, dropping queued consumers"
                );
                self.report(ReactiveError::FlushLimit { iterations: limit });
                break;
            }

            tracing::debug!(round = rounds, consumers = queued.len(), "flushing");
            for key in queued {
                self.dispatch(key);
            }
        }
    }

    /// Run a queued consumer now, or hand it to its flush strategy.
    fn dispatch(&self, key: NodeKey) {
        let deferred = {
            let mut graph = self.graph.borrow_mut();
            match graph.get_mut(key) {
                Some(node) if !node.is_disposed() => node
                    .consumer_slot()
                    .is_some_and(|slot| slot.strategy.is_some()),
                _ => return,
            }
        };

        if deferred {
            self.schedule_deferred(key);
        } else {
            self.run_if_stale(key);
        }
    }

    /// Run a notified consumer only if one of its sources really changed.
    fn run_if_stale(&self, key: NodeKey) {
        // An ancestor that fails to settle counts as a change, so the
        // consumer runs and sees the error itself.
        let stale = self.settle_sources(key).unwrap_or(true);
        if stale {
            self.run_consumer(key);
        } else if let Some(flags) = self.graph.borrow_mut().flags_mut(key) {
            flags.remove(Flags::NOTIFIED);
        }
    }

    /// Post a consumer to its strategy, replacing any earlier posting.
    fn schedule_deferred(&self, key: NodeKey) {
        let (strategy, previous) = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.get_mut(key) else {
                return;
            };
            // Notifications arriving before the task fires queue again and
            // push the posting back, which needs the path from every source
            // to stay unmarked.
            node.flags.remove(Flags::NOTIFIED);
            let parts = match node.consumer_slot() {
                Some(slot) => (slot.strategy.clone(), slot.scheduled.take()),
                None => return,
            };
            graph.release_notified(key);
            parts
        };
        let Some(strategy) = strategy else {
            return;
        };
        if let Some(hook) = previous {
            hook.cancel();
        }

        let me = self.weak();
        let posted = panic::catch_unwind(AssertUnwindSafe(|| {
            strategy.post(Box::new(move || {
                if let Some(rt) = me.upgrade() {
                    rt.run_deferred(key);
                }
            }))
        }));
        let hook = match posted {
            Ok(hook) => hook,
            Err(payload) => {
                let node = self.graph.borrow().describe(key);
                self.report(ReactiveError::Listener {
                    node,
                    message: panic_message(payload.as_ref()),
                });
                return;
            }
        };
        tracing::trace!(node = ?key, timing = ?strategy.timing(), "consumer deferred");

        let rejected = {
            let mut graph = self.graph.borrow_mut();
            match graph.get_mut(key).and_then(|node| node.consumer_slot()) {
                Some(slot) => {
                    slot.scheduled = Some(hook);
                    None
                }
                None => Some(hook),
            }
        };
        if let Some(hook) = rejected {
            hook.cancel();
        }
    }

    /// Entry point for a deferred task firing.
    fn run_deferred(&self, key: NodeKey) {
        {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.get_mut(key) else {
                return;
            };
            if node.is_disposed() {
                return;
            }
            if let Some(slot) = node.consumer_slot() {
                slot.scheduled = None;
            }
        }

        self.start_batch();
        self.run_if_stale(key);
        self.end_batch();
    }
}

impl Runtime {
    /// Run `f` with propagation deferred until it returns.
    ///
    /// Batches nest; only the outermost one flushes. Writes made inside
    /// `f` are kept and flushed even if `f` panics, after which the panic
    /// resumes.
    ///
    /// ```rust
    /// use ripple_core::Runtime;
    /// use std::cell::Cell;
    /// use std::rc::Rc;
    ///
    /// let rt = Runtime::new();
    /// let first = rt.source("Ada");
    /// let last = rt.source("Lovelace");
    /// let runs = Rc::new(Cell::new(0));
    ///
    /// let _greeting = {
    ///     let (first, last, runs) = (first.clone(), last.clone(), runs.clone());
    ///     rt.consumer(move || {
    ///         let _ = format!("{} {}", first.get(), last.get());
    ///         runs.set(runs.get() + 1);
    ///     })
    /// };
    ///
    /// rt.batch(|| {
    ///     first.set("Grace");
    ///     last.set("Hopper");
    /// });
    /// assert_eq!(runs.get(), 2);
    /// ```
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let inner = self.inner();
        inner.start_batch();
        let outcome = panic::catch_unwind(AssertUnwindSafe(f));
        inner.end_batch();
        match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Fallible form of [`Runtime::batch`]. Writes made before an error
    /// are kept and flushed.
    pub fn try_batch<R, E>(&self, f: impl FnOnce() -> Result<R, E>) -> Result<R, E> {
        self.batch(f)
    }

    /// Whether a batch is currently open.
    pub fn is_batching(&self) -> bool {
        self.inner().batch.depth() > 0
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        CancelHook, DeferredHost, FlushStrategy, ReactiveError, Runtime, RuntimeConfig, Task,
        Timing,
    };
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn collect_errors(rt: &Runtime) -> Rc<RefCell<Vec<ReactiveError>>> {
        let errors = Rc::new(RefCell::new(Vec::new()));
        {
            let errors = errors.clone();
            rt.set_error_handler(move |err| errors.borrow_mut().push(err.clone()));
        }
        errors
    }

    #[test]
    fn nested_batches_flush_once() {
        let rt = Runtime::new();
        let a = rt.source(0);
        let b = rt.source(0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let _consumer = {
            let (a, b, seen) = (a.clone(), b.clone(), seen.clone());
            rt.consumer(move || seen.borrow_mut().push(a.get() + b.get()))
        };

        rt.batch(|| {
            a.set(1);
            rt.batch(|| b.set(2));
            assert!(rt.is_batching());
            assert_eq!(seen.borrow().len(), 1);
        });
        assert!(!rt.is_batching());
        assert_eq!(*seen.borrow(), vec![0, 3]);
    }

    #[test]
    fn try_batch_keeps_writes_on_error() {
        let rt = Runtime::new();
        let value = rt.source(1);
        let runs = Rc::new(Cell::new(0));
        let _consumer = {
            let (value, runs) = (value.clone(), runs.clone());
            rt.consumer(move || {
                value.get();
                runs.set(runs.get() + 1);
            })
        };

        let result: Result<(), &str> = rt.try_batch(|| {
            value.set(2);
            Err("validation failed")
        });

        assert_eq!(result, Err("validation failed"));
        assert_eq!(value.get(), 2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn runaway_consumer_hits_flush_limit() {
        let rt = Runtime::with_config(RuntimeConfig {
            max_flush_iterations: 10,
            ..RuntimeConfig::default()
        });
        let errors = collect_errors(&rt);

        let ticks = rt.source(0u32);
        let _consumer = {
            let ticks = ticks.clone();
            rt.consumer(move || {
                let n = ticks.get();
                if n >= 100 {
                    ticks.set(n + 1);
                }
            })
        };
        ticks.set(100);

        assert_eq!(
            errors.borrow().as_slice(),
            &[ReactiveError::FlushLimit { iterations: 10 }]
        );
        // The runtime keeps working after giving up.
        let other = rt.source(0);
        other.set(1);
        assert_eq!(other.get(), 1);
    }

    #[test]
    fn consumer_behind_derived_recovers_after_flush_limit() {
        let rt = Runtime::with_config(RuntimeConfig {
            max_flush_iterations: 5,
            ..RuntimeConfig::default()
        });
        let errors = collect_errors(&rt);

        let ticks = rt.source(0u32);
        let view = {
            let ticks = ticks.clone();
            rt.derived(move || ticks.get())
        };
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _consumer = {
            let (ticks, view, seen) = (ticks.clone(), view.clone(), seen.clone());
            rt.consumer(move || {
                let n = view.get();
                seen.borrow_mut().push(n);
                if n >= 100 {
                    ticks.set(n + 1);
                }
            })
        };

        ticks.set(100);
        assert_eq!(
            errors.borrow().as_slice(),
            &[ReactiveError::FlushLimit { iterations: 5 }]
        );
        let runs_at_limit = seen.borrow().len();

        ticks.set(0);
        assert_eq!(seen.borrow().len(), runs_at_limit + 1);
        assert_eq!(seen.borrow().last(), Some(&0));
        assert_eq!(errors.borrow().len(), 1);
    }

    struct UnavailableHost;

    impl DeferredHost for UnavailableHost {
        fn post(&self, _: Timing, _: Task) -> CancelHook {
            panic!("host unavailable");
        }
    }

    #[test]
    fn failing_host_is_reported_and_flushing_continues() {
        let rt = Runtime::new();
        let errors = collect_errors(&rt);

        let a = rt.source(0);
        let _deferred = {
            let a = a.clone();
            rt.consumer_with(FlushStrategy::next_tick(UnavailableHost), move || {
                a.get();
            })
        };

        a.set(1);
        assert!(matches!(
            errors.borrow().as_slice(),
            [ReactiveError::Listener { message, .. }] if message == "host unavailable"
        ));

        let b = rt.source(0);
        let runs = Rc::new(Cell::new(0));
        let _plain = {
            let (b, runs) = (b.clone(), runs.clone());
            rt.consumer(move || {
                b.get();
                runs.set(runs.get() + 1);
            })
        };
        b.set(1);
        assert_eq!(runs.get(), 2);

        // The failed posting left the deferred consumer reachable.
        a.set(2);
        assert_eq!(errors.borrow().len(), 2);
    }
}
