//! Consumers
//!
//! A consumer is a side-effecting leaf of the graph. It runs once when it
//! is created, which records its dependencies, and again whenever one of
//! those dependencies really changes.
//!
//! # Differences from Derived
//!
//! - Derived nodes return a value; consumers do not.
//! - Derived nodes are lazy (compute on access); consumers are eager (run
//!   from the flush that follows a change).
//! - A consumer's run is skipped when the sources it read ended up equal
//!   to what it saw last time, even though it was notified.
//!
//! # Cleanup
//!
//! A consumer body may return a [`Cleanup`]. It runs before the next run
//! and when the consumer is disposed, outside any tracking.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{Runtime, RuntimeInner};
use super::strategy::FlushStrategy;
use crate::graph::{Effect, Node, NodeKey};

/// Teardown returned from a consumer run.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    pub(crate) fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// Return types accepted from a consumer body.
pub trait IntoCleanup {
    fn into_cleanup(self) -> Option<Cleanup>;
}

impl IntoCleanup for () {
    fn into_cleanup(self) -> Option<Cleanup> {
        None
    }
}

impl IntoCleanup for Cleanup {
    fn into_cleanup(self) -> Option<Cleanup> {
        Some(self)
    }
}

impl IntoCleanup for Option<Cleanup> {
    fn into_cleanup(self) -> Option<Cleanup> {
        self
    }
}

struct EffectFn<F>(RefCell<F>);

impl<F, C> Effect for EffectFn<F>
where
    F: FnMut() -> C,
    C: IntoCleanup,
{
    fn run(&self) -> Option<Cleanup> {
        (self.0.borrow_mut())().into_cleanup()
    }
}

impl Runtime {
    /// Create a consumer and run it once.
    ///
    /// ```rust
    /// use ripple_core::{Cleanup, Runtime};
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    ///
    /// let rt = Runtime::new();
    /// let room = rt.source("lobby");
    /// let log = Rc::new(RefCell::new(Vec::new()));
    ///
    /// let consumer = {
    ///     let (room, log) = (room.clone(), log.clone());
    ///     rt.consumer(move || {
    ///         let joined = room.get();
    ///         log.borrow_mut().push(format!("join {joined}"));
    ///         let log = log.clone();
    ///         Cleanup::new(move || log.borrow_mut().push(format!("leave {joined}")))
    ///     })
    /// };
    ///
    /// room.set("kitchen");
    /// consumer.dispose();
    /// assert_eq!(
    ///     *log.borrow(),
    ///     ["join lobby", "leave lobby", "join kitchen", "leave kitchen"]
    /// );
    /// ```
    pub fn consumer<F, C>(&self, f: F) -> Consumer
    where
        F: FnMut() -> C + 'static,
        C: IntoCleanup,
    {
        self.spawn_consumer(None, f)
    }

    /// Create a consumer whose reruns are posted to `strategy` instead of
    /// running inside the flush. The first run is still immediate.
    pub fn consumer_with<F, C>(&self, strategy: FlushStrategy, f: F) -> Consumer
    where
        F: FnMut() -> C + 'static,
        C: IntoCleanup,
    {
        self.spawn_consumer(Some(strategy), f)
    }

    fn spawn_consumer<F, C>(&self, strategy: Option<FlushStrategy>, f: F) -> Consumer
    where
        F: FnMut() -> C + 'static,
        C: IntoCleanup,
    {
        let inner = self.inner();
        let effect = Rc::new(EffectFn(RefCell::new(f)));
        let key = inner.graph.borrow_mut().insert(Node::consumer(effect, strategy));
        tracing::trace!(node = ?key, "consumer created");

        inner.run_consumer(key);
        Consumer {
            rt: self.downgrade(),
            key,
        }
    }
}

/// Handle to a consumer node.
///
/// Dropping the handle does not stop the consumer; call
/// [`Consumer::dispose`], or use [`Runtime::subscribe`] for a guard that
/// disposes on drop.
#[derive(Clone)]
pub struct Consumer {
    rt: Weak<RuntimeInner>,
    key: NodeKey,
}

impl Consumer {
    /// Stop the consumer and run its pending cleanup. Idempotent, and safe
    /// to call from inside the consumer's own body.
    pub fn dispose(&self) {
        if let Some(rt) = self.rt.upgrade() {
            rt.dispose(self.key);
        }
    }

    pub fn is_disposed(&self) -> bool {
        match self.rt.upgrade() {
            Some(rt) => rt.graph.borrow().node(self.key).is_err(),
            None => true,
        }
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> u64 {
        self.rt
            .upgrade()
            .and_then(|rt| rt.graph.borrow().get(self.key).map(|node| node.runs))
            .unwrap_or(0)
    }

    /// Number of nodes read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.rt
            .upgrade()
            .and_then(|rt| rt.graph.borrow().get(self.key).map(|node| node.sources.len()))
            .unwrap_or(0)
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("key", &self.key)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
