//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects sources, derived
//! values, and consumers. It owns the dependency graph, the tracking
//! context, and the batch state.
//!
//! # How It Works
//!
//! 1. When a derived node or consumer executes, the runtime pushes it onto
//!    the tracking context.
//!
//! 2. When a node is read during that execution, the runtime records an
//!    edge from the node to the executing one.
//!
//! 3. When a source's value changes, the runtime:
//!    a. Marks reachable derived nodes as outdated
//!    b. Queues reachable consumers
//!    c. Flushes the queue once the outermost batch ends
//!    d. Derived nodes are lazy - they recompute on next access
//!
//! # Threading
//!
//! A runtime is single-threaded (`!Send`). Several runtimes can coexist on
//! one thread; handles from one never observe the other.
//!
//! Handles hold a weak reference to the runtime, so closures stored in the
//! graph can capture handles without keeping the runtime alive. Once the
//! last [`Runtime`] is dropped every handle reports [`ReactiveError::Disposed`].

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use super::batch::BatchState;
use super::consumer::Cleanup;
use super::context::{ContextStack, TrackingScope};
use crate::config::{RuntimeConfig, RuntimeStats};
use crate::error::{panic_message, ReactiveError, Result};
use crate::graph::{Flags, Graph, NodeKey, NodeKind};

type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

/// Owner of one reactive graph.
///
/// Cloning a `Runtime` creates another owning handle to the same graph.
/// Closures stored in the graph should capture node handles rather than a
/// `Runtime`, otherwise the graph keeps itself alive.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.source(0);
///
/// let doubled = {
///     let count = count.clone();
///     rt.derived(move || count.get() * 2)
/// };
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub(crate) graph: RefCell<Graph>,
    pub(crate) context: ContextStack,
    pub(crate) batch: BatchState,
    pub(crate) config: RuntimeConfig,
    error_handler: RefCell<Option<ErrorHandler>>,
    me: Weak<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let inner = Rc::new_cyclic(|me| RuntimeInner {
            graph: RefCell::new(Graph::with_edge_capacity(config.edge_capacity)),
            context: ContextStack::default(),
            batch: BatchState::default(),
            config,
            error_handler: RefCell::new(None),
            me: me.clone(),
        });
        tracing::debug!(label = %inner.config.label, "runtime created");
        Self { inner }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Run `f` without registering any dependency for the current observer.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.untracked(f)
    }

    /// Install the sink for errors caught at consumer boundaries.
    ///
    /// Without a handler they are logged with `tracing::error!`.
    pub fn set_error_handler(&self, handler: impl Fn(&ReactiveError) + 'static) {
        *self.inner.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Remove a previously installed error handler.
    pub fn clear_error_handler(&self) {
        self.inner.error_handler.borrow_mut().take();
    }

    /// Current graph occupancy.
    pub fn stats(&self) -> RuntimeStats {
        self.inner.graph.borrow().stats()
    }

    pub(crate) fn inner(&self) -> &RuntimeInner {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Rc::downgrade(&self.inner)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("label", &self.inner.config.label)
            .field("stats", &self.stats())
            .field("batch_depth", &self.inner.batch.depth())
            .field("tracking_depth", &self.inner.context.depth())
            .finish()
    }
}

/// Resolve a handle's runtime, or report the node as gone.
pub(crate) fn upgrade(rt: &Weak<RuntimeInner>, key: NodeKey) -> Result<Rc<RuntimeInner>> {
    rt.upgrade().ok_or_else(|| ReactiveError::Disposed {
        node: format!("{key:?}"),
    })
}

/// View a stored value as the handle's type.
pub(crate) fn downcast<T: 'static>(value: &Rc<dyn Any>) -> &T {
    (**value)
        .downcast_ref::<T>()
        .expect("node value has the type of its handle")
}

impl RuntimeInner {
    pub(crate) fn weak(&self) -> Weak<RuntimeInner> {
        self.me.clone()
    }

    pub(crate) fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = TrackingScope::untracked(self);
        f()
    }

    /// Read a node's value, bringing derived nodes up to date first.
    ///
    /// With `tracked` set the read is attributed to the current observer.
    pub(crate) fn read(&self, key: NodeKey, tracked: bool) -> Result<Rc<dyn Any>> {
        let kind = self.graph.borrow().node(key)?.kind();

        let refreshed = if kind == NodeKind::Derived {
            self.start_batch();
            let refreshed = self.refresh(key);
            self.end_batch();
            refreshed
        } else {
            Ok(())
        };

        // A failed compute still links the edge so the reader retries when
        // the failing node's inputs change.
        let linkable = matches!(refreshed, Ok(()) | Err(ReactiveError::Compute { .. }));
        if tracked && linkable {
            self.track(key)?;
        }
        refreshed?;
        self.value_of(key)
    }

    /// Current stored value without refreshing or tracking.
    pub(crate) fn value_of(&self, key: NodeKey) -> Result<Rc<dyn Any>> {
        let graph = self.graph.borrow();
        graph
            .node(key)?
            .value
            .clone()
            .ok_or_else(|| ReactiveError::Compute {
                node: graph.describe(key),
                message: "value was never computed".to_string(),
            })
    }

    /// Attribute a read of `producer` to the current observer.
    pub(crate) fn track(&self, producer: NodeKey) -> Result<()> {
        let Some(observer) = self.context.current() else {
            return Ok(());
        };

        let mut graph = self.graph.borrow_mut();
        if observer == producer {
            return Err(ReactiveError::CycleDetected {
                node: graph.describe(producer),
            });
        }

        let version = graph.node(producer)?.version;
        if graph.node(observer).is_err() {
            // Disposed mid-run; it must not pick up new edges.
            return Ok(());
        }

        if let Some(id) = graph.get(producer).and_then(|node| node.scratch) {
            let edge = graph.edges.get_mut(id);
            if edge.dependent == observer && edge.producer == producer {
                edge.version = version;
                return Ok(());
            }
        }

        let id = graph.link(producer, observer, version);
        let previous = graph
            .get_mut(producer)
            .and_then(|node| node.scratch.replace(id));
        drop(graph);

        self.context.remember(producer, previous);
        tracing::trace!(?producer, ?observer, "edge linked");
        Ok(())
    }

    /// Store a new source value and push invalidation outward.
    ///
    /// Equality has already been checked by the caller.
    pub(crate) fn write(&self, key: NodeKey, value: Rc<dyn Any>) -> Result<()> {
        let previous = {
            let mut graph = self.graph.borrow_mut();
            let node = graph.node_mut(key)?;
            node.version += 1;
            let version = node.version;
            let previous = node.value.replace(value);

            let mut pending = self.batch.pending.borrow_mut();
            graph.invalidate(key, &mut |consumer| {
                pending.insert(consumer);
            });
            tracing::trace!(source = ?key, version, queued = pending.len(), "source written");
            previous
        };
        // The old value may own handles whose drop touches the graph.
        drop(previous);

        self.flush();
        Ok(())
    }

    /// Dispose a node. Idempotent.
    pub(crate) fn dispose(&self, key: NodeKey) {
        let (removed, cleanup, scheduled) = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.get_mut(key) else {
                return;
            };
            if node.is_disposed() {
                return;
            }
            node.flags.insert(Flags::DISPOSED);
            let running = node.flags.contains(Flags::RUNNING);
            let (cleanup, scheduled) = match node.consumer_slot() {
                Some(slot) => (slot.cleanup.take(), slot.scheduled.take()),
                None => (None, None),
            };

            graph.detach(key);
            // A running node is reclaimed when its execution finishes.
            let removed = if running { None } else { graph.remove(key) };
            (removed, cleanup, scheduled)
        };

        self.batch.pending.borrow_mut().shift_remove(&key);
        tracing::debug!(node = ?key, "node disposed");

        if let Some(hook) = scheduled {
            hook.cancel();
        }
        drop(removed);
        if let Some(cleanup) = cleanup {
            self.run_cleanup(key, cleanup);
        }
    }

    /// Reclaim a node that was disposed while it was running.
    pub(crate) fn finish_disposal(&self, key: NodeKey) {
        let (removed, cleanup) = {
            let mut graph = self.graph.borrow_mut();
            let cleanup = graph
                .get_mut(key)
                .and_then(|node| node.consumer_slot())
                .and_then(|slot| slot.cleanup.take());
            (graph.remove(key), cleanup)
        };
        drop(removed);
        if let Some(cleanup) = cleanup {
            self.run_cleanup(key, cleanup);
        }
    }

    /// Run a consumer cleanup outside any tracking frame.
    pub(crate) fn run_cleanup(&self, key: NodeKey, cleanup: Cleanup) {
        let outcome = self.untracked(|| panic::catch_unwind(AssertUnwindSafe(|| cleanup.run())));
        if let Err(payload) = outcome {
            let node = self.graph.borrow().describe(key);
            self.report(ReactiveError::Listener {
                node,
                message: panic_message(payload.as_ref()),
            });
        }
    }

    /// Hand an error caught at a node boundary to the error handler.
    pub(crate) fn report(&self, error: ReactiveError) {
        let handler = self.error_handler.borrow().clone();
        match handler {
            Some(handler) => handler(&error),
            None => tracing::error!(%error, label = %self.config.label, "reactive error"),
        }
    }
}
