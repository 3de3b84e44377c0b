//! Pull propagation.
//!
//! Reading an outdated derived node walks inward over its source edges
//! with an explicit frame stack:
//!
//! 1. Descend into every source that is itself an outdated derived node,
//!    so the top of a chain settles before the middle.
//! 2. Once all of a node's sources are settled, compare each edge's
//!    recorded version against the producer's live version.
//! 3. If nothing moved, clear `OUTDATED` without running anything.
//! 4. Otherwise execute. A result equal to the previous value keeps the
//!    node's version, so its dependents see nothing to do in step 2.
//!
//! Nodes on the frame stack carry `RUNNING`, which turns a read that loops
//! back into the stack into [`ReactiveError::CycleDetected`].

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use smallvec::SmallVec;

use super::context::TrackingScope;
use super::runtime::RuntimeInner;
use crate::error::{panic_message, ReactiveError, Result};
use crate::graph::{EdgeId, Flags, Graph, NodeKey, NodeKind, Payload};

struct Frame {
    node: NodeKey,
    /// Next source edge of `node` to inspect.
    cursor: Option<EdgeId>,
}

enum Step {
    Descend(NodeKey),
    Settled,
}

/// Advance `frame` to its next outdated derived source.
fn next_step(graph: &mut Graph, frame: &mut Frame) -> Result<Step> {
    if graph.node(frame.node).is_err() {
        // Disposed while an ancestor was executing; its edges are gone.
        return Ok(Step::Settled);
    }

    while let Some(id) = frame.cursor {
        let edge = graph.edges.get(id);
        let producer = edge.producer;
        frame.cursor = edge.next_source;

        let Some(node) = graph.get(producer) else {
            continue;
        };
        if node.kind() != NodeKind::Derived || node.is_disposed() {
            continue;
        }
        if node.flags.contains(Flags::RUNNING) {
            return Err(ReactiveError::CycleDetected {
                node: graph.describe(producer),
            });
        }
        if node.flags.contains(Flags::OUTDATED) {
            if let Some(flags) = graph.flags_mut(producer) {
                flags.insert(Flags::RUNNING);
            }
            return Ok(Step::Descend(producer));
        }
    }
    Ok(Step::Settled)
}

impl RuntimeInner {
    /// Bring a derived node up to date. Sources and fresh nodes return
    /// immediately.
    pub(crate) fn refresh(&self, key: NodeKey) -> Result<()> {
        {
            let graph = self.graph.borrow();
            let node = graph.node(key)?;
            if node.flags.contains(Flags::RUNNING) {
                return Err(ReactiveError::CycleDetected {
                    node: graph.describe(key),
                });
            }
            if node.kind() != NodeKind::Derived || !node.flags.contains(Flags::OUTDATED) {
                return Ok(());
            }
        }

        let changed = self.settle_sources(key)?;
        self.settle(key, changed)
    }

    /// Settle every outdated derived ancestor of `root`, then report whether
    /// any of `root`'s own sources changed since it last ran.
    pub(crate) fn settle_sources(&self, root: NodeKey) -> Result<bool> {
        let mut stack: SmallVec<[Frame; 8]> = SmallVec::new();
        {
            let mut graph = self.graph.borrow_mut();
            let cursor = graph.first_source(root);
            if let Some(flags) = graph.flags_mut(root) {
                flags.insert(Flags::RUNNING);
            }
            stack.push(Frame { node: root, cursor });
        }

        let outcome = loop {
            let step = {
                let mut graph = self.graph.borrow_mut();
                match stack.last_mut() {
                    Some(top) => next_step(&mut graph, top),
                    None => break Ok(false),
                }
            };

            match step {
                Err(err) => break Err(err),
                Ok(Step::Descend(producer)) => {
                    let cursor = self.graph.borrow().first_source(producer);
                    stack.push(Frame {
                        node: producer,
                        cursor,
                    });
                }
                Ok(Step::Settled) => {
                    let Some(frame) = stack.pop() else {
                        break Ok(false);
                    };
                    let (changed, disposed) = {
                        let mut graph = self.graph.borrow_mut();
                        let changed = graph.sources_changed(frame.node);
                        match graph.get_mut(frame.node) {
                            Some(node) => {
                                node.flags.remove(Flags::RUNNING);
                                (changed, node.is_disposed())
                            }
                            None => (changed, true),
                        }
                    };

                    if disposed {
                        self.finish_disposal(frame.node);
                        if stack.is_empty() {
                            break Ok(false);
                        }
                        continue;
                    }
                    if stack.is_empty() {
                        break Ok(changed);
                    }
                    if let Err(err) = self.settle(frame.node, changed) {
                        break Err(err);
                    }
                }
            }
        };

        if outcome.is_err() {
            let mut disposed = Vec::new();
            {
                let mut graph = self.graph.borrow_mut();
                for frame in &stack {
                    if let Some(node) = graph.get_mut(frame.node) {
                        node.flags.remove(Flags::RUNNING);
                        if node.is_disposed() {
                            disposed.push(frame.node);
                        }
                    }
                }
            }
            for key in disposed {
                self.finish_disposal(key);
            }
        }
        outcome
    }

    /// Execute `key` if its sources changed or it never ran; otherwise just
    /// mark it fresh.
    fn settle(&self, key: NodeKey, changed: bool) -> Result<()> {
        let must_run = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.get_mut(key) else {
                return Ok(());
            };
            let must_run = changed || node.value.is_none();
            if !must_run {
                node.flags.remove(Flags::OUTDATED | Flags::NOTIFIED);
            }
            must_run
        };

        if must_run {
            self.execute_derived(key)
        } else {
            tracing::trace!(node = ?key, "sources unchanged, recompute skipped");
            Ok(())
        }
    }

    /// Run a derived node's compute function under tracking.
    pub(crate) fn execute_derived(&self, key: NodeKey) -> Result<()> {
        let (compute, previous) = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.get_mut(key) else {
                return Ok(());
            };
            let Payload::Derived(compute) = &node.payload else {
                return Ok(());
            };
            let compute = Rc::clone(compute);
            // Cleared up front so that writes made during the run can set
            // them again and are not lost.
            node.flags.remove(Flags::OUTDATED | Flags::NOTIFIED);
            node.flags.insert(Flags::RUNNING);
            (compute, node.value.clone())
        };
        tracing::trace!(node = ?key, "recomputing derived");

        self.start_batch();
        let outcome = {
            let _scope = TrackingScope::enter(self, key);
            panic::catch_unwind(AssertUnwindSafe(|| compute.compute(previous.as_ref())))
        };

        let (result, replaced, disposed) = {
            let mut graph = self.graph.borrow_mut();
            let description = graph.describe(key);
            match graph.get_mut(key) {
                None => (Ok(()), None, false),
                Some(node) => {
                    node.flags.remove(Flags::RUNNING);
                    node.runs += 1;
                    let (result, replaced) = match outcome {
                        Ok((value, changed)) => {
                            if changed {
                                node.version += 1;
                            }
                            (Ok(()), node.value.replace(value))
                        }
                        Err(payload) => {
                            // Keep the old edges so input changes still reach
                            // this node. Without a cached value the next read
                            // runs the compute again.
                            node.flags.insert(Flags::OUTDATED);
                            let err = ReactiveError::Compute {
                                node: description,
                                message: panic_message(payload.as_ref()),
                            };
                            (Err(err), node.value.take())
                        }
                    };
                    let disposed = node.is_disposed();
                    if result.is_ok() {
                        graph.prune_unvisited(key);
                    }
                    (result, replaced, disposed)
                }
            }
        };
        drop(replaced);
        drop(previous);

        if disposed {
            self.finish_disposal(key);
        }
        self.end_batch();
        result
    }

    /// Run a consumer's body under tracking.
    ///
    /// Panics are caught here, reported, and never reach the caller.
    pub(crate) fn run_consumer(&self, key: NodeKey) {
        let (effect, cleanup) = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.get_mut(key) else {
                return;
            };
            if node.flags.intersects(Flags::DISPOSED | Flags::RUNNING) {
                return;
            }
            node.flags.remove(Flags::NOTIFIED);
            node.flags.insert(Flags::RUNNING);
            let Some(slot) = node.consumer_slot() else {
                node.flags.remove(Flags::RUNNING);
                return;
            };
            (Rc::clone(&slot.effect), slot.cleanup.take())
        };
        tracing::trace!(node = ?key, "running consumer");

        self.start_batch();
        if let Some(cleanup) = cleanup {
            self.run_cleanup(key, cleanup);
        }

        let outcome = {
            let _scope = TrackingScope::enter(self, key);
            panic::catch_unwind(AssertUnwindSafe(|| effect.run()))
        };

        let (error, disposed) = {
            let mut graph = self.graph.borrow_mut();
            let description = graph.describe(key);
            match graph.get_mut(key) {
                None => (None, false),
                Some(node) => {
                    node.flags.remove(Flags::RUNNING);
                    node.runs += 1;
                    let disposed = node.is_disposed();
                    let error = match outcome {
                        Ok(cleanup) => {
                            if let Some(slot) = node.consumer_slot() {
                                slot.cleanup = cleanup;
                            }
                            graph.prune_unvisited(key);
                            None
                        }
                        Err(payload) => Some(ReactiveError::Listener {
                            node: description,
                            message: panic_message(payload.as_ref()),
                        }),
                    };
                    (error, disposed)
                }
            }
        };

        if disposed {
            self.finish_disposal(key);
        }
        if let Some(error) = error {
            self.report(error);
        }
        self.end_batch();
    }
}
