//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a node is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! Each runtime owns a stack of observer frames. When a derived node or a
//! consumer executes, we push its key; when it completes, we pop it. An
//! untracked frame (`None`) hides the observers below it, which is how
//! `untracked` and cleanup callbacks avoid registering dependencies.
//!
//! Entering a frame also prepares the node's existing source edges: each is
//! tagged [`UNVISITED`] and its producer's scratch slot is pointed at it, so
//! a read can find the edge in O(1). The previous scratch values are saved
//! in the frame and restored on exit, which keeps nested executions correct.

use std::cell::RefCell;

use smallvec::SmallVec;

use super::runtime::RuntimeInner;
use crate::graph::{EdgeId, NodeKey, UNVISITED};

/// An executing node plus the scratch slots it overwrote.
#[derive(Debug)]
pub(crate) struct Observer {
    key: NodeKey,
    saved: SmallVec<[(NodeKey, Option<EdgeId>); 8]>,
}

/// Per-runtime stack of observer frames.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    frames: RefCell<Vec<Option<Observer>>>,
}

impl ContextStack {
    /// The node that reads should be attributed to, if any.
    pub(crate) fn current(&self) -> Option<NodeKey> {
        self.frames
            .borrow()
            .last()
            .and_then(|frame| frame.as_ref().map(|observer| observer.key))
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Record that the current observer replaced `producer`'s scratch slot.
    pub(crate) fn remember(&self, producer: NodeKey, previous: Option<EdgeId>) {
        if let Some(Some(observer)) = self.frames.borrow_mut().last_mut() {
            observer.saved.push((producer, previous));
        }
    }

    fn push(&self, frame: Option<Observer>) {
        self.frames.borrow_mut().push(frame);
    }

    fn pop(&self) -> Option<Option<Observer>> {
        self.frames.borrow_mut().pop()
    }
}

/// Guard that pops the context frame when dropped.
///
/// The guard must be dropped before the runtime re-borrows the graph for
/// the execution's bookkeeping.
pub(crate) struct TrackingScope<'a> {
    rt: &'a RuntimeInner,
    key: Option<NodeKey>,
}

impl<'a> TrackingScope<'a> {
    /// Enter a tracking frame for `key`.
    pub(crate) fn enter(rt: &'a RuntimeInner, key: NodeKey) -> Self {
        let mut saved = SmallVec::new();
        {
            let mut graph = rt.graph.borrow_mut();
            let mut cursor = graph.first_source(key);
            while let Some(id) = cursor {
                let edge = graph.edges.get_mut(id);
                edge.version = UNVISITED;
                cursor = edge.next_source;
                let producer = edge.producer;
                if let Some(node) = graph.get_mut(producer) {
                    saved.push((producer, node.scratch.replace(id)));
                }
            }
        }

        rt.context.push(Some(Observer { key, saved }));
        Self { rt, key: Some(key) }
    }

    /// Enter a frame in which reads register nothing.
    pub(crate) fn untracked(rt: &'a RuntimeInner) -> Self {
        rt.context.push(None);
        Self { rt, key: None }
    }
}

impl Drop for TrackingScope<'_> {
    fn drop(&mut self) {
        let popped = self.rt.context.pop();

        // Verify we're popping the right frame.
        // This helps catch bugs where scopes are mismatched.
        let observer = match popped {
            Some(Some(observer)) => observer,
            Some(None) => {
                debug_assert!(self.key.is_none(), "tracking scope mismatch");
                return;
            }
            None => return,
        };
        debug_assert_eq!(
            Some(observer.key),
            self.key,
            "tracking scope mismatch: expected {:?}, got {:?}",
            self.key,
            observer.key
        );

        let mut graph = self.rt.graph.borrow_mut();
        for (producer, previous) in observer.saved.into_iter().rev() {
            if let Some(node) = graph.get_mut(producer) {
                node.scratch = previous;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Runtime;

    #[test]
    fn scopes_nest_and_unwind() {
        let rt = Runtime::new();
        let inner = rt.inner();
        let a = rt.derived(|| 1);
        let b = rt.derived(|| 2);

        assert_eq!(inner.context.current(), None);
        {
            let _outer = super::TrackingScope::enter(inner, a.key());
            assert_eq!(inner.context.current(), Some(a.key()));
            {
                let _inner = super::TrackingScope::enter(inner, b.key());
                assert_eq!(inner.context.current(), Some(b.key()));
                {
                    let _hidden = super::TrackingScope::untracked(inner);
                    assert_eq!(inner.context.current(), None);
                }
                assert_eq!(inner.context.current(), Some(b.key()));
            }
            assert_eq!(inner.context.current(), Some(a.key()));
        }
        assert_eq!(inner.context.depth(), 0);
    }

    #[test]
    fn scratch_slots_are_restored_on_exit() {
        let rt = Runtime::new();
        let source = rt.source(1);
        let derived = {
            let source = source.clone();
            rt.derived(move || source.get() + 1)
        };
        assert_eq!(derived.get(), 2);

        let inner = rt.inner();
        {
            let _scope = super::TrackingScope::enter(inner, derived.key());
            let graph = inner.graph.borrow();
            assert!(graph.get(source.key()).unwrap().scratch.is_some());
        }
        let graph = inner.graph.borrow();
        assert!(graph.get(source.key()).unwrap().scratch.is_none());
    }
}
