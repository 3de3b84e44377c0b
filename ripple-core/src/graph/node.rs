//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use slotmap::new_key_type;

use super::edge::EdgeList;
use super::EdgeId;
use crate::reactive::{CancelHook, Cleanup, FlushStrategy};

new_key_type! {
    /// Generational key of a node in the dependency graph.
    ///
    /// A key whose node has been disposed and reclaimed never resolves again,
    /// even if the arena slot is reused.
    pub struct NodeKey;
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A source node. These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived node. These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// A consumer node. These are leaves of the graph.
    /// They have dependencies but no dependents (they produce side effects, not values).
    Consumer,
}

/// Per-node state bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    /// The cached value may not reflect current inputs.
    pub const OUTDATED: Self = Self(1 << 0);
    /// The node is executing, or is on the pull stack being checked.
    pub const RUNNING: Self = Self(1 << 1);
    /// The node was already reached by the current push pass.
    pub const NOTIFIED: Self = Self(1 << 2);
    /// The node has been disposed.
    pub const DISPOSED: Self = Self(1 << 3);

    const NAMES: [(Self, &'static str); 4] = [
        (Self::OUTDATED, "OUTDATED"),
        (Self::RUNNING, "RUNNING"),
        (Self::NOTIFIED, "NOTIFIED"),
        (Self::DISPOSED, "DISPOSED"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// Type-erased compute function of a derived node.
pub(crate) trait Compute {
    /// Run the computation and compare against `previous`.
    ///
    /// Returns the value to cache and whether it differs from `previous`
    /// under the node's equality function. When it does not differ the
    /// returned value is `previous` itself.
    fn compute(&self, previous: Option<&Rc<dyn Any>>) -> (Rc<dyn Any>, bool);
}

/// Type-erased body of a consumer node.
pub(crate) trait Effect {
    fn run(&self) -> Option<Cleanup>;
}

/// Consumer-only state.
pub(crate) struct ConsumerSlot {
    pub(crate) effect: Rc<dyn Effect>,
    pub(crate) cleanup: Option<Cleanup>,
    pub(crate) strategy: Option<FlushStrategy>,
    /// Deferred run posted to the strategy's host and not yet fired.
    pub(crate) scheduled: Option<CancelHook>,
}

pub(crate) enum Payload {
    Source,
    Derived(Rc<dyn Compute>),
    Consumer(ConsumerSlot),
}

/// A node in the dependency graph.
pub(crate) struct Node {
    pub(crate) payload: Payload,
    pub(crate) flags: Flags,

    /// Bumped whenever the node's value changes under its equality function.
    pub(crate) version: u64,

    /// Current value for sources, cached value for derived nodes.
    pub(crate) value: Option<Rc<dyn Any>>,

    /// Incoming edges (producers this node read during its last run).
    pub(crate) sources: EdgeList,

    /// Outgoing edges (dependents that read this node).
    pub(crate) targets: EdgeList,

    /// Edge to the dependent currently executing, used for O(1) lookup
    /// while tracking reads.
    pub(crate) scratch: Option<EdgeId>,

    /// Number of completed executions.
    pub(crate) runs: u64,
}

impl Node {
    pub(crate) fn source(value: Rc<dyn Any>) -> Self {
        Self::new(Payload::Source, Flags::empty(), Some(value))
    }

    pub(crate) fn derived(compute: Rc<dyn Compute>) -> Self {
        // Start outdated to ensure first computation
        Self::new(Payload::Derived(compute), Flags::OUTDATED, None)
    }

    pub(crate) fn consumer(effect: Rc<dyn Effect>, strategy: Option<FlushStrategy>) -> Self {
        let slot = ConsumerSlot {
            effect,
            cleanup: None,
            strategy,
            scheduled: None,
        };
        Self::new(Payload::Consumer(slot), Flags::empty(), None)
    }

    fn new(payload: Payload, flags: Flags, value: Option<Rc<dyn Any>>) -> Self {
        Self {
            payload,
            flags,
            version: 0,
            value,
            sources: EdgeList::default(),
            targets: EdgeList::default(),
            scratch: None,
            runs: 0,
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self.payload {
            Payload::Source => NodeKind::Source,
            Payload::Derived(_) => NodeKind::Derived,
            Payload::Consumer(_) => NodeKind::Consumer,
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.flags.contains(Flags::DISPOSED)
    }

    pub(crate) fn consumer_slot(&mut self) -> Option<&mut ConsumerSlot> {
        match &mut self.payload {
            Payload::Consumer(slot) => Some(slot),
            _ => None,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind())
            .field("flags", &self.flags)
            .field("version", &self.version)
            .field("sources", &self.sources.len())
            .field("targets", &self.targets.len())
            .finish()
    }
}
