//! Dependency Graph
//!
//! This module holds the storage side of the engine: nodes, edges, and the
//! push traversal that marks nodes when a source changes.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes are sources, derived values, or consumers
//! - Edges represent dependencies: if B read A during its last run, there is
//!   an edge from A to B carrying the version of A that B observed
//!
//! # Design Decisions
//!
//! 1. Nodes live in a generational arena (`slotmap`), so stale handles to
//!    disposed nodes resolve to nothing instead of aliasing a reused slot.
//!
//! 2. Edges are intrusive: each one is simultaneously a member of the
//!    producer's target list and the dependent's source list, which makes
//!    insert and unlink O(1) in both directions.
//!
//! 3. Edges are addressed by index into a slab with a free list. Pruned edges
//!    are recycled before the slab grows, so steady-state churn does not
//!    allocate.
//!
//! Nothing here runs user code. Executing compute functions and consumers is
//! the runtime's job, which never holds a graph borrow while doing so.

mod edge;
mod invalidate;
mod node;
mod store;

pub use edge::EdgeId;
pub use node::{Flags, NodeKey, NodeKind};

pub(crate) use edge::UNVISITED;
pub(crate) use node::{Compute, Effect, Node, Payload};
pub(crate) use store::Graph;
