//! Reactive Primitives
//!
//! This module implements the reactive layer on top of [`crate::graph`]:
//! sources, derived values, and consumers, plus the runtime that owns them.
//!
//! # Concepts
//!
//! ## Sources
//!
//! A [`Source`] holds mutable state. Reading it while a derived node or
//! consumer executes records a dependency; writing it marks everything
//! downstream.
//!
//! ## Derived values
//!
//! A [`Derived`] caches a computation over other nodes and re-evaluates
//! lazily, only when read and only if an input's version moved.
//!
//! ## Consumers
//!
//! A [`Consumer`] runs side effects eagerly whenever its inputs really
//! change. A [`FlushStrategy`] can defer and coalesce those runs onto a
//! host event loop.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered automatically. Each runtime keeps its own
//! stack of executing nodes, and a read consults the top of that stack.
//! Edges that were not read again during a run are dropped when it ends,
//! so conditional reads follow the branch actually taken.

mod batch;
mod consumer;
mod context;
mod derived;
mod pull;
mod runtime;
mod source;
mod strategy;
mod subscriber;

pub use consumer::{Cleanup, Consumer, IntoCleanup};
pub use derived::Derived;
pub use runtime::Runtime;
pub use source::Source;
pub use strategy::{CancelHook, DeferredHost, FlushStrategy, ManualHost, Task, Timing, TokioHost};
pub use subscriber::{Readable, Subscription};
