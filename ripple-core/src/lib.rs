//! Ripple Core
//!
//! A single-threaded reactive dependency graph. It implements:
//!
//! - Writable sources, lazily cached derived values, and eager consumers
//! - Automatic dependency discovery with per-run edge pruning
//! - Push invalidation followed by version-checked pull, so nothing
//!   recomputes unless an input really changed
//! - Batching, deferred flush strategies, and subscriptions
//!
//! # Architecture
//!
//! - `graph`: node arena, pooled edge lists, and push invalidation
//! - `reactive`: runtime, handles, tracking context, and propagation
//!
//! # Example
//!
//! ```rust
//! use ripple_core::Runtime;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let rt = Runtime::new();
//! let count = rt.source(0);
//! let doubled = {
//!     let count = count.clone();
//!     rt.derived(move || count.get() * 2)
//! };
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _consumer = {
//!     let (count, doubled, log) = (count.clone(), doubled.clone(), log.clone());
//!     rt.consumer(move || {
//!         log.borrow_mut().push(format!("count: {}, doubled: {}", count.get(), doubled.get()));
//!     })
//! };
//!
//! count.set(5);
//! assert_eq!(log.borrow().last().unwrap(), "count: 5, doubled: 10");
//! ```

pub mod graph;
pub mod reactive;

mod config;
mod error;

pub use config::{RuntimeConfig, RuntimeStats};
pub use error::{ReactiveError, Result};
pub use graph::{NodeKey, NodeKind};
pub use reactive::{
    CancelHook, Cleanup, Consumer, DeferredHost, Derived, FlushStrategy, IntoCleanup, ManualHost,
    Readable, Runtime, Source, Subscription, Task, Timing, TokioHost,
};
