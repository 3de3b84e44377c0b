//! Derived Values
//!
//! A derived node is a cached computation over other nodes.
//!
//! # How Derived Nodes Work
//!
//! 1. On first read the compute function runs under tracking and the
//!    result is cached.
//!
//! 2. A source write marks reachable derived nodes outdated without
//!    running anything.
//!
//! 3. The next read checks whether any producer's version moved. If none
//!    did, the cache is kept and nothing runs.
//!
//! 4. Otherwise the function re-runs. A result equal to the cached one
//!    keeps the node's version, which stops the change from reaching
//!    dependents that only read this node.
//!
//! Derived nodes that are never read stay outdated and cost nothing.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use super::runtime::{downcast, upgrade, Runtime, RuntimeInner};
use crate::error::Result;
use crate::graph::{Compute, Node, NodeKey};

struct DerivedFn<T, F, E> {
    f: F,
    eq: E,
    _value: PhantomData<fn() -> T>,
}

impl<T, F, E> Compute for DerivedFn<T, F, E>
where
    T: 'static,
    F: Fn() -> T,
    E: Fn(&T, &T) -> bool,
{
    fn compute(&self, previous: Option<&Rc<dyn Any>>) -> (Rc<dyn Any>, bool) {
        let next = (self.f)();
        if let Some(previous) = previous {
            if let Some(old) = (**previous).downcast_ref::<T>() {
                if (self.eq)(old, &next) {
                    return (Rc::clone(previous), false);
                }
            }
        }
        (Rc::new(next), true)
    }
}

impl Runtime {
    /// Create a derived node compared with `PartialEq`.
    ///
    /// Nothing runs until the first read.
    pub fn derived<T, F>(&self, f: F) -> Derived<T>
    where
        T: PartialEq + 'static,
        F: Fn() -> T + 'static,
    {
        self.derived_with_eq(f, T::eq)
    }

    /// Create a derived node with a custom equality function.
    pub fn derived_with_eq<T, F, E>(&self, f: F, eq: E) -> Derived<T>
    where
        T: 'static,
        F: Fn() -> T + 'static,
        E: Fn(&T, &T) -> bool + 'static,
    {
        let compute = DerivedFn {
            f,
            eq,
            _value: PhantomData,
        };
        let key = self
            .inner()
            .graph
            .borrow_mut()
            .insert(Node::derived(Rc::new(compute)));
        tracing::trace!(node = ?key, "derived created");

        Derived {
            rt: self.downgrade(),
            key,
            _value: PhantomData,
        }
    }
}

/// Handle to a derived node.
pub struct Derived<T> {
    rt: Weak<RuntimeInner>,
    key: NodeKey,
    _value: PhantomData<fn() -> T>,
}

impl<T: 'static> Derived<T> {
    /// Borrow the up-to-date value, tracking the read.
    ///
    /// A failed compute still records the dependency, so the reader is
    /// notified once the failure's inputs change.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let rt = upgrade(&self.rt, self.key)?;
        let value = rt.read(self.key, true)?;
        Ok(f(downcast::<T>(&value)))
    }

    /// Like [`Derived::try_with`], panicking on error.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Read the value, tracking the read.
    ///
    /// # Panics
    ///
    /// On any error [`Derived::try_get`] would return, so that a failure
    /// inside another compute function surfaces as that node's failure.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Bring the value up to date without recording a dependency.
    pub fn try_peek(&self) -> Result<T>
    where
        T: Clone,
    {
        let rt = upgrade(&self.rt, self.key)?;
        let value = rt.read(self.key, false)?;
        Ok(downcast::<T>(&value).clone())
    }

    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.try_peek().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Remove the node from the graph. Dependents keep their last value
    /// and get [`crate::ReactiveError::Disposed`] when they next read it.
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

    /// Number of times the compute function has run.
    pub fn compute_count(&self) -> u64 {
        self.rt
            .upgrade()
            .and_then(|rt| rt.graph.borrow().get(self.key).map(|node| node.runs))
            .unwrap_or(0)
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            rt: self.rt.clone(),
            key: self.key,
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived").field("key", &self.key).finish()
    }
}
