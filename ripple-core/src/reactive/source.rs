//! Sources
//!
//! A source is a writable root of the graph. Writing a value that is
//! equal to the current one does nothing; any other write bumps the
//! source's version and pushes invalidation outward.

use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{downcast, upgrade, Runtime, RuntimeInner};
use crate::error::Result;
use crate::graph::{Node, NodeKey};

type EqFn<T> = Rc<dyn Fn(&T, &T) -> bool>;

impl Runtime {
    /// Create a source compared with `PartialEq`.
    pub fn source<T>(&self, value: T) -> Source<T>
    where
        T: PartialEq + 'static,
    {
        self.source_with_eq(value, T::eq)
    }

    /// Create a source with a custom equality function.
    ///
    /// `|_, _| false` makes every write propagate.
    pub fn source_with_eq<T: 'static>(
        &self,
        value: T,
        eq: impl Fn(&T, &T) -> bool + 'static,
    ) -> Source<T> {
        let key = self
            .inner()
            .graph
            .borrow_mut()
            .insert(Node::source(Rc::new(value)));
        tracing::trace!(node = ?key, "source created");

        Source {
            rt: self.downgrade(),
            key,
            eq: Rc::new(eq),
        }
    }
}

/// Handle to a source node.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.source(0);
///
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// assert_eq!(count.version(), Some(2));
/// ```
pub struct Source<T> {
    rt: Weak<RuntimeInner>,
    key: NodeKey,
    eq: EqFn<T>,
}

impl<T: 'static> Source<T> {
    /// Borrow the current value, tracking the read.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let rt = upgrade(&self.rt, self.key)?;
        let value = rt.read(self.key, true)?;
        Ok(f(downcast::<T>(&value)))
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Read the current value, tracking the read.
    ///
    /// # Panics
    ///
    /// If the source has been disposed.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Read without recording a dependency.
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

    /// Store `value`. Returns whether it differed from the current value.
    ///
    /// Consumers affected by the write run before this returns, unless a
    /// batch is open.
    pub fn try_set(&self, value: T) -> Result<bool> {
        let rt = upgrade(&self.rt, self.key)?;
        let current = rt.value_of(self.key)?;
        if (self.eq)(downcast::<T>(&current), &value) {
            return Ok(false);
        }
        drop(current);

        rt.write(self.key, Rc::new(value))?;
        Ok(true)
    }

    /// Like [`Source::try_set`], panicking if the source was disposed.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            panic!("{err}");
        }
    }

    /// Replace the value with `f(current)`. The read is not tracked.
    pub fn try_update(&self, f: impl FnOnce(&T) -> T) -> Result<bool> {
        let rt = upgrade(&self.rt, self.key)?;
        let current = rt.value_of(self.key)?;
        let next = f(downcast::<T>(&current));
        drop(current);
        self.try_set(next)
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        if let Err(err) = self.try_update(f) {
            panic!("{err}");
        }
    }

    /// Number of writes that changed the value, or `None` once disposed.
    pub fn version(&self) -> Option<u64> {
        let rt = self.rt.upgrade()?;
        let graph = rt.graph.borrow();
        graph.node(self.key).ok().map(|node| node.version)
    }

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

    /// Number of nodes that read this source during their last run.
    pub fn dependent_count(&self) -> usize {
        self.rt
            .upgrade()
            .and_then(|rt| rt.graph.borrow().get(self.key).map(|node| node.targets.len()))
            .unwrap_or(0)
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self {
            rt: self.rt.clone(),
            key: self.key,
            eq: Rc::clone(&self.eq),
        }
    }
}

impl<T> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReactiveError;

    #[test]
    fn equal_writes_are_ignored() {
        let rt = Runtime::new();
        let name = rt.source(String::from("ada"));

        assert!(!name.try_set("ada".to_string()).unwrap());
        assert_eq!(name.version(), Some(0));
        assert!(name.try_set("grace".to_string()).unwrap());
        assert_eq!(name.version(), Some(1));
    }

    #[test]
    fn custom_equality_can_force_writes() {
        let rt = Runtime::new();
        let tick = rt.source_with_eq((), |_, _| false);
        tick.set(());
        tick.set(());
        assert_eq!(tick.version(), Some(2));
    }

    #[test]
    fn disposed_source_rejects_access() {
        let rt = Runtime::new();
        let count = rt.source(1);
        count.dispose();

        assert!(matches!(count.try_get(), Err(ReactiveError::Disposed { .. })));
        assert!(matches!(count.try_set(2), Err(ReactiveError::Disposed { .. })));
        assert_eq!(count.version(), None);
        // Idempotent.
        count.dispose();
    }

    #[test]
    #[should_panic(expected = "access to disposed node")]
    fn set_on_disposed_source_panics() {
        let rt = Runtime::new();
        let count = rt.source(1);
        count.dispose();
        count.set(2);
    }
}
