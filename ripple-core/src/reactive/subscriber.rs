//! Subscriptions and selectors.
//!
//! These are conveniences over the three node kinds. A selector is a
//! derived node projecting part of another node's value. A subscription
//! is a consumer that hands each new value to a callback and disposes
//! itself when the guard is dropped.

use std::fmt;

use super::consumer::Consumer;
use super::derived::Derived;
use super::runtime::Runtime;
use super::source::Source;
use crate::error::Result;
use crate::graph::NodeKey;

/// A node whose value can be read as `T`.
pub trait Readable<T: 'static>: Clone + 'static {
    /// Borrow the value, tracking the read.
    fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R>;

    fn node_key(&self) -> NodeKey;
}

impl<T: 'static> Readable<T> for Source<T> {
    fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.try_with(f)
    }

    fn node_key(&self) -> NodeKey {
        self.key()
    }
}

impl<T: 'static> Readable<T> for Derived<T> {
    fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.try_with(f)
    }

    fn node_key(&self) -> NodeKey {
        self.key()
    }
}

impl Runtime {
    /// Derive a projection of `node`.
    ///
    /// Dependents of the selector only hear about changes to the projected
    /// part.
    ///
    /// ```rust
    /// use ripple_core::Runtime;
    ///
    /// #[derive(Clone, PartialEq)]
    /// struct User { name: String, visits: u32 }
    ///
    /// let rt = Runtime::new();
    /// let user = rt.source(User { name: "ada".into(), visits: 0 });
    /// let name = rt.select(&user, |u: &User| u.name.clone());
    ///
    /// assert_eq!(name.get(), "ada");
    /// user.update(|u| User { visits: u.visits + 1, ..u.clone() });
    /// assert_eq!(name.get(), "ada");
    /// assert_eq!(name.compute_count(), 2);
    /// ```
    pub fn select<T, U, N>(&self, node: &N, projector: impl Fn(&T) -> U + 'static) -> Derived<U>
    where
        T: 'static,
        U: PartialEq + 'static,
        N: Readable<T>,
    {
        let node = node.clone();
        self.derived(move || {
            node.read_with(&projector)
                .unwrap_or_else(|err| panic!("{err}"))
        })
    }

    /// Call `callback` with the node's value now and after every change.
    ///
    /// The callback itself runs untracked; only `node` is a dependency.
    pub fn subscribe<T, N>(&self, node: &N, mut callback: impl FnMut(&T) + 'static) -> Subscription
    where
        T: 'static,
        N: Readable<T>,
    {
        let node = node.clone();
        let rt = self.downgrade();
        let consumer = self.consumer(move || {
            let Some(rt) = rt.upgrade() else {
                return;
            };
            if let Err(err) = node.read_with(|value| rt.untracked(|| callback(value))) {
                panic!("{err}");
            }
        });
        Subscription {
            consumer: Some(consumer),
        }
    }
}

/// Guard that keeps a subscription alive.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    consumer: Option<Consumer>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.dispose();
        }
    }

    pub fn is_active(&self) -> bool {
        self.consumer
            .as_ref()
            .is_some_and(|consumer| !consumer.is_disposed())
    }

    pub fn consumer(&self) -> Option<&Consumer> {
        self.consumer.as_ref()
    }

    /// Keep the consumer running past the guard's lifetime.
    pub fn into_consumer(mut self) -> Option<Consumer> {
        self.consumer.take()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.dispose();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn subscription_delivers_until_dropped() {
        let rt = Runtime::new();
        let count = rt.source(1);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let subscription = {
            let seen = seen.clone();
            rt.subscribe(&count, move |n: &i32| seen.borrow_mut().push(*n))
        };
        assert!(subscription.is_active());

        count.set(2);
        drop(subscription);
        count.set(3);

        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(count.dependent_count(), 0);
    }

    #[test]
    fn callback_reads_are_not_dependencies() {
        let rt = Runtime::new();
        let count = rt.source(1);
        let other = rt.source(10);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let _subscription = {
            let (other, seen) = (other.clone(), seen.clone());
            rt.subscribe(&count, move |n: &i32| seen.borrow_mut().push(n + other.get()))
        };

        other.set(20);
        assert_eq!(*seen.borrow(), vec![11]);
        count.set(2);
        assert_eq!(*seen.borrow(), vec![11, 22]);
    }

    #[test]
    fn select_shields_dependents() {
        let rt = Runtime::new();
        let pair = rt.source((1, "a"));
        let first = rt.select(&pair, |p: &(i32, &str)| p.0);
        let runs = Rc::new(RefCell::new(0));

        let _consumer = {
            let (first, runs) = (first.clone(), runs.clone());
            rt.consumer(move || {
                first.get();
                *runs.borrow_mut() += 1;
            })
        };

        pair.set((1, "b"));
        assert_eq!(*runs.borrow(), 1);
        pair.set((2, "b"));
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn into_consumer_detaches_the_guard() {
        let rt = Runtime::new();
        let count = rt.source(0);
        let consumer = rt.subscribe(&count, |_: &i32| {}).into_consumer();
        assert!(consumer.is_some_and(|c| !c.is_disposed()));
        assert_eq!(count.dependent_count(), 1);
    }
}
