//! A thread-safe insertion-ordered set.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use crate::concurrent::{ChangeEvent, InsertionOrder, ListenerId, OrderedCollection, Snapshot};
use crate::config::CollectionConfig;
use crate::error::Result;

/// A thread-safe set that remembers insertion order.
///
/// # Examples
///
/// ```rust
/// use snapmap::collections::ConcurrentHashSet;
///
/// let set = ConcurrentHashSet::new();
/// assert_eq!(set.insert("a"), Ok(true));
/// assert_eq!(set.insert("b"), Ok(true));
/// assert_eq!(set.insert("a"), Ok(false));
///
/// assert_eq!(set.to_vec(), vec!["a", "b"]);
/// ```
pub struct ConcurrentHashSet<T> {
    inner: OrderedCollection<T, (), InsertionOrder>,
}

impl<T: Clone + Hash + Eq> ConcurrentHashSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CollectionConfig::default())
    }

    /// Creates an empty set with `config`.
    #[must_use]
    pub fn with_config(config: CollectionConfig) -> Self {
        Self {
            inner: OrderedCollection::with_policy(InsertionOrder, config),
        }
    }

    /// Returns the underlying keyed collection.
    #[inline]
    #[must_use]
    pub const fn collection(&self) -> &OrderedCollection<T, (), InsertionOrder> {
        &self.inner
    }

    /// Registers a callback invoked once per committed write.
    pub fn subscribe_fn<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent<T, ()>) + Send + Sync + 'static,
    {
        self.inner.subscribe_fn(callback)
    }

    /// Registers a channel receiving every committed change event.
    pub fn subscribe_channel(&self) -> (ListenerId, crossbeam_channel::Receiver<ChangeEvent<T, ()>>) {
        self.inner.subscribe_channel()
    }

    /// Adds `value`. Returns `Ok(false)` if it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::KeySpaceExhausted`](crate::CollectionError::KeySpaceExhausted)
    /// if no position is left for the value.
    pub fn insert(&self, value: T) -> Result<bool> {
        self.inner.try_add(value, ())
    }

    /// Adds every absent value in one transaction and returns how many were
    /// added.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::KeySpaceExhausted`](crate::CollectionError::KeySpaceExhausted)
    /// if no positions are left; nothing is added then.
    pub fn extend(&self, values: impl IntoIterator<Item = T>) -> Result<usize> {
        self.inner
            .try_add_range(values.into_iter().map(|value| (value, ())))
    }

    /// Removes `value`. Returns `true` if it was present.
    pub fn remove<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.remove(value)
    }

    /// Returns `true` if `value` is present.
    #[must_use]
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.contains_key(value)
    }

    /// Returns the position of `value` in insertion order.
    #[must_use]
    pub fn index_of<Q>(&self, value: &Q) -> Option<usize>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.index_of(value)
    }

    /// Returns the value at `index`.
    #[must_use]
    pub fn get_at(&self, index: usize) -> Option<T> {
        self.inner.get_at(index).map(|(value, ())| value)
    }

    /// Removes every value.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the values in insertion order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.keys()
    }

    /// Iterates over the snapshot current at the time of the call.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = T> {
        self.inner.iter().map(|(value, ())| value)
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn to_snapshot(&self) -> Snapshot<T, ()> {
        self.inner.to_snapshot()
    }
}

impl<T: Clone + Hash + Eq> Default for ConcurrentHashSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Hash + Eq + fmt::Debug> fmt::Debug for ConcurrentHashSet<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_insert_is_unique() {
        let set = ConcurrentHashSet::new();
        assert_eq!(set.insert(3), Ok(true));
        assert_eq!(set.insert(3), Ok(false));
        assert_eq!(set.len(), 1);
    }

    #[rstest]
    fn test_extend_skips_present_and_repeated_values() {
        let set = ConcurrentHashSet::new();
        set.insert(1).unwrap();
        assert_eq!(set.extend([1, 2, 2, 3]), Ok(2));
        assert_eq!(set.to_vec(), vec![1, 2, 3]);
    }

    #[rstest]
    fn test_remove_and_positions() {
        let set = ConcurrentHashSet::new();
        set.extend(["x".to_string(), "y".to_string(), "z".to_string()])
            .unwrap();
        assert!(set.remove("y"));
        assert!(!set.remove("y"));
        assert_eq!(set.index_of("z"), Some(1));
        assert_eq!(set.get_at(0), Some("x".to_string()));
        assert!(set.contains("x"));
    }
}
