//! A thread-safe collection of values kept in comparator order.

use std::cmp::Ordering;
use std::fmt;

use super::list::{ItemId, ItemIdAllocator};
use crate::concurrent::{ChangeEvent, ListenerId, NaturalOrder, OrderedCollection, Snapshot, ValueOrder};
use crate::config::CollectionConfig;
use crate::error::Result;

/// A thread-safe sorted multiset of values.
///
/// New values go after every value comparing equal, so equal values keep
/// the order in which they were added. Values cannot be replaced in place,
/// since a new value could belong elsewhere.
///
/// # Examples
///
/// ```rust
/// use snapmap::collections::ConcurrentSortedCollection;
///
/// let collection = ConcurrentSortedCollection::new();
/// for value in [5, 1, 3, 1] {
///     collection.add(value).unwrap();
/// }
///
/// assert_eq!(collection.to_vec(), vec![1, 1, 3, 5]);
/// assert_eq!(collection.index_of(&3), Some(2));
/// ```
pub struct ConcurrentSortedCollection<T, F = NaturalOrder<T>> {
    inner: OrderedCollection<ItemId, T, ValueOrder<F>>,
    ids: ItemIdAllocator,
}

impl<T: Clone + Ord> ConcurrentSortedCollection<T> {
    /// Creates an empty collection in natural order.
    #[must_use]
    pub fn new() -> Self {
        Self::with_comparator(T::cmp, CollectionConfig::default())
    }
}

impl<T, F> ConcurrentSortedCollection<T, F>
where
    T: Clone,
    F: Fn(&T, &T) -> Ordering + Send + Sync,
{
    /// Creates an empty collection ordered by `compare`.
    #[must_use]
    pub fn with_comparator(compare: F, config: CollectionConfig) -> Self {
        Self {
            inner: OrderedCollection::with_policy(ValueOrder::by(compare), config),
            ids: ItemIdAllocator::default(),
        }
    }

    /// Returns the underlying keyed collection.
    #[inline]
    #[must_use]
    pub const fn collection(&self) -> &OrderedCollection<ItemId, T, ValueOrder<F>> {
        &self.inner
    }

    /// Registers a callback invoked once per committed write.
    pub fn subscribe_fn<C>(&self, callback: C) -> ListenerId
    where
        C: Fn(&ChangeEvent<ItemId, T>) + Send + Sync + 'static,
    {
        self.inner.subscribe_fn(callback)
    }

    /// Registers a channel receiving every committed change event.
    pub fn subscribe_channel(&self) -> (ListenerId, crossbeam_channel::Receiver<ChangeEvent<ItemId, T>>) {
        self.inner.subscribe_channel()
    }

    /// Adds `value` in order and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::KeySpaceExhausted`](crate::CollectionError::KeySpaceExhausted)
    /// if no position can be generated.
    pub fn add(&self, value: T) -> Result<usize> {
        self.inner.add(self.ids.allocate(), value)
    }

    /// Adds every value in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::KeySpaceExhausted`](crate::CollectionError::KeySpaceExhausted)
    /// if no positions can be generated.
    pub fn add_range(&self, values: impl IntoIterator<Item = T>) -> Result<()> {
        self.inner.add_range(self.ids.allocate_many(values))
    }

    /// Returns the position of the first value comparing equal to `value`.
    #[must_use]
    pub fn index_of(&self, value: &T) -> Option<usize> {
        let snapshot = self.inner.to_snapshot();
        self.lower_bound(&snapshot, value)
    }

    /// Returns `true` if a value comparing equal to `value` is present.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.index_of(value).is_some()
    }

    /// Removes the first value comparing equal to `value`. Returns `true` if
    /// one was found.
    pub fn remove(&self, value: &T) -> bool {
        self.inner
            .remove_located(|snapshot| self.lower_bound(snapshot, value))
            .is_some()
    }

    /// Removes the value at `index` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`](crate::CollectionError::IndexOutOfRange)
    /// if `index >= len`.
    pub fn remove_at(&self, index: usize) -> Result<T> {
        self.inner.remove_at(index).map(|(_, value)| value)
    }

    /// Returns the value at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.get_at(index).map(|(_, value)| value)
    }

    /// Returns the smallest value.
    #[must_use]
    pub fn first(&self) -> Option<T> {
        self.get(0)
    }

    /// Returns the largest value.
    #[must_use]
    pub fn last(&self) -> Option<T> {
        self.inner.to_snapshot().last().map(|(_, value)| value.clone())
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

    /// Returns `true` if the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the values in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.values()
    }

    /// Iterates over the snapshot current at the time of the call.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = T> {
        self.inner.iter().map(|(_, value)| value)
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn to_snapshot(&self) -> Snapshot<ItemId, T> {
        self.inner.to_snapshot()
    }

    fn lower_bound(&self, snapshot: &Snapshot<ItemId, T>, value: &T) -> Option<usize> {
        let policy = self.inner.policy();
        let index = snapshot
            .sequence()
            .partition_point(|entry| policy.compare(entry.value(), value) == Ordering::Less);
        snapshot
            .get_at(index)
            .filter(|(_, found)| policy.compare(*found, value) == Ordering::Equal)
            .map(|_| index)
    }
}

impl<T: Clone + Ord> Default for ConcurrentSortedCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, F> fmt::Debug for ConcurrentSortedCollection<T, F>
where
    T: Clone + fmt::Debug,
    F: Fn(&T, &T) -> Ordering + Send + Sync,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::ChangeAction;
    use rstest::rstest;

    #[rstest]
    fn test_equal_values_keep_insertion_order() {
        let collection = ConcurrentSortedCollection::with_comparator(
            |left: &(i32, &str), right: &(i32, &str)| left.0.cmp(&right.0),
            CollectionConfig::default(),
        );
        collection.add((2, "first")).unwrap();
        collection.add((1, "low")).unwrap();
        collection.add((2, "second")).unwrap();
        assert_eq!(collection.add((2, "third")), Ok(3));
        assert_eq!(
            collection.to_vec(),
            vec![(1, "low"), (2, "first"), (2, "second"), (2, "third")]
        );
        assert!(collection.remove(&(2, "ignored")));
        assert_eq!(collection.get(1), Some((2, "second")));
    }

    #[rstest]
    fn test_add_range_event_lists_final_positions() {
        let collection = ConcurrentSortedCollection::new();
        collection.add_range([10, 30]).unwrap();
        let (_, events) = collection.subscribe_channel();
        collection.add_range([20, 40, 5]).unwrap();

        assert_eq!(collection.to_vec(), vec![5, 10, 20, 30, 40]);
        let event = events.try_recv().unwrap();
        assert_eq!(event.action, ChangeAction::Add);
        assert_eq!(
            event.new_items.iter().map(|item| (item.index, item.value)).collect::<Vec<_>>(),
            vec![(0, 5), (2, 20), (4, 40)]
        );
        assert_eq!(event.index, None);
        assert!(events.try_recv().is_err());
    }

    #[rstest]
    fn test_lookup_and_bounds() {
        let collection = ConcurrentSortedCollection::new();
        collection.add_range([3, 1, 2]).unwrap();
        assert_eq!(collection.index_of(&2), Some(1));
        assert_eq!(collection.index_of(&7), None);
        assert!(!collection.contains(&0));
        assert_eq!(collection.first(), Some(1));
        assert_eq!(collection.last(), Some(3));
        assert_eq!(collection.remove_at(0), Ok(1));
        assert!(!collection.remove(&1));
    }
}
