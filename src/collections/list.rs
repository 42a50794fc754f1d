//! A thread-safe positional list.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::concurrent::{ChangeEvent, InsertionOrder, ListenerId, OrderedCollection, Snapshot};
use crate::config::CollectionConfig;
use crate::error::Result;

/// Identity of one list element.
///
/// Every element gets a fresh id when it is added, so equal values stay
/// distinguishable in change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemId(u64);

impl ItemId {
    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Allocates [`ItemId`]s, unique within one collection.
#[derive(Debug, Default)]
pub(crate) struct ItemIdAllocator {
    next: AtomicU64,
}

impl ItemIdAllocator {
    pub(crate) fn allocate(&self) -> ItemId {
        ItemId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn allocate_many<T>(&self, values: impl IntoIterator<Item = T>) -> Vec<(ItemId, T)> {
        values
            .into_iter()
            .map(|value| (self.allocate(), value))
            .collect()
    }
}

/// A thread-safe list with O(log N) positional access.
///
/// Duplicates are allowed. Every mutation publishes a new snapshot and
/// fires one change event keyed by [`ItemId`].
///
/// # Examples
///
/// ```rust
/// use snapmap::collections::ConcurrentList;
///
/// let list = ConcurrentList::new();
/// list.push("b").unwrap();
/// list.push("b").unwrap();
/// list.insert(0, "a").unwrap();
///
/// assert_eq!(list.to_vec(), vec!["a", "b", "b"]);
/// assert!(list.remove_item(&"b"));
/// assert_eq!(list.to_vec(), vec!["a", "b"]);
/// ```
pub struct ConcurrentList<T> {
    inner: OrderedCollection<ItemId, T, InsertionOrder>,
    ids: ItemIdAllocator,
}

impl<T: Clone> ConcurrentList<T> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CollectionConfig::default())
    }

    /// Creates an empty list with `config`.
    #[must_use]
    pub fn with_config(config: CollectionConfig) -> Self {
        Self {
            inner: OrderedCollection::with_policy(InsertionOrder, config),
            ids: ItemIdAllocator::default(),
        }
    }

    /// Returns the underlying keyed collection.
    #[inline]
    #[must_use]
    pub const fn collection(&self) -> &OrderedCollection<ItemId, T, InsertionOrder> {
        &self.inner
    }

    /// Registers a callback invoked once per committed write.
    pub fn subscribe_fn<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent<ItemId, T>) + Send + Sync + 'static,
    {
        self.inner.subscribe_fn(callback)
    }

    /// Registers a channel receiving every committed change event.
    pub fn subscribe_channel(&self) -> (ListenerId, crossbeam_channel::Receiver<ChangeEvent<ItemId, T>>) {
        self.inner.subscribe_channel()
    }

    /// Appends `value` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::KeySpaceExhausted`](crate::CollectionError::KeySpaceExhausted)
    /// if no position can be generated.
    pub fn push(&self, value: T) -> Result<ItemId> {
        let id = self.ids.allocate();
        self.inner.add(id, value)?;
        Ok(id)
    }

    /// Inserts `value` at `index` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`](crate::CollectionError::IndexOutOfRange)
    /// if `index > len`.
    pub fn insert(&self, index: usize, value: T) -> Result<ItemId> {
        let id = self.ids.allocate();
        self.inner.insert(index, id, value)?;
        Ok(id)
    }

    /// Appends every value in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::KeySpaceExhausted`](crate::CollectionError::KeySpaceExhausted)
    /// if no positions can be generated.
    pub fn extend(&self, values: impl IntoIterator<Item = T>) -> Result<()> {
        self.inner.add_range(self.ids.allocate_many(values))
    }

    /// Inserts every value at `index`, in order, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`](crate::CollectionError::IndexOutOfRange)
    /// if `index > len`.
    pub fn insert_range(&self, index: usize, values: impl IntoIterator<Item = T>) -> Result<()> {
        self.inner.insert_range(index, self.ids.allocate_many(values))
    }

    /// Returns the element at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.get_at(index).map(|(_, value)| value)
    }

    /// Returns the id of the element at `index`.
    #[must_use]
    pub fn id_at(&self, index: usize) -> Option<ItemId> {
        self.inner.get_at(index).map(|(id, _)| id)
    }

    /// Returns the position of the element with `id`.
    #[must_use]
    pub fn index_of_id(&self, id: ItemId) -> Option<usize> {
        self.inner.index_of(&id)
    }

    /// Replaces the element at `index` and returns the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`](crate::CollectionError::IndexOutOfRange)
    /// if `index >= len`.
    pub fn set_at(&self, index: usize, value: T) -> Result<T> {
        self.inner.set_at(index, value)
    }

    /// Removes the element at `index` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`](crate::CollectionError::IndexOutOfRange)
    /// if `index >= len`.
    pub fn remove_at(&self, index: usize) -> Result<T> {
        self.inner.remove_at(index).map(|(_, value)| value)
    }

    /// Removes `[index, index + count)`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::RangeOutOfBounds`](crate::CollectionError::RangeOutOfBounds)
    /// if the range does not fit.
    pub fn remove_range(&self, index: usize, count: usize) -> Result<()> {
        self.inner.remove_range(index, count)
    }

    /// Removes every element.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the elements in order.
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
}

impl<T: Clone + PartialEq> ConcurrentList<T> {
    /// Removes the first element equal to `item`. Returns `true` if found.
    pub fn remove_item(&self, item: &T) -> bool {
        self.inner
            .remove_first_where(|_, value| value == item)
            .is_some()
    }

    /// Returns the position of the first element equal to `item`.
    #[must_use]
    pub fn index_of_item(&self, item: &T) -> Option<usize> {
        self.inner.position_where(|_, value| value == item)
    }

    /// Returns `true` if an element equal to `item` is present.
    #[must_use]
    pub fn contains_item(&self, item: &T) -> bool {
        self.index_of_item(item).is_some()
    }
}

impl<T: Clone> Default for ConcurrentList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + fmt::Debug> fmt::Debug for ConcurrentList<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_list().entries(self.iter()).finish()
    }
}
