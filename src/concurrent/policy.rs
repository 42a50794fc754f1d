//! Ordering policies that decide where new entries go.
//!
//! A collection is parameterised by one [`OrderingPolicy`]. The policy is
//! consulted inside the write transaction with the map as it is at that
//! moment, so placement never races with other writers.
//!
//! Two marker traits gate the operations that only make sense for some
//! policies:
//!
//! - [`PositionalPolicy`]: callers may choose positions (`insert`, `set_at`)
//! - [`StableReplacePolicy`]: replacing a value never breaks the order

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;

use crate::error::Result;
use crate::persistent::{IndexResolver, PersistentOrderedMap};

/// Decides the position of a new `(key, value)` pair.
pub trait OrderingPolicy<K, V>: Send + Sync {
    /// Returns the position in `map` where `(key, value)` belongs.
    fn placement(&self, map: &PersistentOrderedMap<K, V>, key: &K, value: &V) -> usize;

    /// Returns `map` with every pair of `pairs` placed by this policy.
    ///
    /// # Errors
    ///
    /// Propagates the map's usage errors, e.g. duplicate keys.
    fn place_all(
        &self,
        map: &PersistentOrderedMap<K, V>,
        pairs: Vec<(K, V)>,
    ) -> Result<PersistentOrderedMap<K, V>>
    where
        K: Clone + Hash + Eq,
        V: Clone,
    {
        pairs.into_iter().try_fold(map.clone(), |map, (key, value)| {
            let index = self.placement(&map, &key, &value);
            map.insert(index, key, value)
        })
    }
}

/// Policies under which callers may pick positions explicitly.
pub trait PositionalPolicy<K, V>: OrderingPolicy<K, V> {}

/// Policies under which replacing a value keeps the order valid.
pub trait StableReplacePolicy<K, V>: OrderingPolicy<K, V> {}

// =============================================================================
// InsertionOrder
// =============================================================================

/// Entries stay in the order they were added; new entries go last.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertionOrder;

impl<K, V> OrderingPolicy<K, V> for InsertionOrder {
    fn placement(&self, map: &PersistentOrderedMap<K, V>, _key: &K, _value: &V) -> usize {
        map.len()
    }

    fn place_all(
        &self,
        map: &PersistentOrderedMap<K, V>,
        pairs: Vec<(K, V)>,
    ) -> Result<PersistentOrderedMap<K, V>>
    where
        K: Clone + Hash + Eq,
        V: Clone,
    {
        map.add_range(pairs)
    }
}

impl<K, V> PositionalPolicy<K, V> for InsertionOrder {}

impl<K, V> StableReplacePolicy<K, V> for InsertionOrder {}

// =============================================================================
// KeyOrder
// =============================================================================

/// Natural ordering comparator.
pub type NaturalOrder<T> = fn(&T, &T) -> Ordering;

/// Entries are kept sorted by key with a comparator.
///
/// Keys are unique, so ties only arise when the comparator treats distinct
/// keys as equal; the newer entry then goes after the existing ones.
#[derive(Clone, Copy)]
pub struct KeyOrder<F> {
    compare: F,
}

impl<F> KeyOrder<F> {
    /// Orders keys with `compare`.
    pub const fn by(compare: F) -> Self {
        Self { compare }
    }
}

impl<K: Ord> KeyOrder<NaturalOrder<K>> {
    /// Orders keys by their [`Ord`] implementation.
    #[must_use]
    pub fn natural() -> Self {
        Self::by(K::cmp)
    }
}

impl<K: Ord> Default for KeyOrder<NaturalOrder<K>> {
    fn default() -> Self {
        Self::natural()
    }
}

impl<F> fmt::Debug for KeyOrder<F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("KeyOrder").finish_non_exhaustive()
    }
}

impl<K, V, F> OrderingPolicy<K, V> for KeyOrder<F>
where
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    fn placement(&self, map: &PersistentOrderedMap<K, V>, key: &K, _value: &V) -> usize {
        IndexResolver::insertion_point(map.sequence(), |entry| {
            (self.compare)(entry.key(), key) != Ordering::Greater
        })
    }
}

impl<K, V, F> StableReplacePolicy<K, V> for KeyOrder<F> where F: Fn(&K, &K) -> Ordering + Send + Sync {}

// =============================================================================
// ValueOrder
// =============================================================================

/// Entries are kept sorted by value with a comparator; equal values keep
/// their insertion order.
#[derive(Clone, Copy)]
pub struct ValueOrder<F> {
    compare: F,
}

impl<F> ValueOrder<F> {
    /// Orders values with `compare`.
    pub const fn by(compare: F) -> Self {
        Self { compare }
    }
}

impl<V: Ord> ValueOrder<NaturalOrder<V>> {
    /// Orders values by their [`Ord`] implementation.
    #[must_use]
    pub fn natural() -> Self {
        Self::by(V::cmp)
    }
}

impl<V: Ord> Default for ValueOrder<NaturalOrder<V>> {
    fn default() -> Self {
        Self::natural()
    }
}

impl<F> fmt::Debug for ValueOrder<F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("ValueOrder").finish_non_exhaustive()
    }
}

impl<F> ValueOrder<F> {
    pub(crate) fn compare<V>(&self, left: &V, right: &V) -> Ordering
    where
        F: Fn(&V, &V) -> Ordering,
    {
        (self.compare)(left, right)
    }
}

impl<K, V, F> OrderingPolicy<K, V> for ValueOrder<F>
where
    F: Fn(&V, &V) -> Ordering + Send + Sync,
{
    fn placement(&self, map: &PersistentOrderedMap<K, V>, _key: &K, value: &V) -> usize {
        IndexResolver::insertion_point(map.sequence(), |entry| {
            (self.compare)(entry.value(), value) != Ordering::Greater
        })
    }
}
