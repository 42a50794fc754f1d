//! Persistent ordered map combining key lookup with positional order.
//!
//! This module provides [`PersistentOrderedMap`], the immutable value every
//! concurrent collection publishes as its snapshot.
//!
//! # Overview
//!
//! The map pairs two persistent structures that always hold exactly the same
//! set of [`Entry`] nodes:
//!
//! - a HAMT from key to entry, for lookup by key
//! - a [`PersistentSequence`] of entries ordered by [`SortKey`], for order
//!   and positional access
//!
//! New entries receive a sort key between their neighbours, so existing
//! entries never move in key space and an entry found by key is located in
//! the sequence by binary search ([`IndexResolver`]).
//!
//! - O(log N) `add`, `insert`, `remove`, `remove_at`, `replace_at`
//! - O(log N) `get_at`, `index_of`
//! - O(log32 N) `get`, `contains_key`
//! - O(log N + k) `add_range`, `insert_range`, `remove_range`
//!
//! # Examples
//!
//! ```rust
//! use snapmap::persistent::PersistentOrderedMap;
//!
//! let map = PersistentOrderedMap::new()
//!     .add_range([("p", 1), ("q", 2), ("r", 3)])
//!     .unwrap();
//! let inserted = map.insert(0, "x", 0).unwrap();
//!
//! assert_eq!(inserted.keys().copied().collect::<Vec<_>>(), vec!["x", "p", "q", "r"]);
//! assert_eq!(
//!     map.get_entry("q").unwrap().sort_key(),
//!     inserted.get_entry("q").unwrap().sort_key()
//! );
//! ```

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use tracing::debug;

use super::ReferenceCounter;
use super::hashmap::PersistentHashMap;
use super::index_resolver::IndexResolver;
use super::sequence::{PersistentSequence, PersistentSequenceIterator};
use super::sort_key::{SortKey, SortKeySpace};
use crate::error::{CollectionError, Result};

// =============================================================================
// Entry
// =============================================================================

/// One `(key, value)` pair together with its position in sort-key space.
///
/// Entries are immutable once created and shared between map versions.
/// Identity matters: two versions hold the same entry if and only if the
/// `ReferenceCounter`s point to the same allocation.
pub struct Entry<K, V> {
    key: K,
    value: V,
    sort_key: SortKey,
}

impl<K, V> Entry<K, V> {
    fn shared(key: K, value: V, sort_key: SortKey) -> ReferenceCounter<Self> {
        ReferenceCounter::new(Self {
            key,
            value,
            sort_key,
        })
    }

    /// Returns the key.
    #[inline]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Returns the value.
    #[inline]
    pub const fn value(&self) -> &V {
        &self.value
    }

    /// Returns the sort key that fixes this entry's position.
    #[inline]
    pub const fn sort_key(&self) -> &SortKey {
        &self.sort_key
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Entry<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Entry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("sort_key", &self.sort_key)
            .finish()
    }
}

/// An entry together with the position it occupies in one map version.
pub struct IndexedEntry<K, V> {
    /// Position of the entry in the version it was taken from.
    pub index: usize,
    /// The shared entry.
    pub entry: ReferenceCounter<Entry<K, V>>,
}

impl<K, V> Clone for IndexedEntry<K, V> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            entry: self.entry.clone(),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for IndexedEntry<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("IndexedEntry")
            .field("index", &self.index)
            .field("entry", &self.entry)
            .finish()
    }
}

type SharedEntry<K, V> = ReferenceCounter<Entry<K, V>>;
type Dictionary<K, V> = PersistentHashMap<K, SharedEntry<K, V>>;

fn dictionary_without<K: Clone + Hash + Eq, V>(dictionary: &Dictionary<K, V>, key: &K) -> Dictionary<K, V> {
    let removed = dictionary.remove(key);
    debug_assert!(removed.is_some(), "sequence entry is missing from the dictionary");
    removed.unwrap_or_else(|| dictionary.clone())
}

// =============================================================================
// PersistentOrderedMap Definition
// =============================================================================

/// A persistent map that remembers an explicit order of its entries.
///
/// Order is whatever the caller builds: [`add`](Self::add) appends,
/// [`insert`](Self::insert) places at a position. Replacing a value never
/// moves its entry.
///
/// # Sort Key Growth
///
/// Inserting repeatedly at the same place makes sort keys longer by one bit
/// per insertion. [`deepest_key_bits`](Self::deepest_key_bits) reports the
/// longest fraction created since the last [`renumbered`](Self::renumbered)
/// call, so owners can renumber once keys get too long. When the integer
/// range at either end is exhausted, the map renumbers on its own.
pub struct PersistentOrderedMap<K, V> {
    dictionary: Dictionary<K, V>,
    sequence: PersistentSequence<SharedEntry<K, V>>,
    deepest_key_bits: u32,
}

impl<K, V> PersistentOrderedMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dictionary: PersistentHashMap::new(),
            sequence: PersistentSequence::new(),
            deepest_key_bits: 0,
        }
    }

    /// Returns the number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Returns `true` if the map holds no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Returns the longest sort key fraction, in bits, created since the
    /// keys were last renumbered.
    #[inline]
    #[must_use]
    pub const fn deepest_key_bits(&self) -> u32 {
        self.deepest_key_bits
    }

    /// Returns the entries in order as a persistent sequence.
    #[inline]
    #[must_use]
    pub const fn sequence(&self) -> &PersistentSequence<SharedEntry<K, V>> {
        &self.sequence
    }

    /// Returns the entry at `index`.
    #[must_use]
    pub fn entry_at(&self, index: usize) -> Option<&SharedEntry<K, V>> {
        self.sequence.get(index)
    }

    /// Returns the pair at `index`.
    #[must_use]
    pub fn get_at(&self, index: usize) -> Option<(&K, &V)> {
        self.entry_at(index).map(|entry| (&entry.key, &entry.value))
    }

    /// Returns the first pair in order.
    #[must_use]
    pub fn first(&self) -> Option<(&K, &V)> {
        self.sequence.first().map(|entry| (&entry.key, &entry.value))
    }

    /// Returns the last pair in order.
    #[must_use]
    pub fn last(&self) -> Option<(&K, &V)> {
        self.sequence.last().map(|entry| (&entry.key, &entry.value))
    }

    /// Returns an iterator over the pairs in order.
    #[must_use]
    pub fn iter(&self) -> PersistentOrderedMapIterator<'_, K, V> {
        PersistentOrderedMapIterator {
            entries: self.sequence.iter(),
        }
    }

    /// Returns an iterator over the shared entries in order.
    #[must_use]
    pub fn entries(&self) -> PersistentSequenceIterator<'_, SharedEntry<K, V>> {
        self.sequence.iter()
    }

    /// Returns an iterator over the keys in order.
    pub fn keys(&self) -> impl ExactSizeIterator<Item = &K> + '_ {
        self.sequence.iter().map(|entry| &entry.key)
    }

    /// Returns an iterator over the values in order.
    pub fn values(&self) -> impl ExactSizeIterator<Item = &V> + '_ {
        self.sequence.iter().map(|entry| &entry.value)
    }
}

impl<K: Clone + Hash + Eq, V: Clone> PersistentOrderedMap<K, V> {
    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.dictionary.get(key).map(|entry| &entry.value)
    }

    /// Returns the shared entry stored under `key`.
    #[must_use]
    pub fn get_entry<Q>(&self, key: &Q) -> Option<&SharedEntry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.dictionary.get(key)
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.dictionary.get(key).is_some()
    }

    /// Returns the entry stored under `key` together with its position.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use snapmap::persistent::PersistentOrderedMap;
    ///
    /// let map = PersistentOrderedMap::new().add_range([("a", 1), ("b", 2)]).unwrap();
    /// let found = map.get_item_and_index("b").unwrap();
    ///
    /// assert_eq!(found.index, 1);
    /// assert_eq!(*found.entry.value(), 2);
    /// ```
    #[must_use]
    pub fn get_item_and_index<Q>(&self, key: &Q) -> Option<IndexedEntry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.dictionary.get(key)?;
        let index = IndexResolver::resolve(&self.sequence, entry)?;
        Some(IndexedEntry {
            index,
            entry: entry.clone(),
        })
    }

    /// Returns the position of `key`.
    #[must_use]
    pub fn index_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.dictionary
            .get(key)
            .and_then(|entry| IndexResolver::resolve(&self.sequence, entry))
    }

    /// Copies the pairs out in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<(K, V)> {
        self.sequence
            .iter()
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect()
    }

    // =========================================================================
    // Additions
    // =========================================================================

    /// Returns a new map with `(key, value)` appended.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::DuplicateKey`] if `key` is present.
    pub fn add(&self, key: K, value: V) -> Result<Self> {
        self.insert(self.len(), key, value)
    }

    /// Returns a new map with `(key, value)` placed at `index`.
    ///
    /// The new entry's sort key is the midpoint of its neighbours' keys, or
    /// one step past the end key when inserting at either end. No existing
    /// entry changes its sort key.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`] if `index > len` and
    /// [`CollectionError::DuplicateKey`] if `key` is present.
    pub fn insert(&self, index: usize, key: K, value: V) -> Result<Self> {
        self.check_insert_index(index)?;
        if self.contains_key(&key) {
            return Err(CollectionError::DuplicateKey);
        }
        let (base, mut sort_keys) = self.slot_keys(index, 1)?;
        let sort_key = sort_keys.pop().ok_or(CollectionError::KeySpaceExhausted { len: self.len() })?;
        Ok(base.with_entries(index, vec![Entry::shared(key, value, sort_key)]))
    }

    /// Returns a new map with `pairs` appended in iteration order.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::DuplicateKey`] if any key is present or
    /// repeats within `pairs`; nothing is added in that case.
    pub fn add_range<I>(&self, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.insert_range(self.len(), pairs)
    }

    /// Returns a new map with `pairs` placed at `index`, in iteration order.
    ///
    /// The new entries are built as one balanced subtree and joined in, and
    /// their sort keys bisect the gap between the neighbours.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`] if `index > len` and
    /// [`CollectionError::DuplicateKey`] if any key is present or repeats
    /// within `pairs`.
    pub fn insert_range<I>(&self, index: usize, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.check_insert_index(index)?;
        let pairs: Vec<(K, V)> = pairs.into_iter().collect();
        if pairs.is_empty() {
            return Ok(self.clone());
        }

        let mut seen = HashSet::with_capacity(pairs.len());
        for (key, _) in &pairs {
            if self.contains_key(key) || !seen.insert(key) {
                return Err(CollectionError::DuplicateKey);
            }
        }

        let (base, sort_keys) = self.slot_keys(index, pairs.len())?;
        let entries = pairs
            .into_iter()
            .zip(sort_keys)
            .map(|((key, value), sort_key)| Entry::shared(key, value, sort_key))
            .collect();
        Ok(base.with_entries(index, entries))
    }

    // =========================================================================
    // Removals
    // =========================================================================

    /// Returns a new map without `key`, together with the removed entry and
    /// its former position, or `None` if `key` is absent.
    #[must_use]
    pub fn remove<Q>(&self, key: &Q) -> Option<(Self, IndexedEntry<K, V>)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.get_item_and_index(key)?;
        let dictionary = self.dictionary.remove(key)?;
        let (sequence, _) = self.sequence.remove_at(removed.index)?;
        Some((self.derive(dictionary, sequence), removed))
    }

    /// Returns a new map without the entry at `index`, together with the
    /// removed entry.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`] if `index >= len`.
    pub fn remove_at(&self, index: usize) -> Result<(Self, IndexedEntry<K, V>)> {
        let (sequence, entry) = self
            .sequence
            .remove_at(index)
            .ok_or(CollectionError::IndexOutOfRange {
                index,
                len: self.len(),
            })?;
        let dictionary = dictionary_without(&self.dictionary, &entry.key);
        Ok((self.derive(dictionary, sequence), IndexedEntry { index, entry }))
    }

    /// Returns a new map without any of `keys`, together with the removed
    /// entries sorted by their former positions.
    ///
    /// Absent and repeated keys are ignored. Contiguous runs of removed
    /// entries are cut out of the sequence with one split each.
    #[must_use]
    pub fn remove_keys<'a, Q, I>(&self, keys: I) -> (Self, Vec<IndexedEntry<K, V>>)
    where
        I: IntoIterator<Item = &'a Q>,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
    {
        let mut dictionary = self.dictionary.clone();
        let mut removed = Vec::new();
        for key in keys {
            let Some(entry) = dictionary.get(key).cloned() else {
                continue;
            };
            dictionary = dictionary_without(&dictionary, &entry.key);
            if let Some(index) = IndexResolver::resolve(&self.sequence, &entry) {
                removed.push(IndexedEntry { index, entry });
            }
        }
        if removed.is_empty() {
            return (self.clone(), removed);
        }
        removed.sort_unstable_by_key(|removed| removed.index);

        let mut sequence = self.sequence.clone();
        let mut end = removed.len();
        while end > 0 {
            let mut start = end - 1;
            while start > 0 && removed[start - 1].index + 1 == removed[start].index {
                start -= 1;
            }
            sequence = sequence.remove_range(removed[start].index, end - start);
            end = start;
        }
        (self.derive(dictionary, sequence), removed)
    }

    /// Returns a new map without `[index, index + count)`, together with the
    /// removed entries in order.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::RangeOutOfBounds`] if the range does not fit.
    pub fn remove_range(&self, index: usize, count: usize) -> Result<(Self, Vec<SharedEntry<K, V>>)> {
        let len = self.len();
        if index.checked_add(count).is_none_or(|end| end > len) {
            return Err(CollectionError::RangeOutOfBounds { index, count, len });
        }
        let (before, rest) = self.sequence.split_at(index);
        let (middle, after) = rest.split_at(count);
        let removed: Vec<SharedEntry<K, V>> = middle.into_iter().collect();
        let dictionary = removed
            .iter()
            .fold(self.dictionary.clone(), |dictionary, entry| {
                dictionary_without(&dictionary, &entry.key)
            });
        Ok((self.derive(dictionary, before.concat(&after)), removed))
    }

    // =========================================================================
    // Replacement
    // =========================================================================

    /// Returns a new map whose entry at `index` holds `value`, together with
    /// the replaced entry.
    ///
    /// The new entry keeps the old sort key, so its position never changes.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`] if `index >= len`.
    pub fn replace_at(&self, index: usize, value: V) -> Result<(Self, IndexedEntry<K, V>)> {
        let out_of_range = CollectionError::IndexOutOfRange {
            index,
            len: self.len(),
        };
        let old = self.sequence.get(index).ok_or_else(|| out_of_range.clone())?.clone();
        let entry = Entry::shared(old.key.clone(), value, old.sort_key.clone());
        let sequence = self.sequence.update_at(index, entry.clone()).ok_or(out_of_range)?;
        let dictionary = self.dictionary.insert(old.key.clone(), entry);
        Ok((self.derive(dictionary, sequence), IndexedEntry { index, entry: old }))
    }

    /// Returns a new map where `key` holds `value`, together with the
    /// replaced entry, or `None` if `key` is absent.
    #[must_use]
    pub fn replace<Q>(&self, key: &Q, value: V) -> Option<(Self, IndexedEntry<K, V>)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.index_of(key)?;
        self.replace_at(index, value).ok()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Returns the same pairs in the same order with integer sort keys
    /// `0..len`.
    #[must_use]
    pub fn renumbered(&self) -> Self {
        let entries: Vec<SharedEntry<K, V>> = self
            .sequence
            .iter()
            .zip(0_i64..)
            .map(|(entry, position)| {
                Entry::shared(
                    entry.key.clone(),
                    entry.value.clone(),
                    SortKey::from_integer(position),
                )
            })
            .collect();
        Self::from_ordered_entries(&entries)
    }

    /// Checks that the dictionary and the sequence hold the same entries and
    /// that sort keys strictly increase along the sequence.
    #[must_use]
    pub fn check_invariants(&self) -> bool {
        let same_size = self.dictionary.len() == self.sequence.len();
        let same_entries = self.sequence.iter().all(|entry| {
            self.dictionary
                .get(&entry.key)
                .is_some_and(|found| ReferenceCounter::ptr_eq(found, entry))
        });
        let ordered = self
            .sequence
            .iter()
            .zip(self.sequence.iter().skip(1))
            .all(|(previous, next)| previous.sort_key < next.sort_key);
        same_size && same_entries && ordered && self.sequence.is_balanced()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn from_ordered_entries(entries: &[SharedEntry<K, V>]) -> Self {
        let dictionary = entries.iter().fold(PersistentHashMap::new(), |dictionary, entry| {
            dictionary.insert(entry.key.clone(), entry.clone())
        });
        Self {
            dictionary,
            sequence: PersistentSequence::from_slice(entries),
            deepest_key_bits: entries
                .iter()
                .map(|entry| entry.sort_key.fraction_bits())
                .max()
                .unwrap_or(0),
        }
    }

    fn derive(&self, dictionary: Dictionary<K, V>, sequence: PersistentSequence<SharedEntry<K, V>>) -> Self {
        Self {
            dictionary,
            sequence,
            deepest_key_bits: self.deepest_key_bits,
        }
    }

    fn check_insert_index(&self, index: usize) -> Result<()> {
        let len = self.sequence.len();
        if index > len {
            return Err(CollectionError::IndexOutOfRange { index, len });
        }
        Ok(())
    }

    /// Generates `count` sort keys for the gap before position `index`.
    ///
    /// Returns the map the keys belong to: `self`, or a renumbered copy when
    /// the integer range at an open end is used up.
    fn slot_keys(&self, index: usize, count: usize) -> Result<(Self, Vec<SortKey>)> {
        if let Some(keys) = self.gap_keys(index, count) {
            return Ok((self.clone(), keys));
        }
        let renumbered = self.renumbered();
        debug!(len = self.len(), "sort key range exhausted, renumbered");
        renumbered
            .gap_keys(index, count)
            .map(|keys| (renumbered, keys))
            .ok_or(CollectionError::KeySpaceExhausted { len: self.len() })
    }

    fn gap_keys(&self, index: usize, count: usize) -> Option<Vec<SortKey>> {
        let previous = index.checked_sub(1).and_then(|previous| self.sequence.get(previous));
        let next = self.sequence.get(index);
        SortKeySpace::between_many(
            previous.map(|entry| &entry.sort_key),
            next.map(|entry| &entry.sort_key),
            count,
        )
    }

    fn with_entries(&self, index: usize, entries: Vec<SharedEntry<K, V>>) -> Self {
        let dictionary = entries.iter().fold(self.dictionary.clone(), |dictionary, entry| {
            dictionary.insert(entry.key.clone(), entry.clone())
        });
        let deepest_key_bits = entries
            .iter()
            .map(|entry| entry.sort_key.fraction_bits())
            .fold(self.deepest_key_bits, u32::max);
        let sequence = match entries.as_slice() {
            [entry] => self.sequence.insert_at(index, entry.clone()),
            _ => self.sequence.insert_many_at(index, &entries),
        };
        Self {
            dictionary,
            sequence,
            deepest_key_bits,
        }
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// An iterator over the pairs of a [`PersistentOrderedMap`] in order.
pub struct PersistentOrderedMapIterator<'a, K, V> {
    entries: PersistentSequenceIterator<'a, SharedEntry<K, V>>,
}

impl<'a, K, V> Iterator for PersistentOrderedMapIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(|entry| (&entry.key, &entry.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K, V> ExactSizeIterator for PersistentOrderedMapIterator<'_, K, V> {}

impl<'a, K, V> IntoIterator for &'a PersistentOrderedMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = PersistentOrderedMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K: Clone, V> Clone for PersistentOrderedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            dictionary: self.dictionary.clone(),
            sequence: self.sequence.clone(),
            deepest_key_bits: self.deepest_key_bits,
        }
    }
}

impl<K, V> Default for PersistentOrderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for PersistentOrderedMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<K: Eq, V: Eq> Eq for PersistentOrderedMap<K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentOrderedMap<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K: serde::Serialize, V: serde::Serialize> serde::Serialize for PersistentOrderedMap<K, V> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for pair in self {
            seq.serialize_element(&pair)?;
        }
        seq.end()
    }
}

#[cfg(feature = "serde")]
struct PersistentOrderedMapVisitor<K, V> {
    marker: std::marker::PhantomData<(K, V)>,
}

#[cfg(feature = "serde")]
impl<K, V> PersistentOrderedMapVisitor<K, V> {
    const fn new() -> Self {
        Self {
            marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::de::Visitor<'de> for PersistentOrderedMapVisitor<K, V>
where
    K: serde::Deserialize<'de> + Clone + Hash + Eq,
    V: serde::Deserialize<'de> + Clone,
{
    type Value = PersistentOrderedMap<K, V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a sequence of key-value pairs with unique keys")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        use serde::de::Error;

        const MAX_PREALLOCATE: usize = 4096;
        let capacity = seq.size_hint().unwrap_or(0).min(MAX_PREALLOCATE);
        let mut pairs: Vec<(K, V)> = Vec::with_capacity(capacity);
        while let Some(pair) = seq.next_element()? {
            pairs.push(pair);
        }
        PersistentOrderedMap::new().add_range(pairs).map_err(A::Error::custom)
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for PersistentOrderedMap<K, V>
where
    K: serde::Deserialize<'de> + Clone + Hash + Eq,
    V: serde::Deserialize<'de> + Clone,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(PersistentOrderedMapVisitor::new())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn pqr() -> PersistentOrderedMap<&'static str, i32> {
        PersistentOrderedMap::new()
            .add("p", 1)
            .and_then(|map| map.add("q", 2))
            .and_then(|map| map.add("r", 3))
            .unwrap()
    }

    fn keys_of(map: &PersistentOrderedMap<&'static str, i32>) -> Vec<&'static str> {
        map.keys().copied().collect()
    }

    fn sort_keys_of(map: &PersistentOrderedMap<&'static str, i32>) -> Vec<SortKey> {
        map.entries().map(|entry| entry.sort_key().clone()).collect()
    }

    #[rstest]
    fn test_add_appends_with_increasing_keys(pqr: PersistentOrderedMap<&'static str, i32>) {
        assert_eq!(keys_of(&pqr), vec!["p", "q", "r"]);
        assert_eq!(
            sort_keys_of(&pqr),
            vec![SortKey::from_integer(0), SortKey::from_integer(1), SortKey::from_integer(2)]
        );
        assert!(pqr.check_invariants());
    }

    #[rstest]
    fn test_insert_at_front_keeps_existing_sort_keys(pqr: PersistentOrderedMap<&'static str, i32>) {
        let inserted = pqr.insert(0, "x", 0).unwrap();
        assert_eq!(keys_of(&inserted), vec!["x", "p", "q", "r"]);
        assert_eq!(sort_keys_of(&inserted)[1..], sort_keys_of(&pqr)[..]);
        assert_eq!(inserted.get_entry("x").unwrap().sort_key(), &SortKey::from_integer(-1));
        assert!(inserted.check_invariants());
    }

    #[rstest]
    fn test_insert_in_middle_uses_midpoint(pqr: PersistentOrderedMap<&'static str, i32>) {
        let inserted = pqr.insert(2, "m", 9).unwrap();
        let previous = pqr.get_entry("q").unwrap().sort_key();
        let next = pqr.get_entry("r").unwrap().sort_key();
        assert_eq!(
            inserted.get_entry("m").unwrap().sort_key(),
            &SortKeySpace::between(previous, next)
        );
        assert_eq!(inserted.index_of("m"), Some(2));
    }

    #[rstest]
    fn test_insert_at_len_is_add(pqr: PersistentOrderedMap<&'static str, i32>) {
        assert_eq!(pqr.insert(3, "s", 4).unwrap(), pqr.add("s", 4).unwrap());
    }

    #[rstest]
    fn test_insert_past_end_is_rejected(pqr: PersistentOrderedMap<&'static str, i32>) {
        assert_eq!(
            pqr.insert(4, "s", 4).unwrap_err(),
            CollectionError::IndexOutOfRange { index: 4, len: 3 }
        );
    }

    #[rstest]
    fn test_duplicate_key_is_rejected(pqr: PersistentOrderedMap<&'static str, i32>) {
        assert_eq!(pqr.add("q", 7).unwrap_err(), CollectionError::DuplicateKey);
        assert_eq!(
            pqr.add_range([("s", 1), ("s", 2)]).unwrap_err(),
            CollectionError::DuplicateKey
        );
    }

    #[rstest]
    fn test_insert_range_between_neighbours(pqr: PersistentOrderedMap<&'static str, i32>) {
        let inserted = pqr.insert_range(1, [("a", 10), ("b", 11), ("c", 12)]).unwrap();
        assert_eq!(keys_of(&inserted), vec!["p", "a", "b", "c", "q", "r"]);
        assert!(inserted.check_invariants());
        assert!(inserted.deepest_key_bits() <= 2);
    }

    #[rstest]
    fn test_remove_by_key(pqr: PersistentOrderedMap<&'static str, i32>) {
        let (removed, entry) = pqr.remove("q").unwrap();
        assert_eq!(entry.index, 1);
        assert_eq!(*entry.entry.value(), 2);
        assert_eq!(keys_of(&removed), vec!["p", "r"]);
        assert!(removed.check_invariants());
        assert!(pqr.remove("zz").is_none());
    }

    #[rstest]
    fn test_remove_at_out_of_range(pqr: PersistentOrderedMap<&'static str, i32>) {
        assert!(matches!(
            pqr.remove_at(3),
            Err(CollectionError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[rstest]
    fn test_remove_keys_reports_sorted_positions() {
        let map = PersistentOrderedMap::new()
            .add_range((0..10).map(|value| (value, value * 10)))
            .unwrap();
        let (removed, entries) = map.remove_keys([8, 2, 3, 42, 2, 9].iter());
        assert_eq!(
            entries.iter().map(|entry| entry.index).collect::<Vec<_>>(),
            vec![2, 3, 8, 9]
        );
        assert_eq!(removed.keys().copied().collect::<Vec<_>>(), vec![0, 1, 4, 5, 6, 7]);
        assert!(removed.check_invariants());
    }

    #[rstest]
    #[case(0, 3, vec![])]
    #[case(1, 1, vec!["p", "r"])]
    #[case(1, 2, vec!["p"])]
    #[case(3, 0, vec!["p", "q", "r"])]
    fn test_remove_range(
        pqr: PersistentOrderedMap<&'static str, i32>,
        #[case] index: usize,
        #[case] count: usize,
        #[case] expected: Vec<&'static str>,
    ) {
        let (removed, entries) = pqr.remove_range(index, count).unwrap();
        assert_eq!(keys_of(&removed), expected);
        assert_eq!(entries.len(), count);
        assert!(removed.check_invariants());
    }

    #[rstest]
    fn test_remove_range_near_tail_of_large_map() {
        let map = PersistentOrderedMap::new()
            .add_range((0..10_000).map(|value| (value, value)))
            .unwrap();
        let (removed, entries) = map.remove_range(9_997, 2).unwrap();
        assert_eq!(
            entries.iter().map(|entry| *entry.key()).collect::<Vec<_>>(),
            vec![9_997, 9_998]
        );
        assert_eq!(removed.len(), 9_998);
        assert_eq!(removed.get_at(9_997), Some((&9_999, &9_999)));
        assert_eq!(removed.index_of(&9_999), Some(9_997));
        assert!(!removed.contains_key(&9_998));
        assert!(removed.check_invariants());
    }

    #[rstest]
    #[case(2, 2)]
    #[case(4, 0)]
    #[case(usize::MAX, 2)]
    fn test_remove_range_out_of_bounds(
        pqr: PersistentOrderedMap<&'static str, i32>,
        #[case] index: usize,
        #[case] count: usize,
    ) {
        assert_eq!(
            pqr.remove_range(index, count).unwrap_err(),
            CollectionError::RangeOutOfBounds { index, count, len: 3 }
        );
    }

    #[rstest]
    fn test_replace_keeps_position_and_sort_key(pqr: PersistentOrderedMap<&'static str, i32>) {
        let (replaced, old) = pqr.replace("q", 20).unwrap();
        assert_eq!(old.index, 1);
        assert_eq!(*old.entry.value(), 2);
        assert_eq!(replaced.get("q"), Some(&20));
        assert_eq!(replaced.index_of("q"), Some(1));
        assert_eq!(sort_keys_of(&replaced), sort_keys_of(&pqr));
        assert!(replaced.check_invariants());
        assert_eq!(pqr.get("q"), Some(&2));
    }

    #[rstest]
    fn test_repeated_insert_grows_key_depth_and_renumber_resets_it() {
        let map = PersistentOrderedMap::new().add_range([(-1, 0), (-2, 0)]).unwrap();
        let deep = (0..70).fold(map, |map, key| map.insert(1, key, key).unwrap());
        assert_eq!(deep.deepest_key_bits(), 70);
        assert!(deep.check_invariants());

        let renumbered = deep.renumbered();
        assert_eq!(renumbered.deepest_key_bits(), 0);
        assert_eq!(renumbered, deep);
        assert!(renumbered.check_invariants());
    }

    #[rstest]
    fn test_exhausted_integer_range_renumbers() {
        let top = Entry::shared("top", 0, SortKey::from_integer(i64::MAX));
        let map = PersistentOrderedMap::from_ordered_entries(&[top]);
        let added = map.add("next", 1).unwrap();
        assert_eq!(added.keys().copied().collect::<Vec<_>>(), vec!["top", "next"]);
        assert_eq!(added.get_entry("top").unwrap().sort_key(), &SortKey::from_integer(0));
        assert!(added.check_invariants());
    }

    #[rstest]
    fn test_get_at_first_last(pqr: PersistentOrderedMap<&'static str, i32>) {
        assert_eq!(pqr.get_at(1), Some((&"q", &2)));
        assert_eq!(pqr.get_at(3), None);
        assert_eq!(pqr.first(), Some((&"p", &1)));
        assert_eq!(pqr.last(), Some((&"r", &3)));
        assert_eq!(pqr.to_vec(), vec![("p", 1), ("q", 2), ("r", 3)]);
    }

    #[rstest]
    fn test_debug_format(pqr: PersistentOrderedMap<&'static str, i32>) {
        assert_eq!(format!("{pqr:?}"), r#"{"p": 1, "q": 2, "r": 3}"#);
    }
}

#[cfg(all(test, feature = "serde"))]
mod serde_tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_serialize_as_pair_sequence() {
        let map = PersistentOrderedMap::new().add_range([("b", 2), ("a", 1)]).unwrap();
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"[["b",2],["a",1]]"#);
    }

    #[rstest]
    fn test_deserialize_rejects_duplicate_keys() {
        let result: std::result::Result<PersistentOrderedMap<String, i32>, _> =
            serde_json::from_str(r#"[["a",1],["a",2]]"#);
        assert!(result.is_err());
    }
}
