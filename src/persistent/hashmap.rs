//! Persistent hash map (HAMT) backing the key lookup half of an ordered map.
//!
//! [`PersistentHashMap`] is a Hash Array Mapped Trie with 32-way branching.
//! Every update copies only the path from the root to the touched slot, so
//! two versions share all untouched subtries through [`ReferenceCounter`].
//!
//! - O(log32 N) get, insert and remove (effectively constant)
//! - O(1) len
//!
//! The trie uses bitmap-compressed branch nodes and collision nodes for keys
//! whose full 64-bit hashes collide.

use std::borrow::Borrow;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::ReferenceCounter;

// =============================================================================
// Constants
// =============================================================================

/// Bits of the hash consumed per trie level (2^5 = 32 slots).
const BITS_PER_LEVEL: usize = 5;

/// Mask selecting a slot within one level.
const MASK: u64 = (1 << BITS_PER_LEVEL) - 1;

// =============================================================================
// Hash computation
// =============================================================================

fn compute_hash<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[inline]
const fn slot_of(hash: u64, depth: usize) -> u32 {
    ((hash >> (depth * BITS_PER_LEVEL)) & MASK) as u32
}

// =============================================================================
// Node Definition
// =============================================================================

#[derive(Clone)]
enum Node<K, V> {
    Empty,
    Entry {
        hash: u64,
        key: K,
        value: V,
    },
    Bitmap {
        bitmap: u32,
        children: ReferenceCounter<[Child<K, V>]>,
    },
    Collision {
        hash: u64,
        entries: ReferenceCounter<[(K, V)]>,
    },
}

#[derive(Clone)]
enum Child<K, V> {
    Entry { hash: u64, key: K, value: V },
    Node(ReferenceCounter<Node<K, V>>),
}

impl<K: Clone, V: Clone> Child<K, V> {
    fn into_node(self) -> Node<K, V> {
        match self {
            Self::Entry { hash, key, value } => Node::Entry { hash, key, value },
            Self::Node(node) => (*node).clone(),
        }
    }
}

// =============================================================================
// PersistentHashMap Definition
// =============================================================================

/// A persistent hash map based on a HAMT.
///
/// Cloning is O(1). Updates return a new map and leave `self` untouched.
#[derive(Clone)]
pub(crate) struct PersistentHashMap<K, V> {
    root: ReferenceCounter<Node<K, V>>,
    length: usize,
}

impl<K, V> PersistentHashMap<K, V> {
    /// Creates a new empty map.
    pub(crate) fn new() -> Self {
        Self {
            root: ReferenceCounter::new(Node::Empty),
            length: 0,
        }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.length
    }
}

impl<K: Clone + Hash + Eq, V: Clone> PersistentHashMap<K, V> {
    /// Returns the value stored under `key`.
    pub(crate) fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = compute_hash(key);
        let mut node: &Node<K, V> = &self.root;
        let mut depth = 0;

        loop {
            match node {
                Node::Empty => return None,
                Node::Entry {
                    hash: entry_hash,
                    key: entry_key,
                    value,
                } => {
                    return (*entry_hash == hash && entry_key.borrow() == key).then_some(value);
                }
                Node::Bitmap { bitmap, children } => {
                    let bit = 1u32 << slot_of(hash, depth);
                    if bitmap & bit == 0 {
                        return None;
                    }
                    let position = (bitmap & (bit - 1)).count_ones() as usize;
                    match &children[position] {
                        Child::Entry {
                            hash: child_hash,
                            key: child_key,
                            value,
                        } => {
                            return (*child_hash == hash && child_key.borrow() == key)
                                .then_some(value);
                        }
                        Child::Node(subnode) => {
                            node = subnode.as_ref();
                            depth += 1;
                        }
                    }
                }
                Node::Collision { entries, .. } => {
                    return entries
                        .iter()
                        .find(|(entry_key, _)| entry_key.borrow() == key)
                        .map(|(_, value)| value);
                }
            }
        }
    }

    /// Inserts or replaces the value stored under `key`.
    #[must_use]
    pub(crate) fn insert(&self, key: K, value: V) -> Self {
        let hash = compute_hash(&key);
        let (root, added) = Self::insert_into_node(&self.root, hash, key, value, 0);
        Self {
            root: ReferenceCounter::new(root),
            length: if added { self.length + 1 } else { self.length },
        }
    }

    fn insert_into_node(
        node: &Node<K, V>,
        hash: u64,
        key: K,
        value: V,
        depth: usize,
    ) -> (Node<K, V>, bool) {
        match node {
            Node::Empty => (Node::Entry { hash, key, value }, true),
            Node::Entry {
                hash: existing_hash,
                key: existing_key,
                value: existing_value,
            } => {
                if *existing_hash == hash && *existing_key == key {
                    (Node::Entry { hash, key, value }, false)
                } else if *existing_hash == hash {
                    let entries = vec![(existing_key.clone(), existing_value.clone()), (key, value)];
                    (
                        Node::Collision {
                            hash,
                            entries: ReferenceCounter::from(entries),
                        },
                        true,
                    )
                } else {
                    let existing = Child::Entry {
                        hash: *existing_hash,
                        key: existing_key.clone(),
                        value: existing_value.clone(),
                    };
                    let incoming = Child::Entry { hash, key, value };
                    (Self::branch_of_two(*existing_hash, existing, hash, incoming, depth), true)
                }
            }
            Node::Bitmap { bitmap, children } => {
                Self::insert_into_bitmap(*bitmap, children, hash, key, value, depth)
            }
            Node::Collision {
                hash: collision_hash,
                entries,
            } => {
                if *collision_hash == hash {
                    let mut updated = entries.to_vec();
                    let added = match updated.iter_mut().find(|(entry_key, _)| *entry_key == key) {
                        Some(slot) => {
                            slot.1 = value;
                            false
                        }
                        None => {
                            updated.push((key, value));
                            true
                        }
                    };
                    (
                        Node::Collision {
                            hash,
                            entries: ReferenceCounter::from(updated),
                        },
                        added,
                    )
                } else {
                    let existing = Child::Node(ReferenceCounter::new(node.clone()));
                    let incoming = Child::Entry { hash, key, value };
                    (Self::branch_of_two(*collision_hash, existing, hash, incoming, depth), true)
                }
            }
        }
    }

    /// Builds the smallest subtrie holding two children with distinct hashes.
    fn branch_of_two(
        first_hash: u64,
        first: Child<K, V>,
        second_hash: u64,
        second: Child<K, V>,
        depth: usize,
    ) -> Node<K, V> {
        let first_slot = slot_of(first_hash, depth);
        let second_slot = slot_of(second_hash, depth);

        if first_slot == second_slot {
            let nested = Self::branch_of_two(first_hash, first, second_hash, second, depth + 1);
            return Node::Bitmap {
                bitmap: 1 << first_slot,
                children: ReferenceCounter::from(vec![Child::Node(ReferenceCounter::new(nested))]),
            };
        }

        let children = if first_slot < second_slot {
            vec![first, second]
        } else {
            vec![second, first]
        };
        Node::Bitmap {
            bitmap: (1 << first_slot) | (1 << second_slot),
            children: ReferenceCounter::from(children),
        }
    }

    fn insert_into_bitmap(
        bitmap: u32,
        children: &ReferenceCounter<[Child<K, V>]>,
        hash: u64,
        key: K,
        value: V,
        depth: usize,
    ) -> (Node<K, V>, bool) {
        let bit = 1u32 << slot_of(hash, depth);
        let position = (bitmap & (bit - 1)).count_ones() as usize;
        let mut updated = children.to_vec();

        if bitmap & bit == 0 {
            updated.insert(position, Child::Entry { hash, key, value });
            return (
                Node::Bitmap {
                    bitmap: bitmap | bit,
                    children: ReferenceCounter::from(updated),
                },
                true,
            );
        }

        let (child, added) = match &children[position] {
            Child::Entry {
                hash: child_hash,
                key: child_key,
                ..
            } if *child_hash == hash && *child_key == key => {
                (Child::Entry { hash, key, value }, false)
            }
            occupied => {
                let (subnode, added) =
                    Self::insert_into_node(&occupied.clone().into_node(), hash, key, value, depth + 1);
                (Child::Node(ReferenceCounter::new(subnode)), added)
            }
        };
        updated[position] = child;

        (
            Node::Bitmap {
                bitmap,
                children: ReferenceCounter::from(updated),
            },
            added,
        )
    }

    /// Removes `key`, returning `None` when it was absent.
    pub(crate) fn remove<Q>(&self, key: &Q) -> Option<Self>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = compute_hash(key);
        let root = Self::remove_from_node(&self.root, hash, key, 0)?;
        Some(Self {
            root: ReferenceCounter::new(root),
            length: self.length - 1,
        })
    }

    fn remove_from_node<Q>(node: &Node<K, V>, hash: u64, key: &Q, depth: usize) -> Option<Node<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match node {
            Node::Empty => None,
            Node::Entry {
                hash: entry_hash,
                key: entry_key,
                ..
            } => (*entry_hash == hash && entry_key.borrow() == key).then_some(Node::Empty),
            Node::Bitmap { bitmap, children } => {
                Self::remove_from_bitmap(*bitmap, children, hash, key, depth)
            }
            Node::Collision {
                hash: collision_hash,
                entries,
            } => {
                if *collision_hash != hash {
                    return None;
                }
                let found = entries
                    .iter()
                    .position(|(entry_key, _)| entry_key.borrow() == key)?;
                let mut remaining = entries.to_vec();
                remaining.remove(found);
                Some(match remaining.len() {
                    0 => Node::Empty,
                    1 => {
                        let (key, value) = remaining.remove(0);
                        Node::Entry { hash, key, value }
                    }
                    _ => Node::Collision {
                        hash,
                        entries: ReferenceCounter::from(remaining),
                    },
                })
            }
        }
    }

    fn remove_from_bitmap<Q>(
        bitmap: u32,
        children: &ReferenceCounter<[Child<K, V>]>,
        hash: u64,
        key: &Q,
        depth: usize,
    ) -> Option<Node<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let bit = 1u32 << slot_of(hash, depth);
        if bitmap & bit == 0 {
            return None;
        }
        let position = (bitmap & (bit - 1)).count_ones() as usize;

        let replacement = match &children[position] {
            Child::Entry {
                hash: child_hash,
                key: child_key,
                ..
            } => {
                if *child_hash != hash || child_key.borrow() != key {
                    return None;
                }
                None
            }
            Child::Node(subnode) => match Self::remove_from_node(subnode, hash, key, depth + 1)? {
                Node::Empty => None,
                Node::Entry { hash, key, value } => Some(Child::Entry { hash, key, value }),
                other => Some(Child::Node(ReferenceCounter::new(other))),
            },
        };

        let mut updated = children.to_vec();
        let bitmap = match replacement {
            Some(child) => {
                updated[position] = child;
                bitmap
            }
            None => {
                updated.remove(position);
                bitmap & !bit
            }
        };

        Some(Self::compact(bitmap, updated))
    }

    /// Collapses a branch that no longer needs to exist.
    fn compact(bitmap: u32, mut children: Vec<Child<K, V>>) -> Node<K, V> {
        match children.len() {
            0 => Node::Empty,
            1 if matches!(children[0], Child::Entry { .. }) => children.remove(0).into_node(),
            _ => Node::Bitmap {
                bitmap,
                children: ReferenceCounter::from(children),
            },
        }
    }

    /// Returns an iterator over all entries in unspecified order.
    pub(crate) fn iter(&self) -> PersistentHashMapIterator<'_, K, V> {
        let mut entries = Vec::with_capacity(self.length);
        Self::collect_entries(&self.root, &mut entries);
        PersistentHashMapIterator {
            entries: entries.into_iter(),
        }
    }

    fn collect_entries<'a>(node: &'a Node<K, V>, entries: &mut Vec<(&'a K, &'a V)>) {
        match node {
            Node::Empty => {}
            Node::Entry { key, value, .. } => entries.push((key, value)),
            Node::Bitmap { children, .. } => {
                for child in children.iter() {
                    match child {
                        Child::Entry { key, value, .. } => entries.push((key, value)),
                        Child::Node(subnode) => Self::collect_entries(subnode, entries),
                    }
                }
            }
            Node::Collision {
                entries: collision_entries,
                ..
            } => entries.extend(collision_entries.iter().map(|(key, value)| (key, value))),
        }
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// An iterator over the entries of a [`PersistentHashMap`].
pub(crate) struct PersistentHashMapIterator<'a, K, V> {
    entries: std::vec::IntoIter<(&'a K, &'a V)>,
}

impl<'a, K, V> Iterator for PersistentHashMapIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K, V> ExactSizeIterator for PersistentHashMapIterator<'_, K, V> {}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V> Default for PersistentHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Hash + Eq + fmt::Debug, V: Clone + fmt::Debug> fmt::Debug
    for PersistentHashMap<K, V>
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    /// Key whose hash is fully controlled, for collision coverage.
    #[derive(Clone, PartialEq, Eq, Debug)]
    struct FixedHash {
        hash: u64,
        label: &'static str,
    }

    impl Hash for FixedHash {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.hash.hash(state);
        }
    }

    #[rstest]
    fn test_new_is_empty() {
        let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
        assert_eq!(map.len(), 0);
        assert_eq!(map.get("missing"), None);
    }

    #[rstest]
    fn test_insert_and_get() {
        let map = PersistentHashMap::new()
            .insert("one".to_string(), 1)
            .insert("two".to_string(), 2);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("one"), Some(&1));
        assert_eq!(map.get("two"), Some(&2));
        assert_eq!(map.get("three"), None);
    }

    #[rstest]
    fn test_insert_replaces_without_growing() {
        let map = PersistentHashMap::new().insert(1, "a");
        let replaced = map.insert(1, "b");
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced.get(&1), Some(&"b"));
        assert_eq!(map.get(&1), Some(&"a"));
    }

    #[rstest]
    fn test_many_entries_survive_branching() {
        let map = (0..2_000).fold(PersistentHashMap::new(), |map, index| map.insert(index, index * 3));
        assert_eq!(map.len(), 2_000);
        for index in 0..2_000 {
            assert_eq!(map.get(&index), Some(&(index * 3)));
        }
    }

    #[rstest]
    fn test_remove_keeps_other_entries() {
        let map = (0..500).fold(PersistentHashMap::new(), |map, index| map.insert(index, index));
        let removed = (0..500)
            .filter(|index| index % 2 == 0)
            .fold(map.clone(), |map, index| map.remove(&index).unwrap());
        assert_eq!(removed.len(), 250);
        assert_eq!(map.len(), 500);
        for index in 0..500 {
            assert_eq!(removed.get(&index).is_some(), index % 2 == 1);
        }
    }

    #[rstest]
    fn test_remove_missing_returns_none() {
        let map = PersistentHashMap::new().insert(1, 1);
        assert!(map.remove(&2).is_none());
    }

    #[rstest]
    fn test_full_hash_collisions() {
        let first = FixedHash { hash: 7, label: "first" };
        let second = FixedHash { hash: 7, label: "second" };
        let third = FixedHash { hash: 7 | (1 << 40), label: "third" };

        let map = PersistentHashMap::new()
            .insert(first.clone(), 1)
            .insert(second.clone(), 2)
            .insert(third.clone(), 3);
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&first), Some(&1));
        assert_eq!(map.get(&second), Some(&2));
        assert_eq!(map.get(&third), Some(&3));

        let without_first = map.remove(&first).unwrap();
        assert_eq!(without_first.len(), 2);
        assert_eq!(without_first.get(&first), None);
        assert_eq!(without_first.get(&second), Some(&2));

        let only_third = without_first.remove(&second).unwrap();
        assert_eq!(only_third.len(), 1);
        assert_eq!(only_third.get(&third), Some(&3));
    }

    #[rstest]
    fn test_iter_visits_every_entry_once() {
        let map = (0..100).fold(PersistentHashMap::new(), |map, index| map.insert(index, ()));
        let mut keys: Vec<i32> = map.iter().map(|(key, ())| *key).collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..100).collect::<Vec<_>>());
    }
}
