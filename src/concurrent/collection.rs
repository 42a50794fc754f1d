//! The generic concurrent collection every user-facing type is built on.
//!
//! [`OrderedCollection`] combines a [`Coordinator`] with an
//! [`OrderingPolicy`]. All mutations go through one read/write transaction
//! each, publish a new [`Snapshot`] and fire exactly one [`ChangeEvent`].
//! All queries read the current snapshot without locking.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use super::coordinator::{Commit, Coordinator, Plan, Snapshot, SnapshotIntoIterator};
use super::notifier::{Change, ChangeEvent, ChangedItem, ListenerId};
use super::policy::{InsertionOrder, OrderingPolicy, PositionalPolicy, StableReplacePolicy};
use crate::config::CollectionConfig;
use crate::error::{CollectionError, Result};
use crate::persistent::{IndexedEntry, PersistentOrderedMap};

fn changed<K: Clone, V: Clone>(removed: &IndexedEntry<K, V>) -> ChangedItem<K, V> {
    ChangedItem::from_entry(removed.index, &removed.entry)
}

/// Items for `keys` as placed in `map`, in ascending index order.
fn placed_items<K, V>(map: &PersistentOrderedMap<K, V>, keys: &[K]) -> Vec<ChangedItem<K, V>>
where
    K: Clone + Hash + Eq,
    V: Clone,
{
    let mut items: Vec<ChangedItem<K, V>> = keys
        .iter()
        .filter_map(|key| map.get_item_and_index(key))
        .map(|placed| changed(&placed))
        .collect();
    items.sort_unstable_by_key(|item| item.index);
    items
}

fn check_unique<K, V>(snapshot: &Snapshot<K, V>, pairs: &[(K, V)]) -> Result<()>
where
    K: Clone + Hash + Eq,
    V: Clone,
{
    let mut seen = HashSet::with_capacity(pairs.len());
    for (key, _) in pairs {
        if snapshot.contains_key(key) || !seen.insert(key) {
            return Err(CollectionError::DuplicateKey);
        }
    }
    Ok(())
}

// =============================================================================
// OrderedCollection Definition
// =============================================================================

/// A thread-safe ordered map with snapshot reads and change notification.
///
/// `P` decides where new entries go. [`InsertionOrder`] gives a dictionary
/// that remembers insertion order and supports positional insertion;
/// [`KeyOrder`](super::KeyOrder) and [`ValueOrder`](super::ValueOrder) keep
/// entries sorted.
///
/// Share a collection between threads with `Arc`.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
/// use snapmap::collections::ConcurrentDictionary;
///
/// let dictionary = Arc::new(ConcurrentDictionary::new());
/// let handles: Vec<_> = (0..4)
///     .map(|thread_index| {
///         let dictionary = Arc::clone(&dictionary);
///         thread::spawn(move || {
///             for item in 0..100 {
///                 dictionary.add((thread_index, item), item).unwrap();
///             }
///         })
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// assert_eq!(dictionary.len(), 400);
/// ```
pub struct OrderedCollection<K, V, P = InsertionOrder> {
    coordinator: Coordinator<K, V>,
    policy: P,
}

impl<K, V, P> OrderedCollection<K, V, P>
where
    K: Clone + Hash + Eq,
    V: Clone,
    P: OrderingPolicy<K, V>,
{
    // =========================================================================
    // Construction
    // =========================================================================

    /// Creates an empty collection with the default policy and config.
    #[must_use]
    pub fn new() -> Self
    where
        P: Default,
    {
        Self::with_policy(P::default(), CollectionConfig::default())
    }

    /// Creates an empty collection with the default policy.
    #[must_use]
    pub fn with_config(config: CollectionConfig) -> Self
    where
        P: Default,
    {
        Self::with_policy(P::default(), config)
    }

    /// Creates an empty collection ordered by `policy`.
    #[must_use]
    pub fn with_policy(policy: P, config: CollectionConfig) -> Self {
        Self {
            coordinator: Coordinator::new(config),
            policy,
        }
    }

    /// Returns the coordinator that serializes this collection's writers.
    #[inline]
    #[must_use]
    pub const fn coordinator(&self) -> &Coordinator<K, V> {
        &self.coordinator
    }

    /// Returns the ordering policy.
    #[inline]
    #[must_use]
    pub const fn policy(&self) -> &P {
        &self.policy
    }

    // =========================================================================
    // Notification
    // =========================================================================

    /// Registers a callback invoked once per committed write, in commit
    /// order.
    pub fn subscribe_fn<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent<K, V>) + Send + Sync + 'static,
    {
        self.coordinator.notifier().subscribe_fn(callback)
    }

    /// Registers a channel receiving every committed change event.
    pub fn subscribe_channel(&self) -> (ListenerId, crossbeam_channel::Receiver<ChangeEvent<K, V>>) {
        self.coordinator.notifier().subscribe_channel()
    }

    /// Removes a listener.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.coordinator.notifier().unsubscribe(id)
    }

    /// Installs the consumer of the coalesced view-changed signal.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::WorkerSpawn`] if the worker thread cannot
    /// be started.
    pub fn set_refresh_consumer<F>(&self, consumer: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.coordinator.notifier().set_refresh_consumer(consumer)
    }

    /// Delivers a pending view-changed signal immediately.
    pub fn flush_refresh(&self) {
        self.coordinator.notifier().flush_refresh();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns the current snapshot.
    #[must_use]
    pub fn to_snapshot(&self) -> Snapshot<K, V> {
        Snapshot::clone(&self.coordinator.snapshot())
    }

    /// Returns the version of the current snapshot.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.coordinator.snapshot().version()
    }

    /// Runs `read` against the current snapshot while writers are held off.
    ///
    /// `read` must not write to this collection.
    pub fn read_locked<R>(&self, read: impl FnOnce(&Snapshot<K, V>) -> R) -> R {
        self.coordinator.read_locked(read)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.coordinator.snapshot().len()
    }

    /// Returns `true` if the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coordinator.snapshot().is_empty()
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.coordinator.snapshot().contains_key(key)
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::KeyNotFound`] if `key` is absent.
    pub fn get<Q>(&self, key: &Q) -> Result<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.try_get_value(key).ok_or(CollectionError::KeyNotFound)
    }

    /// Returns the value stored under `key`, if any.
    #[must_use]
    pub fn try_get_value<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.coordinator.snapshot().get(key).cloned()
    }

    /// Returns the pair at `index`.
    #[must_use]
    pub fn get_at(&self, index: usize) -> Option<(K, V)> {
        self.coordinator
            .snapshot()
            .get_at(index)
            .map(|(key, value)| (key.clone(), value.clone()))
    }

    /// Returns the position of `key`.
    #[must_use]
    pub fn index_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.coordinator.snapshot().index_of(key)
    }

    /// Returns the position of the first pair matching `predicate`.
    pub fn position_where(&self, mut predicate: impl FnMut(&K, &V) -> bool) -> Option<usize> {
        self.coordinator
            .snapshot()
            .iter()
            .position(|(key, value)| predicate(key, value))
    }

    /// Returns the keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.coordinator.snapshot().keys().cloned().collect()
    }

    /// Returns the values in order.
    #[must_use]
    pub fn values(&self) -> Vec<V> {
        self.coordinator.snapshot().values().cloned().collect()
    }

    /// Returns the pairs in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<(K, V)> {
        self.coordinator.snapshot().to_vec()
    }

    /// Iterates over the snapshot current at the time of the call.
    ///
    /// Writes that happen during iteration are not observed.
    #[must_use]
    pub fn iter(&self) -> SnapshotIntoIterator<K, V> {
        self.to_snapshot().into_iter()
    }

    // =========================================================================
    // Additions
    // =========================================================================

    /// Adds `(key, value)` where the policy places it and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::DuplicateKey`] if `key` is present.
    pub fn add(&self, key: K, value: V) -> Result<usize> {
        self.coordinator.transact(
            |snapshot| {
                if snapshot.contains_key(&key) {
                    return Err(CollectionError::DuplicateKey);
                }
                Ok(Plan::Proceed((key, value)))
            },
            |map, (key, value)| self.place(map, key, value),
        )
    }

    /// Adds `(key, value)` unless `key` is present.
    ///
    /// Returns `Ok(true)` if added and `Ok(false)` if `key` was present.
    ///
    /// # Errors
    ///
    /// Propagates failures to place the pair, such as
    /// [`CollectionError::KeySpaceExhausted`]; nothing is added then.
    pub fn try_add(&self, key: K, value: V) -> Result<bool> {
        self.coordinator.transact(
            |snapshot| {
                Ok(if snapshot.contains_key(&key) {
                    Plan::Skip(false)
                } else {
                    Plan::Proceed((key, value))
                })
            },
            |map, (key, value)| {
                let Commit { map, change, .. } = self.place(map, key, value)?;
                Ok(Commit {
                    map,
                    change,
                    output: true,
                })
            },
        )
    }

    /// Returns the value under `key`, adding `value` first if absent.
    ///
    /// # Errors
    ///
    /// Propagates errors from adding the pair.
    pub fn retrieve_or_add(&self, key: K, value: V) -> Result<V> {
        self.retrieve_or_add_with(key, |_| value)
    }

    /// Returns the value under `key`, adding `create(&key)` first if absent.
    ///
    /// `create` runs at most once, while other writers are held off.
    ///
    /// # Errors
    ///
    /// Propagates errors from adding the pair.
    pub fn retrieve_or_add_with(&self, key: K, create: impl FnOnce(&K) -> V) -> Result<V> {
        self.coordinator.transact(
            |snapshot| {
                Ok(match snapshot.get(&key) {
                    Some(value) => Plan::Skip(value.clone()),
                    None => Plan::Proceed(key),
                })
            },
            |map, key| {
                let value = create(&key);
                let Commit { map, change, .. } = self.place(map, key, value.clone())?;
                Ok(Commit {
                    map,
                    change,
                    output: value,
                })
            },
        )
    }

    /// Adds every pair, each where the policy places it, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::DuplicateKey`] if any key is present or
    /// repeats; nothing is added in that case.
    pub fn add_range<I>(&self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let pairs: Vec<(K, V)> = pairs.into_iter().collect();
        self.coordinator.transact(
            |snapshot| {
                if pairs.is_empty() {
                    return Ok(Plan::Skip(()));
                }
                check_unique(snapshot, &pairs)?;
                Ok(Plan::Proceed(pairs))
            },
            |map, pairs| self.add_all(map, pairs, ()),
        )
    }

    /// Adds the pairs whose keys are absent and returns how many were added.
    ///
    /// Of repeated keys within `pairs` the first occurrence wins.
    ///
    /// # Errors
    ///
    /// Propagates failures to place the pairs, such as
    /// [`CollectionError::KeySpaceExhausted`]; nothing is added then.
    pub fn try_add_range<I>(&self, pairs: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let pairs: Vec<(K, V)> = pairs.into_iter().collect();
        self.coordinator.transact(
            |snapshot| {
                let mut seen = HashSet::new();
                let fresh: Vec<(K, V)> = pairs
                    .into_iter()
                    .filter(|(key, _)| !snapshot.contains_key(key) && seen.insert(key.clone()))
                    .collect();
                Ok(if fresh.is_empty() {
                    Plan::Skip(0)
                } else {
                    Plan::Proceed(fresh)
                })
            },
            |map, fresh| {
                let count = fresh.len();
                self.add_all(map, fresh, count)
            },
        )
    }

    // =========================================================================
    // Removals
    // =========================================================================

    /// Removes `key`. Returns `true` if it was present.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        // Neither phase can fail.
        self.coordinator
            .transact(
                |snapshot| {
                    Ok(match snapshot.remove(key) {
                        Some(removal) => Plan::Proceed(removal),
                        None => Plan::Skip(false),
                    })
                },
                |_, (map, removed)| {
                    Ok(Commit {
                        map,
                        change: Change::removed(vec![changed(&removed)]),
                        output: true,
                    })
                },
            )
            .unwrap_or(false)
    }

    /// Removes every present key of `keys` in one transaction and returns
    /// how many were removed.
    pub fn remove_keys<'a, Q, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a Q>,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
    {
        let keys: Vec<&Q> = keys.into_iter().collect();
        // Neither phase can fail.
        self.coordinator
            .transact(
                |snapshot| {
                    let (map, removed) = snapshot.remove_keys(keys.iter().copied());
                    Ok(if removed.is_empty() {
                        Plan::Skip(0)
                    } else {
                        Plan::Proceed((map, removed))
                    })
                },
                |_, (map, removed)| {
                    Ok(Commit {
                        map,
                        output: removed.len(),
                        change: Change::removed(removed.iter().map(changed).collect()),
                    })
                },
            )
            .unwrap_or(0)
    }

    /// Removes the pair at `index` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`] if `index >= len`.
    pub fn remove_at(&self, index: usize) -> Result<(K, V)> {
        self.coordinator.transact(
            |snapshot| {
                let len = snapshot.len();
                if index >= len {
                    return Err(CollectionError::IndexOutOfRange { index, len });
                }
                Ok(Plan::Proceed(()))
            },
            |map, ()| self.remove_index(map, index),
        )
    }

    /// Removes the first pair matching `predicate` and returns it.
    pub fn remove_first_where(&self, mut predicate: impl FnMut(&K, &V) -> bool) -> Option<(K, V)> {
        self.remove_located(|snapshot| snapshot.iter().position(|(key, value)| predicate(key, value)))
    }

    /// Removes the pair at the position `locate` finds in the current
    /// snapshot, if any, and returns it.
    pub fn remove_located(&self, locate: impl FnOnce(&Snapshot<K, V>) -> Option<usize>) -> Option<(K, V)> {
        self.coordinator
            .transact(
                |snapshot| {
                    Ok(match locate(snapshot) {
                        Some(index) if index < snapshot.len() => Plan::Proceed(index),
                        _ => Plan::Skip(None),
                    })
                },
                |map, index| {
                    let Commit { map, change, output } = self.remove_index(map, index)?;
                    Ok(Commit {
                        map,
                        change,
                        output: Some(output),
                    })
                },
            )
            .ok()
            .flatten()
    }

    /// Removes `[index, index + count)`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::RangeOutOfBounds`] if the range does not fit.
    pub fn remove_range(&self, index: usize, count: usize) -> Result<()> {
        self.coordinator.transact(
            |snapshot| {
                let len = snapshot.len();
                if index.checked_add(count).is_none_or(|end| end > len) {
                    return Err(CollectionError::RangeOutOfBounds { index, count, len });
                }
                Ok(if count == 0 {
                    Plan::Skip(())
                } else {
                    Plan::Proceed(())
                })
            },
            |map, ()| {
                let (map, removed) = map.remove_range(index, count)?;
                let items = (index..)
                    .zip(&removed)
                    .map(|(position, entry)| ChangedItem::from_entry(position, entry))
                    .collect();
                Ok(Commit {
                    map,
                    change: Change::removed(items),
                    output: (),
                })
            },
        )
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.coordinator
            .transact(
                |snapshot| {
                    Ok(if snapshot.is_empty() {
                        Plan::Skip(())
                    } else {
                        Plan::Proceed(())
                    })
                },
                |_, ()| {
                    Ok(Commit {
                        map: PersistentOrderedMap::new(),
                        change: Change::reset(),
                        output: (),
                    })
                },
            )
            .ok();
    }

    // =========================================================================
    // Write-phase helpers
    // =========================================================================

    fn place(&self, map: &PersistentOrderedMap<K, V>, key: K, value: V) -> Result<Commit<K, V, usize>> {
        let index = self.policy.placement(map, &key, &value);
        let item = ChangedItem {
            index,
            key: key.clone(),
            value: value.clone(),
        };
        Ok(Commit {
            map: map.insert(index, key, value)?,
            change: Change::added(vec![item]),
            output: index,
        })
    }

    fn add_all<R>(&self, map: &PersistentOrderedMap<K, V>, pairs: Vec<(K, V)>, output: R) -> Result<Commit<K, V, R>> {
        let keys: Vec<K> = pairs.iter().map(|(key, _)| key.clone()).collect();
        let map = self.policy.place_all(map, pairs)?;
        let items = placed_items(&map, &keys);
        Ok(Commit {
            map,
            change: Change::added(items),
            output,
        })
    }

    fn remove_index(&self, map: &PersistentOrderedMap<K, V>, index: usize) -> Result<Commit<K, V, (K, V)>> {
        let (map, removed) = map.remove_at(index)?;
        let pair = (removed.entry.key().clone(), removed.entry.value().clone());
        Ok(Commit {
            map,
            change: Change::removed(vec![changed(&removed)]),
            output: pair,
        })
    }

    fn replace_index(&self, map: &PersistentOrderedMap<K, V>, index: usize, value: V) -> Result<Commit<K, V, V>> {
        let (map, old) = map.replace_at(index, value.clone())?;
        let new_item = ChangedItem {
            index,
            key: old.entry.key().clone(),
            value,
        };
        Ok(Commit {
            map,
            output: old.entry.value().clone(),
            change: Change::replaced(changed(&old), new_item),
        })
    }
}

// =============================================================================
// Positional Operations
// =============================================================================

impl<K, V, P> OrderedCollection<K, V, P>
where
    K: Clone + Hash + Eq,
    V: Clone,
    P: PositionalPolicy<K, V>,
{
    /// Inserts `(key, value)` at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`] if `index > len` and
    /// [`CollectionError::DuplicateKey`] if `key` is present.
    pub fn insert(&self, index: usize, key: K, value: V) -> Result<()> {
        self.coordinator.transact(
            |snapshot| {
                let len = snapshot.len();
                if index > len {
                    return Err(CollectionError::IndexOutOfRange { index, len });
                }
                if snapshot.contains_key(&key) {
                    return Err(CollectionError::DuplicateKey);
                }
                Ok(Plan::Proceed((key, value)))
            },
            |map, (key, value)| {
                let item = ChangedItem {
                    index,
                    key: key.clone(),
                    value: value.clone(),
                };
                Ok(Commit {
                    map: map.insert(index, key, value)?,
                    change: Change::added(vec![item]),
                    output: (),
                })
            },
        )
    }

    /// Inserts `pairs` at `index`, in order, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`] if `index > len` and
    /// [`CollectionError::DuplicateKey`] if any key is present or repeats.
    pub fn insert_range<I>(&self, index: usize, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let pairs: Vec<(K, V)> = pairs.into_iter().collect();
        self.coordinator.transact(
            |snapshot| {
                let len = snapshot.len();
                if index > len {
                    return Err(CollectionError::IndexOutOfRange { index, len });
                }
                if pairs.is_empty() {
                    return Ok(Plan::Skip(()));
                }
                check_unique(snapshot, &pairs)?;
                Ok(Plan::Proceed(pairs))
            },
            |map, pairs| {
                let items = (index..)
                    .zip(&pairs)
                    .map(|(position, (key, value))| ChangedItem {
                        index: position,
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect();
                Ok(Commit {
                    map: map.insert_range(index, pairs)?,
                    change: Change::added(items),
                    output: (),
                })
            },
        )
    }

    /// Replaces the value at `index` and returns the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`] if `index >= len`.
    pub fn set_at(&self, index: usize, value: V) -> Result<V> {
        self.coordinator.transact(
            |snapshot| {
                let len = snapshot.len();
                if index >= len {
                    return Err(CollectionError::IndexOutOfRange { index, len });
                }
                Ok(Plan::Proceed(value))
            },
            |map, value| self.replace_index(map, index, value),
        )
    }
}

// =============================================================================
// Keyed Replacement
// =============================================================================

impl<K, V, P> OrderedCollection<K, V, P>
where
    K: Clone + Hash + Eq,
    V: Clone,
    P: StableReplacePolicy<K, V>,
{
    /// Stores `value` under `key`, replacing in place or adding where the
    /// policy places it. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Propagates errors from adding the pair.
    pub fn set(&self, key: K, value: V) -> Result<Option<V>> {
        self.coordinator.transact(
            |snapshot| Ok(Plan::Proceed((snapshot.index_of(&key), key, value))),
            |map, (index, key, value)| match index {
                Some(index) => {
                    let Commit { map, change, output } = self.replace_index(map, index, value)?;
                    Ok(Commit {
                        map,
                        change,
                        output: Some(output),
                    })
                }
                None => {
                    let Commit { map, change, .. } = self.place(map, key, value)?;
                    Ok(Commit {
                        map,
                        change,
                        output: None,
                    })
                }
            },
        )
    }

    /// Replaces the value under `key` in place and returns the previous one,
    /// or `None` if `key` is absent.
    pub fn replace<Q>(&self, key: &Q, value: V) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.coordinator
            .transact(
                |snapshot| {
                    Ok(match snapshot.index_of(key) {
                        Some(index) => Plan::Proceed((index, value)),
                        None => Plan::Skip(None),
                    })
                },
                |map, (index, value)| {
                    let Commit { map, change, output } = self.replace_index(map, index, value)?;
                    Ok(Commit {
                        map,
                        change,
                        output: Some(output),
                    })
                },
            )
            .ok()
            .flatten()
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V, P> Default for OrderedCollection<K, V, P>
where
    K: Clone + Hash + Eq,
    V: Clone,
    P: OrderingPolicy<K, V> + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, P> fmt::Debug for OrderedCollection<K, V, P>
where
    P: fmt::Debug,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("OrderedCollection")
            .field("coordinator", &self.coordinator)
            .field("policy", &self.policy)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
