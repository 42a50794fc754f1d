//! Read/write coordination and snapshot publishing.
//!
//! A [`Coordinator`] owns the current [`Snapshot`] pointer. Readers load it
//! without locking; writers run a transaction:
//!
//! 1. take upgradeable read access (other writers wait, readers proceed)
//! 2. run the read phase against the current snapshot
//! 3. stop there if the read phase decided nothing changes
//! 4. upgrade to write access and build the next map
//! 5. publish it with one atomic pointer swap and queue the change event
//! 6. release the lock and deliver queued events
//!
//! An error or panic in either phase leaves the published snapshot as it
//! was; lock guards are released on every path.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, trace};

use super::notifier::{Change, ChangeNotifier};
use crate::config::CollectionConfig;
use crate::error::Result;
use crate::persistent::{Entry, PersistentOrderedMap, PersistentSequenceIntoIterator};

// =============================================================================
// Snapshot
// =============================================================================

/// An immutable, versioned view of a collection.
///
/// A snapshot never changes after it is taken, no matter what writers do
/// afterwards. Cloning is O(1). It dereferences to the underlying
/// [`PersistentOrderedMap`] for queries.
///
/// # Examples
///
/// ```rust
/// use snapmap::collections::ConcurrentDictionary;
///
/// let dictionary = ConcurrentDictionary::new();
/// dictionary.add("a", 1).unwrap();
/// let snapshot = dictionary.to_snapshot();
/// dictionary.add("b", 2).unwrap();
///
/// assert_eq!(snapshot.to_vec(), vec![("a", 1)]);
/// assert_eq!(dictionary.len(), 2);
/// ```
pub struct Snapshot<K, V> {
    map: PersistentOrderedMap<K, V>,
    version: u64,
}

impl<K, V> Snapshot<K, V> {
    /// Returns the commit version that published this snapshot.
    ///
    /// The empty snapshot created with a collection has version 0.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the underlying persistent map.
    #[inline]
    #[must_use]
    pub const fn map(&self) -> &PersistentOrderedMap<K, V> {
        &self.map
    }
}

impl<K: Clone, V> Clone for Snapshot<K, V> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
            version: self.version,
        }
    }
}

impl<K, V> Deref for Snapshot<K, V> {
    type Target = PersistentOrderedMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Snapshot<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Snapshot")
            .field("version", &self.version)
            .field("map", &self.map)
            .finish()
    }
}

/// An owning iterator over the pairs of a [`Snapshot`].
pub struct SnapshotIntoIterator<K, V> {
    entries: PersistentSequenceIntoIterator<Arc<Entry<K, V>>>,
}

impl<K: Clone, V: Clone> Iterator for SnapshotIntoIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries
            .next()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K: Clone, V: Clone> ExactSizeIterator for SnapshotIntoIterator<K, V> {}

impl<K: Clone, V: Clone> IntoIterator for Snapshot<K, V> {
    type Item = (K, V);
    type IntoIter = SnapshotIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        SnapshotIntoIterator {
            entries: self.map.sequence().clone().into_iter(),
        }
    }
}

#[cfg(feature = "serde")]
impl<K: serde::Serialize, V: serde::Serialize> serde::Serialize for Snapshot<K, V> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serde::Serialize::serialize(&self.map, serializer)
    }
}

// =============================================================================
// Transactions
// =============================================================================

/// Outcome of a transaction's read phase.
pub(crate) enum Plan<P, R> {
    /// Nothing changes; the transaction returns this output without
    /// upgrading.
    Skip(R),
    /// Upgrade to write access and run the write phase with this plan.
    Proceed(P),
}

/// Outcome of a transaction's write phase.
pub(crate) struct Commit<K, V, R> {
    pub(crate) map: PersistentOrderedMap<K, V>,
    pub(crate) change: Change<K, V>,
    pub(crate) output: R,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Serializes writers and publishes snapshots for lock-free readers.
pub struct Coordinator<K, V> {
    gate: RwLock<()>,
    current: ArcSwap<Snapshot<K, V>>,
    notifier: ChangeNotifier<K, V>,
    config: CollectionConfig,
}

impl<K, V> Coordinator<K, V>
where
    K: Clone + std::hash::Hash + Eq,
    V: Clone,
{
    /// Creates a coordinator holding an empty snapshot.
    #[must_use]
    pub fn new(config: CollectionConfig) -> Self {
        Self {
            gate: RwLock::new(()),
            current: ArcSwap::from_pointee(Snapshot {
                map: PersistentOrderedMap::new(),
                version: 0,
            }),
            notifier: ChangeNotifier::new(config.label(), config.refresh_window),
            config,
        }
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Returns the change notifier.
    #[inline]
    #[must_use]
    pub const fn notifier(&self) -> &ChangeNotifier<K, V> {
        &self.notifier
    }

    /// Returns the current snapshot without taking any lock.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot<K, V>> {
        self.current.load_full()
    }

    /// Runs `read` against the current snapshot while no writer can publish.
    ///
    /// Must not be called from a thread that is inside a write transaction
    /// on the same coordinator, and `read` must not write to it.
    pub fn read_locked<R>(&self, read: impl FnOnce(&Snapshot<K, V>) -> R) -> R {
        let _shared = self.gate.read();
        read(&self.current.load())
    }

    /// Runs a read-then-write transaction.
    ///
    /// `read` sees the current snapshot and decides whether anything changes.
    /// `write` receives the same map and the read phase's plan and returns
    /// the next map with a description of the change. Errors from either
    /// phase are returned unchanged and nothing is published.
    pub(crate) fn transact<P, R>(
        &self,
        read: impl FnOnce(&Snapshot<K, V>) -> Result<Plan<P, R>>,
        write: impl FnOnce(&PersistentOrderedMap<K, V>, P) -> Result<Commit<K, V, R>>,
    ) -> Result<R> {
        let upgradable = self.gate.upgradable_read();
        let current = self.current.load_full();

        let plan = match read(&current)? {
            Plan::Skip(output) => return Ok(output),
            Plan::Proceed(plan) => plan,
        };

        let exclusive = RwLockUpgradableReadGuard::upgrade(upgradable);
        let Commit {
            map,
            change,
            output,
        } = write(&current.map, plan)?;

        let map = if self.config.should_renumber(map.deepest_key_bits()) {
            debug!(
                collection = self.config.label(),
                key_bits = map.deepest_key_bits(),
                len = map.len(),
                "renumbering sort keys"
            );
            map.renumbered()
        } else {
            map
        };

        let version = current.version + 1;
        trace!(
            collection = self.config.label(),
            version,
            action = ?change.action(),
            items = change.item_count(),
            len = map.len(),
            "committed"
        );
        self.current.store(Arc::new(Snapshot { map, version }));
        self.notifier.enqueue(change.into_event(version));
        drop(exclusive);

        self.notifier.deliver();
        Ok(output)
    }
}

impl<K, V> fmt::Debug for Coordinator<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Coordinator")
            .field("config", &self.config)
            .field("version", &self.current.load().version)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
