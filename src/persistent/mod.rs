//! Persistent (immutable) data structures behind the ordered collections.
//!
//! This module provides the structures a snapshot is made of. Every update
//! returns a new version and shares all untouched nodes with the old one:
//!
//! - [`PersistentOrderedMap`]: key lookup plus positional order
//! - [`PersistentSequence`]: size-augmented AVL tree addressed by position
//! - [`SortKey`] / [`SortKeySpace`]: dense keys that place new entries
//!   between existing ones without renumbering
//! - [`IndexResolver`]: binary search from a sort key to a position
//!
//! The key lookup half is a HAMT that stays internal to the crate.
//!
//! # Structural Sharing
//!
//! ```rust
//! use snapmap::persistent::PersistentOrderedMap;
//!
//! let map = PersistentOrderedMap::new()
//!     .add("one", 1)
//!     .unwrap()
//!     .add("three", 3)
//!     .unwrap();
//! let inserted = map.insert(1, "two", 2).unwrap();
//!
//! // The original version is preserved
//! assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["one", "three"]);
//! assert_eq!(
//!     inserted.keys().copied().collect::<Vec<_>>(),
//!     vec!["one", "two", "three"]
//! );
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer shared between versions.
///
/// Snapshots cross threads, so this is always `std::sync::Arc`.
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

mod hashmap;
mod index_resolver;
mod ordered_map;
mod sequence;
mod sort_key;

pub use index_resolver::IndexResolver;
pub use ordered_map::Entry;
pub use ordered_map::IndexedEntry;
pub use ordered_map::PersistentOrderedMap;
pub use ordered_map::PersistentOrderedMapIterator;
pub use sequence::PersistentSequence;
pub use sequence::PersistentSequenceIntoIterator;
pub use sequence::PersistentSequenceIterator;
pub use sort_key::SortKey;
pub use sort_key::SortKeySpace;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod reference_counter_tests {
    use super::ReferenceCounter;
    use rstest::rstest;

    #[rstest]
    fn test_reference_counter_is_send_and_sync() {
        static_assertions::assert_impl_all!(ReferenceCounter<i32>: Send, Sync);
    }

    #[rstest]
    fn test_reference_counter_strong_count() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
        let reference_counter_clone = reference_counter.clone();
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 2);
        drop(reference_counter_clone);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
    }
}
