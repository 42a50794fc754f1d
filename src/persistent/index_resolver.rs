//! Binary-search resolution of sort keys to positions.
//!
//! The sequence half of a [`PersistentOrderedMap`](super::PersistentOrderedMap)
//! is always sorted by [`SortKey`], so a node found through the dictionary
//! can be located in the sequence by comparing sort keys only.

use super::ReferenceCounter;
use super::ordered_map::Entry;
use super::sequence::PersistentSequence;
use super::sort_key::SortKey;

type EntrySequence<K, V> = PersistentSequence<ReferenceCounter<Entry<K, V>>>;

/// Locates entries in a sort-key-ordered sequence.
pub struct IndexResolver;

impl IndexResolver {
    /// Returns the position of the entry carrying `sort_key`.
    #[must_use]
    pub fn position_of<K, V>(sequence: &EntrySequence<K, V>, sort_key: &SortKey) -> Option<usize> {
        sequence
            .binary_search_by(|entry| entry.sort_key().cmp(sort_key))
            .ok()
    }

    /// Returns the position of `entry`.
    ///
    /// The entry found at that position must be the very same node; a
    /// mismatch means the dictionary and the sequence disagree.
    #[must_use]
    pub fn resolve<K, V>(
        sequence: &EntrySequence<K, V>,
        entry: &ReferenceCounter<Entry<K, V>>,
    ) -> Option<usize> {
        let index = Self::position_of(sequence, entry.sort_key());
        debug_assert!(
            index
                .and_then(|index| sequence.get(index))
                .is_some_and(|found| ReferenceCounter::ptr_eq(found, entry)),
            "dictionary entry is missing from the sequence"
        );
        index
    }

    /// Returns the first position whose entry does not satisfy `goes_before`.
    ///
    /// `goes_before` must be monotone over the sequence. Sorted collections
    /// pass "compares less than or equal to the new element", which places
    /// the new element after every equal one.
    pub fn insertion_point<K, V, P>(sequence: &EntrySequence<K, V>, mut goes_before: P) -> usize
    where
        P: FnMut(&Entry<K, V>) -> bool,
    {
        sequence.partition_point(|entry| goes_before(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistent::PersistentOrderedMap;
    use rstest::rstest;

    fn sample() -> PersistentOrderedMap<&'static str, i32> {
        PersistentOrderedMap::new()
            .add_range([("a", 1), ("b", 2), ("c", 2), ("d", 4)])
            .unwrap()
    }

    #[rstest]
    #[case("a", 0)]
    #[case("c", 2)]
    #[case("d", 3)]
    fn test_resolve_finds_entry(#[case] key: &str, #[case] expected: usize) {
        let map = sample();
        let entry = map.get_entry(key).unwrap();
        assert_eq!(IndexResolver::resolve(map.sequence(), entry), Some(expected));
    }

    #[rstest]
    fn test_position_of_unknown_key() {
        let map = sample();
        let missing = SortKey::from_integer(100);
        assert_eq!(IndexResolver::position_of(map.sequence(), &missing), None);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(2, 3)]
    #[case(3, 3)]
    #[case(9, 4)]
    fn test_insertion_point_after_equal_values(#[case] value: i32, #[case] expected: usize) {
        let map = sample();
        let index = IndexResolver::insertion_point(map.sequence(), |entry| *entry.value() <= value);
        assert_eq!(index, expected);
    }
}
