//! Keyed collections: insertion-ordered and key-sorted dictionaries.

use std::cmp::Ordering;
use std::hash::Hash;

use crate::concurrent::{InsertionOrder, KeyOrder, NaturalOrder, OrderedCollection};
use crate::config::CollectionConfig;

/// A thread-safe dictionary that remembers insertion order.
///
/// Supports the full keyed and positional API: `add`, `insert`, `set`,
/// `set_at`, `remove`, `remove_at`, range operations and snapshots.
///
/// # Examples
///
/// ```rust
/// use snapmap::collections::ConcurrentDictionary;
///
/// let dictionary = ConcurrentDictionary::new();
/// dictionary.add("b", 2).unwrap();
/// dictionary.insert(0, "a", 1).unwrap();
/// dictionary.set("b", 20).unwrap();
///
/// assert_eq!(dictionary.to_vec(), vec![("a", 1), ("b", 20)]);
/// assert_eq!(dictionary.index_of("b"), Some(1));
/// ```
pub type ConcurrentDictionary<K, V> = OrderedCollection<K, V, InsertionOrder>;

/// A thread-safe dictionary kept sorted by key.
///
/// Positional insertion is not available; new keys go where the comparator
/// puts them.
///
/// # Examples
///
/// ```rust
/// use snapmap::collections::ConcurrentSortedDictionary;
///
/// let dictionary: ConcurrentSortedDictionary<i32, &str> = ConcurrentSortedDictionary::new();
/// dictionary.add(30, "thirty").unwrap();
/// dictionary.add(10, "ten").unwrap();
/// dictionary.add(20, "twenty").unwrap();
///
/// assert_eq!(dictionary.keys(), vec![10, 20, 30]);
/// ```
pub type ConcurrentSortedDictionary<K, V, F = NaturalOrder<K>> = OrderedCollection<K, V, KeyOrder<F>>;

impl<K, V, F> OrderedCollection<K, V, KeyOrder<F>>
where
    K: Clone + Hash + Eq,
    V: Clone,
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    /// Creates an empty dictionary sorted by `compare`.
    #[must_use]
    pub fn with_key_comparator(compare: F) -> Self {
        Self::with_policy(KeyOrder::by(compare), CollectionConfig::default())
    }

    /// Returns the first pair in key order.
    #[must_use]
    pub fn first(&self) -> Option<(K, V)> {
        self.get_at(0)
    }

    /// Returns the last pair in key order.
    #[must_use]
    pub fn last(&self) -> Option<(K, V)> {
        let snapshot = self.to_snapshot();
        snapshot
            .last()
            .map(|(key, value)| (key.clone(), value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_sorted_dictionary_orders_by_key() {
        let dictionary: ConcurrentSortedDictionary<i32, &str> = ConcurrentSortedDictionary::new();
        for key in [5, 1, 4, 2, 3] {
            dictionary.add(key, "value").unwrap();
        }
        assert_eq!(dictionary.keys(), vec![1, 2, 3, 4, 5]);
        assert_eq!(dictionary.first(), Some((1, "value")));
        assert_eq!(dictionary.last(), Some((5, "value")));
    }

    #[rstest]
    fn test_sorted_dictionary_set_keeps_order() {
        let dictionary: ConcurrentSortedDictionary<i32, i32> = ConcurrentSortedDictionary::new();
        dictionary.add_range([(3, 3), (1, 1), (2, 2)]).unwrap();
        assert_eq!(dictionary.set(2, 20), Ok(Some(2)));
        assert_eq!(dictionary.set(0, 0), Ok(None));
        assert_eq!(dictionary.to_vec(), vec![(0, 0), (1, 1), (2, 20), (3, 3)]);
    }

    #[rstest]
    fn test_custom_key_comparator() {
        let dictionary = ConcurrentSortedDictionary::with_key_comparator(|left: &String, right: &String| {
            left.len().cmp(&right.len()).then_with(|| left.cmp(right))
        });
        for key in ["ccc", "a", "bb", "aa"] {
            dictionary.add(key.to_string(), ()).unwrap();
        }
        assert_eq!(dictionary.keys(), vec!["a", "aa", "bb", "ccc"]);
    }

    #[rstest]
    fn test_dictionary_positional_api() {
        let dictionary = ConcurrentDictionary::new();
        dictionary.add("p", 1).unwrap();
        dictionary.add("r", 3).unwrap();
        dictionary.insert(1, "q", 2).unwrap();
        assert_eq!(dictionary.set_at(2, 30), Ok(3));
        assert_eq!(dictionary.get_at(2), Some(("r", 30)));
        assert_eq!(dictionary.values(), vec![1, 2, 30]);
    }
}
