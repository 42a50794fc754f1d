//! User-facing concurrent collections.
//!
//! Every type here is an [`OrderedCollection`](crate::concurrent::OrderedCollection)
//! with a particular ordering policy and key scheme; they differ only in
//! which operations they expose:
//!
//! | Type                           | Order            | Keys            |
//! |--------------------------------|------------------|-----------------|
//! | [`ConcurrentDictionary`]       | insertion        | caller's keys   |
//! | [`ConcurrentSortedDictionary`] | key comparator   | caller's keys   |
//! | [`ConcurrentList`]             | positional       | [`ItemId`]      |
//! | [`ConcurrentSortedCollection`] | value comparator | [`ItemId`]      |
//! | [`ConcurrentHashSet`]          | insertion        | the values      |

mod dictionary;
mod hash_set;
mod list;
mod sorted_collection;

pub use dictionary::ConcurrentDictionary;
pub use dictionary::ConcurrentSortedDictionary;
pub use hash_set::ConcurrentHashSet;
pub use list::ConcurrentList;
pub use list::ItemId;
pub use sorted_collection::ConcurrentSortedCollection;
