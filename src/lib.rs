//! # snapmap
//!
//! Concurrent, order-preserving collections built on persistent data
//! structures.
//!
//! ## Overview
//!
//! Every collection keeps its contents in a [`PersistentOrderedMap`]: a hash
//! dictionary for key lookup paired with a balanced sequence for positional
//! access. Readers load the current immutable [`Snapshot`] without taking a
//! lock; writers serialize through an upgradeable read lock, build the next
//! map by structural sharing and publish it with one atomic swap.
//!
//! - **Persistent layer**: [`SortKey`] positions, [`PersistentSequence`],
//!   [`PersistentOrderedMap`] and [`IndexResolver`]
//! - **Concurrency layer**: [`Coordinator`] transactions, [`ChangeNotifier`]
//!   events and the coalesced view-changed signal
//! - **Collections**: dictionaries, lists, sorted collections and sets
//!
//! ## Feature Flags
//!
//! - `serde`: `Serialize` for snapshots, `Serialize`/`Deserialize` for
//!   persistent maps and configuration
//!
//! ## Example
//!
//! ```rust
//! use snapmap::prelude::*;
//!
//! let dictionary = ConcurrentDictionary::new();
//! let (_, events) = dictionary.subscribe_channel();
//!
//! dictionary.add_range([("a", 1), ("b", 2)]).unwrap();
//! dictionary.insert(0, "z", 26).unwrap();
//!
//! assert_eq!(dictionary.keys(), vec!["z", "a", "b"]);
//! assert_eq!(events.try_iter().count(), 2);
//! ```
//!
//! [`PersistentOrderedMap`]: persistent::PersistentOrderedMap
//! [`PersistentSequence`]: persistent::PersistentSequence
//! [`SortKey`]: persistent::SortKey
//! [`IndexResolver`]: persistent::IndexResolver
//! [`Snapshot`]: concurrent::Snapshot
//! [`Coordinator`]: concurrent::Coordinator
//! [`ChangeNotifier`]: concurrent::ChangeNotifier

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// Re-exports the collection types, the configuration and the error type.
///
/// # Usage
///
/// ```rust
/// use snapmap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::collections::*;
    pub use crate::concurrent::{ChangeAction, ChangeEvent, ChangedItem, ListenerId, Snapshot};
    pub use crate::{CollectionConfig, CollectionError, Result};
}

pub mod collections;
pub mod concurrent;
pub mod persistent;

mod config;
mod error;

pub use config::{CollectionConfig, DEFAULT_MAX_KEY_BITS, DEFAULT_REFRESH_WINDOW};
pub use error::{CollectionError, Result};
