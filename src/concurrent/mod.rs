//! Thread-safe collections over published persistent snapshots.
//!
//! This module provides the machinery shared by every collection type:
//!
//! - [`Coordinator`]: serializes writers, publishes [`Snapshot`]s that
//!   readers load without locking
//! - [`ChangeNotifier`]: itemized [`ChangeEvent`]s in commit order and a
//!   coalesced view-changed signal through [`RefreshThrottle`]
//! - [`OrderingPolicy`]: where new entries go ([`InsertionOrder`],
//!   [`KeyOrder`], [`ValueOrder`])
//! - [`OrderedCollection`]: the generic collection built from the above
//!
//! # Examples
//!
//! ```rust
//! use snapmap::concurrent::{ChangeAction, OrderedCollection, InsertionOrder};
//!
//! let collection: OrderedCollection<&str, i32, InsertionOrder> = OrderedCollection::new();
//! let (_, events) = collection.subscribe_channel();
//!
//! collection.add("a", 1).unwrap();
//! collection.set_at(0, 10).unwrap();
//!
//! let actions: Vec<_> = events.try_iter().map(|event| event.action).collect();
//! assert_eq!(actions, vec![ChangeAction::Add, ChangeAction::Replace]);
//! ```

mod collection;
mod coordinator;
mod notifier;
mod policy;

pub use collection::OrderedCollection;
pub use coordinator::Coordinator;
pub use coordinator::Snapshot;
pub use coordinator::SnapshotIntoIterator;
pub use notifier::ChangeAction;
pub use notifier::ChangeEvent;
pub use notifier::ChangeNotifier;
pub use notifier::ChangedItem;
pub use notifier::ListenerId;
pub use notifier::RefreshThrottle;
pub use policy::InsertionOrder;
pub use policy::KeyOrder;
pub use policy::NaturalOrder;
pub use policy::OrderingPolicy;
pub use policy::PositionalPolicy;
pub use policy::StableReplacePolicy;
pub use policy::ValueOrder;
