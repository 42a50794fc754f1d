//! Error types for collection operations.
//!
//! Every fallible operation reports usage errors through [`CollectionError`].
//! Errors are detected before anything is published, so a failed mutation
//! leaves the collection and its listeners untouched.

use thiserror::Error;

/// Errors returned by ordered maps and concurrent collections.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CollectionError {
    /// A position was outside `0..=len` (insertion) or `0..len` (access).
    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange {
        /// The requested position.
        index: usize,
        /// The length at the time of the request.
        len: usize,
    },

    /// A range `[index, index + count)` did not fit inside the collection.
    #[error("range starting at {index} with count {count} is out of bounds for length {len}")]
    RangeOutOfBounds {
        /// First position of the range.
        index: usize,
        /// Number of elements in the range.
        count: usize,
        /// The length at the time of the request.
        len: usize,
    },

    /// The key is already present.
    #[error("an element with the same key already exists")]
    DuplicateKey,

    /// The key is not present.
    #[error("the given key was not present")]
    KeyNotFound,

    /// No sort key could be generated even after renumbering.
    #[error("sort key space exhausted at length {len}")]
    KeySpaceExhausted {
        /// Number of entries in the map.
        len: usize,
    },

    /// The refresh worker thread could not be started.
    #[error("failed to spawn refresh worker: {0}")]
    WorkerSpawn(String),
}

impl From<std::io::Error> for CollectionError {
    fn from(error: std::io::Error) -> Self {
        Self::WorkerSpawn(error.to_string())
    }
}

/// A specialized `Result` for collection operations.
pub type Result<T> = std::result::Result<T, CollectionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_index_out_of_range_message() {
        let error = CollectionError::IndexOutOfRange { index: 5, len: 3 };
        assert_eq!(error.to_string(), "index 5 is out of range for length 3");
    }

    #[rstest]
    fn test_range_out_of_bounds_message() {
        let error = CollectionError::RangeOutOfBounds {
            index: 2,
            count: 4,
            len: 5,
        };
        assert_eq!(
            error.to_string(),
            "range starting at 2 with count 4 is out of bounds for length 5"
        );
    }

    #[rstest]
    fn test_io_error_converts_to_worker_spawn() {
        let error: CollectionError = std::io::Error::other("no threads").into();
        assert!(matches!(error, CollectionError::WorkerSpawn(message) if message == "no threads"));
    }
}
