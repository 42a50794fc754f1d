//! Per-collection configuration.

use std::time::Duration;

/// Default coalescing window for the view-changed signal.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_millis(50);

/// Default sort key depth, in bits, above which a map is renumbered.
pub const DEFAULT_MAX_KEY_BITS: u32 = 256;

/// Settings shared by every concurrent collection.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use snapmap::CollectionConfig;
///
/// let config = CollectionConfig::default()
///     .with_name("inbox")
///     .with_refresh_window(Duration::from_millis(10))
///     .with_max_key_bits(None);
///
/// assert_eq!(config.label(), "inbox");
/// assert_eq!(config.max_key_bits, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CollectionConfig {
    /// Label attached to tracing events.
    pub name: Option<String>,
    /// How long bursts of changes are collapsed into one refresh signal.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub refresh_window: Duration,
    /// Sort key depth that triggers renumbering; `None` never renumbers.
    pub max_key_bits: Option<u32>,
}

impl CollectionConfig {
    /// Sets the tracing label.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the coalescing window.
    #[must_use]
    pub const fn with_refresh_window(mut self, refresh_window: Duration) -> Self {
        self.refresh_window = refresh_window;
        self
    }

    /// Sets the renumbering threshold.
    #[must_use]
    pub const fn with_max_key_bits(mut self, max_key_bits: Option<u32>) -> Self {
        self.max_key_bits = max_key_bits;
        self
    }

    /// Returns the tracing label, or `"unnamed"`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// Returns `true` when a map with keys `key_bits` deep should be
    /// renumbered.
    #[must_use]
    pub fn should_renumber(&self, key_bits: u32) -> bool {
        self.max_key_bits.is_some_and(|limit| key_bits > limit)
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: None,
            refresh_window: DEFAULT_REFRESH_WINDOW,
            max_key_bits: Some(DEFAULT_MAX_KEY_BITS),
        }
    }
}

#[cfg(feature = "serde")]
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
