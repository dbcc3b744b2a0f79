//! Filter list records.

use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Stable identity of a filter, used to name its cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(u64);

impl FilterId {
    /// Create an id from an explicitly assigned number.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Derive an id from a source URL.
    ///
    /// Uses the first 8 bytes of the SHA-256 digest of the URL, so the same
    /// URL maps to the same cache file across restarts.
    pub fn from_url(url: &str) -> Self {
        let hash = Sha256::digest(url.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash[..8]);
        Self(u64::from_be_bytes(bytes))
    }

    /// Get the numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for FilterId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// One subscribed filter list.
///
/// `rules_count` is only meaningful while `loaded` is `true`; an unloaded
/// filter and a loaded filter with zero rules are different states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Identity used to derive the cache path
    pub id: FilterId,
    /// Remote source URL
    pub url: String,
    /// Display name
    pub name: String,
    /// Whether batch refresh and load include this filter
    pub enabled: bool,
    /// Effective rule lines in the loaded content
    pub rules_count: usize,
    /// Whether in-memory rule data is populated
    pub loaded: bool,
    /// Cache file modification time as of the last update or load
    pub last_updated: Option<SystemTime>,
    /// Time of the last successful fetch
    pub last_checked: Option<SystemTime>,
    /// ETag returned by the server with the cached content
    pub etag: Option<String>,
}

impl Filter {
    /// Create a filter whose id is derived from its URL.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self::with_id(FilterId::from_url(&url), url)
    }

    /// Create a filter with an explicitly assigned id.
    pub fn with_id(id: impl Into<FilterId>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: id.into(),
            name: url.clone(),
            url,
            enabled: true,
            rules_count: 0,
            loaded: false,
            last_updated: None,
            last_checked: None,
            etag: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set whether the filter is enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Get the rule count if the filter is loaded.
    pub fn loaded_rules(&self) -> Option<usize> {
        self.loaded.then_some(self.rules_count)
    }

    /// Check if a refresh is due based on the given interval.
    pub fn needs_update(&self, interval: Duration) -> bool {
        match self.last_checked {
            None => true,
            Some(last) => {
                let elapsed = SystemTime::now().duration_since(last).unwrap_or(Duration::MAX);
                elapsed >= interval
            }
        }
    }

    /// Mark the filter as loaded with `rules_count` rules.
    pub(crate) fn set_loaded(&mut self, rules_count: usize, modified: Option<SystemTime>) {
        self.rules_count = rules_count;
        self.loaded = true;
        self.last_updated = modified;
    }

    /// Drop in-memory rule data.
    pub(crate) fn unload(&mut self) {
        self.rules_count = 0;
        self.loaded = false;
    }
}
