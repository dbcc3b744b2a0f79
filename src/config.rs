//! Sync configuration loaded from YAML.
//!
//! ```yaml
//! cache_dir: data/filters
//! fetch_timeout_secs: 5
//! update_interval_secs: 86400
//! filters:
//!   - id: 1
//!     name: AdGuard DNS filter
//!     url: https://adguardteam.github.io/AdGuardSDNSFilter/Filters/filter.txt
//!   - url: https://example.org/hosts.txt
//!     enabled: false
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::fetcher::DEFAULT_USER_AGENT;
use crate::filter::{Filter, FilterId};

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = "data/filters";

/// Default refresh interval (1 day).
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory holding the cached lists
    pub cache_dir: PathBuf,
    /// Timeout for a single fetch, in seconds
    pub fetch_timeout_secs: u64,
    /// Minimum age of the last check before a filter is refreshed again
    pub update_interval_secs: u64,
    /// User-Agent sent with every request
    pub user_agent: String,
    /// Subscribed filter lists
    pub filters: Vec<FilterConfig>,
}

/// One subscribed list.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Explicit id; derived from the URL when absent
    #[serde(default)]
    pub id: Option<u64>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Source URL
    pub url: String,
    /// Whether the list is refreshed and loaded
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            fetch_timeout_secs: crate::fetcher::DEFAULT_FETCH_TIMEOUT.as_secs(),
            update_interval_secs: DEFAULT_UPDATE_INTERVAL.as_secs(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            filters: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Get the fetch timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Get the refresh interval.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout_secs == 0 {
            return Err(Error::Config("fetch_timeout_secs must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for filter in &self.filters {
            let url = filter.url.trim();
            if url.is_empty() {
                return Err(Error::Config("filter url is empty".to_string()));
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!("unsupported filter url: {}", url)));
            }
            let id = filter.filter_id();
            if !seen.insert(id) {
                return Err(Error::Config(format!("duplicate filter id: {}", id)));
            }
        }

        Ok(())
    }

    /// Build the filter records described by this configuration.
    pub fn to_filters(&self) -> Vec<Filter> {
        self.filters.iter().map(FilterConfig::to_filter).collect()
    }
}

impl FilterConfig {
    /// Get the effective id of this filter.
    pub fn filter_id(&self) -> FilterId {
        match self.id {
            Some(id) => FilterId::new(id),
            None => FilterId::from_url(self.url.trim()),
        }
    }

    /// Build a filter record.
    pub fn to_filter(&self) -> Filter {
        let url = self.url.trim();
        let mut filter = Filter::with_id(self.filter_id(), url).with_enabled(self.enabled);
        if let Some(name) = &self.name {
            filter = filter.with_name(name.clone());
        }
        filter
    }
}
