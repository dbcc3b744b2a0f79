//! K2Filter - Filter list synchronization and cache management.
//!
//! This crate keeps remotely published rule lists (ad and tracker
//! blocklists for a DNS filtering engine) synchronized on local disk.
//!
//! # Features
//!
//! - **Change detection**: unchanged lists are neither rewritten nor reparsed
//! - **Conditional requests**: ETag-based `If-None-Match` (304 Not Modified)
//! - **Atomic cache updates**: temp file + rename, readers never see partial files
//! - **Load/unload lifecycle**: bring rule data in or out of memory offline
//! - **Thread-safe**: per-filter locking, different filters refresh in parallel
//!
//! # Quick Start
//!
//! ```ignore
//! use k2filter::{CacheStore, Filter, FilterRegistry, HttpFetcher};
//!
//! let registry = FilterRegistry::new(CacheStore::new("data/filters"), HttpFetcher::new());
//! registry.init()?;
//!
//! let id = registry.add(Filter::with_id(1, "https://example.com/filters/1.txt"))?;
//!
//! // Download (returns true if the cached list changed)
//! if registry.update(id)? {
//!     println!("Filter updated!");
//! }
//!
//! // Rule count and cache path for the filtering engine
//! let filter = registry.get(id).unwrap();
//! println!("{} rules in {:?}", filter.rules_count, registry.path(id));
//! ```
//!
//! # Configuration
//!
//! A registry can also be built from a YAML [`SyncConfig`]:
//!
//! ```ignore
//! use k2filter::{FilterRegistry, SyncConfig};
//!
//! let config = SyncConfig::load("k2filter.yaml")?;
//! let registry = FilterRegistry::from_config(&config)?;
//!
//! for (id, result) in registry.update_due(config.update_interval()) {
//!     if let Err(e) = result {
//!         log::warn!("Filter {} not refreshed: {}", id, e);
//!     }
//! }
//! ```
//!
//! # Rule Counting
//!
//! Every line that is neither blank nor starts with `#` counts as one rule,
//! whatever its syntax. Rule validation is left to the filtering engine.

mod error;
mod filter;
mod metadata;

pub mod config;
pub mod counter;
pub mod fetcher;
pub mod registry;
pub mod store;

// Re-export core types
pub use error::{Error, Result};
pub use filter::{Filter, FilterId};

pub use config::{FilterConfig, SyncConfig};
pub use counter::{count_rules, count_rules_from};
pub use fetcher::{FetchOutcome, Fetcher, HttpFetcher};
pub use metadata::FilterMetadata;
pub use registry::FilterRegistry;
pub use store::CacheStore;
