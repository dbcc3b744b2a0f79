//! Error types for k2filter.

use std::path::PathBuf;

use thiserror::Error;

use crate::filter::FilterId;

/// Error type for k2filter operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Network or transport failure, including timeouts
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Server answered with a non-success status
    #[error("HTTP error: {0}")]
    Status(u16),

    /// Cache file does not exist
    #[error("cache file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Filter is not registered
    #[error("unknown filter: {0}")]
    UnknownFilter(FilterId),

    /// Filter with the same id is already registered
    #[error("duplicate filter: {0}")]
    DuplicateFilter(FilterId),
}

impl Error {
    /// Returns `true` for errors raised by the remote fetch.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Error::Fetch(_) | Error::Status(_))
    }

    /// Returns `true` when a cache file was expected but absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result type alias for k2filter operations.
pub type Result<T> = std::result::Result<T, Error>;
