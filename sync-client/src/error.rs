//! Error types for the sync client

use thiserror::Error;

/// Sync client error
#[derive(Debug, Error)]
pub enum Error {
    /// Marketplace rejected or failed a request
    #[error("Market error: {0}")]
    Market(#[from] market_core::Error),

    /// Query backend failed
    #[error("Query error: {0}")]
    Query(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
