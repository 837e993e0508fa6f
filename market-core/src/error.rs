//! Error types for the marketplace

use crate::settlement::SettlementError;
use crate::types::{Amount, ArticleId};
use thiserror::Error;

/// Result type for marketplace operations
pub type Result<T> = std::result::Result<T, Error>;

/// Marketplace errors
///
/// The first group are rejections of a requested transition. They are
/// terminal and user-visible. The rest are infrastructure faults.
#[derive(Error, Debug)]
pub enum Error {
    /// Listing request failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Purchase attempted before anything was ever listed
    #[error("No article to buy")]
    NoArticlesExist,

    /// Purchase of an unknown article
    #[error("Article doesn't exist: {0}")]
    ArticleNotFound(ArticleId),

    /// Seller tried to buy their own article
    #[error("Buyer cannot be the seller")]
    SelfPurchase,

    /// Tendered value differs from the listing price
    #[error("Price doesn't match: expected {expected}, tendered {tendered}")]
    PriceMismatch {
        /// Listing price
        expected: Amount,
        /// Value offered by the caller
        tendered: Amount,
    },

    /// Article already has a buyer
    #[error("Article already sold: {0}")]
    AlreadySold(ArticleId),

    /// Settlement layer refused or failed the transfer
    #[error("Settlement failed: {0}")]
    SettlementFailed(#[from] SettlementError),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Stored state contradicts itself (broken hash chain, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is a rejected transition rather than a system fault
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::NoArticlesExist
                | Error::ArticleNotFound(_)
                | Error::SelfPurchase
                | Error::PriceMismatch { .. }
                | Error::AlreadySold(_)
                | Error::SettlementFailed(_)
        )
    }

    /// Stable label for metrics and logs
    pub fn reason(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NoArticlesExist => "no_articles_exist",
            Error::ArticleNotFound(_) => "article_not_found",
            Error::SelfPurchase => "self_purchase",
            Error::PriceMismatch { .. } => "price_mismatch",
            Error::AlreadySold(_) => "already_sold",
            Error::SettlementFailed(_) => "settlement_failed",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::Concurrency(_) => "concurrency",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
