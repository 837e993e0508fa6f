//! Marketplace Ledger Core
//!
//! Authoritative article book with an ordered, hash-chained event log.
//!
//! # Architecture
//!
//! - **Single Writer**: One actor task owns the engine, so purchases never race
//! - **Atomic Transitions**: Article state and its event commit in one batch
//! - **Settlement Seam**: Value moves through a pluggable `Settlement` before a sale is recorded
//! - **Replayable Log**: Subscribers replay from any position, then follow live
//!
//! # Invariants
//!
//! - Article ids are dense and start at 1
//! - An article is sold at most once and its buyer never changes
//! - The seller never buys their own article
//! - Every accepted transition appears exactly once in the log, in commit order

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod event_log;
pub mod market;
pub mod metrics;
pub mod settlement;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use actor::MarketHandle;
pub use config::Config;
pub use error::{Error, Result};
pub use event_log::{EventLog, Subscription, SubscriptionId};
pub use market::Marketplace;
pub use metrics::Metrics;
pub use settlement::{InMemorySettlement, Settlement, SettlementError};
pub use storage::Storage;
pub use types::{
    AccountId, Amount, Article, ArticleId, EventKind, EventRecord, MarketEvent, Receipt,
};
