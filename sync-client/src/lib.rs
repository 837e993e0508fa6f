//! Marketplace Sync Client
//!
//! Keeps a disposable read-only mirror of the marketplace for one viewing
//! account:
//! - Re-derives the mirror from queries whenever an event arrives
//! - Drops refresh requests that arrive while one is in flight
//! - Holds at most one live subscription per event kind
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod query;

pub use client::{FeedEntry, ListingView, RefreshOutcome, SyncClient};
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use query::{EventSource, MarketQuery};
