//! Main marketplace orchestration layer
//!
//! This module ties together storage, the event log, the settlement seam and
//! the actor into the public API.
//!
//! # Example
//!
//! ```no_run
//! use market_core::{AccountId, Config, InMemorySettlement, Marketplace};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> market_core::Result<()> {
//!     let market = Marketplace::open(Config::default(), Arc::new(InMemorySettlement::new()))?;
//!
//!     let receipt = market
//!         .sell_article(AccountId::new("alice"), "lamp", "brass, works", Decimal::new(3, 0))
//!         .await?;
//!     println!("listed article {}", receipt.article_id);
//!
//!     market.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_market_actor, MarketHandle},
    engine::MarketEngine,
    event_log::{EventLog, Subscription, SubscriptionId},
    metrics::Metrics,
    settlement::Settlement,
    types::{AccountId, Amount, Article, ArticleId, EventKind, EventRecord, Receipt},
    Config, Error, Result, Storage,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Main marketplace interface
#[derive(Debug)]
pub struct Marketplace {
    /// Actor handle for all reads and writes
    handle: MarketHandle,

    /// Event log (subscriptions bypass the actor)
    log: Arc<EventLog>,

    /// Metrics collector
    metrics: Metrics,

    /// Actor task
    task: JoinHandle<()>,

    /// Configuration
    config: Config,
}

impl Marketplace {
    /// Open the marketplace. Must be called inside a Tokio runtime.
    pub fn open(config: Config, settlement: Arc<dyn Settlement>) -> Result<Self> {
        let metrics =
            Metrics::new().map_err(|e| Error::Config(format!("metrics registry: {}", e)))?;

        let storage = Arc::new(Storage::open(&config)?);
        let log = Arc::new(EventLog::open(storage.clone(), &config.event_log)?);
        let engine = MarketEngine::open(storage, log.clone(), settlement, metrics.clone())?;

        let (handle, task) = spawn_market_actor(engine, config.mailbox_capacity);

        tracing::info!(
            service = %config.service_name,
            data_dir = ?config.data_dir,
            head = log.head(),
            "Marketplace opened"
        );

        Ok(Self {
            handle,
            log,
            metrics,
            task,
            config,
        })
    }

    /// Cloneable handle for other tasks
    pub fn handle(&self) -> MarketHandle {
        self.handle.clone()
    }

    /// Shared event log
    pub fn event_log(&self) -> Arc<EventLog> {
        self.log.clone()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// List an article for sale
    pub async fn sell_article(
        &self,
        caller: AccountId,
        name: impl Into<String>,
        description: impl Into<String>,
        price: Amount,
    ) -> Result<Receipt> {
        self.handle
            .sell_article(caller, name, description, price)
            .await
    }

    /// Buy an article by tendering exactly its price
    pub async fn buy_article(
        &self,
        caller: AccountId,
        id: ArticleId,
        value: Amount,
    ) -> Result<Receipt> {
        self.handle.buy_article(caller, id, value).await
    }

    /// Get article by id
    pub async fn get_article(&self, id: ArticleId) -> Result<Option<Article>> {
        self.handle.get_article(id).await
    }

    /// Ids of unsold articles, ascending
    pub async fn articles_for_sale(&self) -> Result<Vec<ArticleId>> {
        self.handle.articles_for_sale().await
    }

    /// Total articles ever listed
    pub async fn number_of_articles(&self) -> Result<u64> {
        self.handle.number_of_articles().await
    }

    /// Settlement balance of an account
    pub async fn balance(&self, account: AccountId) -> Result<Amount> {
        self.handle.balance(account).await
    }

    /// Subscribe to events of `kind` from `from_position`
    pub fn subscribe(&self, kind: EventKind, from_position: u64) -> Subscription {
        self.log.subscribe(kind, from_position)
    }

    /// Close a subscription (idempotent)
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.log.unsubscribe(id)
    }

    /// Stored events from `position`
    pub fn events_from(&self, position: u64) -> Result<Vec<EventRecord>> {
        self.log.events_from(position)
    }

    /// Verify the event log hash chain
    pub fn verify_chain(&self) -> Result<u64> {
        self.log.verify_chain()
    }

    /// Stop the actor and wait for it to finish
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.task
            .await
            .map_err(|e| Error::Concurrency(format!("Market actor failed: {}", e)))?;

        tracing::info!("Marketplace shut down");
        Ok(())
    }
}
