//! Actor-based concurrency for the marketplace
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One task owns the engine, so transitions never interleave
//! - Two purchases of the same article are decided in mailbox order
//! - Async message passing with backpressure (bounded mailbox)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Callers / Sync clients (many tasks)           │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               MarketHandle (Clone)                   │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              MarketActor (Single Task)               │
//! │   MarketEngine: validate → settle → commit → emit    │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::engine::MarketEngine;
use crate::types::{AccountId, Amount, Article, ArticleId, Receipt};
use crate::{Error, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Message sent to the market actor
#[derive(Debug)]
pub enum MarketMessage {
    /// List a new article
    SellArticle {
        caller: AccountId,
        name: String,
        description: String,
        price: Amount,
        response: oneshot::Sender<Result<Receipt>>,
    },

    /// Buy an article
    BuyArticle {
        caller: AccountId,
        id: ArticleId,
        value: Amount,
        response: oneshot::Sender<Result<Receipt>>,
    },

    /// Get article by id
    GetArticle {
        id: ArticleId,
        response: oneshot::Sender<Result<Option<Article>>>,
    },

    /// Ids of unsold articles
    ArticlesForSale {
        response: oneshot::Sender<Result<Vec<ArticleId>>>,
    },

    /// Total articles ever listed
    NumberOfArticles {
        response: oneshot::Sender<Result<u64>>,
    },

    /// Settlement balance of an account
    Balance {
        account: AccountId,
        response: oneshot::Sender<Result<Amount>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes market messages
#[derive(Debug)]
pub struct MarketActor {
    engine: MarketEngine,
    mailbox: mpsc::Receiver<MarketMessage>,
}

impl MarketActor {
    /// Create new actor
    pub fn new(engine: MarketEngine, mailbox: mpsc::Receiver<MarketMessage>) -> Self {
        Self { engine, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if let MarketMessage::Shutdown = msg {
                tracing::info!("Market actor shutting down");
                break;
            }
            self.handle_message(msg).await;
        }
    }

    /// Handle a single message
    async fn handle_message(&mut self, msg: MarketMessage) {
        match msg {
            MarketMessage::SellArticle {
                caller,
                name,
                description,
                price,
                response,
            } => {
                let result = self.engine.sell_article(caller, name, description, price);
                let _ = response.send(result);
            }

            MarketMessage::BuyArticle {
                caller,
                id,
                value,
                response,
            } => {
                let result = self.engine.buy_article(caller, id, value).await;
                let _ = response.send(result);
            }

            MarketMessage::GetArticle { id, response } => {
                let _ = response.send(Ok(self.engine.get_article(id)));
            }

            MarketMessage::ArticlesForSale { response } => {
                let _ = response.send(Ok(self.engine.articles_for_sale()));
            }

            MarketMessage::NumberOfArticles { response } => {
                let _ = response.send(Ok(self.engine.number_of_articles()));
            }

            MarketMessage::Balance { account, response } => {
                let result = self.engine.balance(&account).await;
                let _ = response.send(result);
            }

            MarketMessage::Shutdown => {
                // Handled in run loop
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct MarketHandle {
    sender: mpsc::Sender<MarketMessage>,
}

impl MarketHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<MarketMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> MarketMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// List a new article
    pub async fn sell_article(
        &self,
        caller: AccountId,
        name: impl Into<String>,
        description: impl Into<String>,
        price: Amount,
    ) -> Result<Receipt> {
        let name = name.into();
        let description = description.into();
        self.request(|response| MarketMessage::SellArticle {
            caller,
            name,
            description,
            price,
            response,
        })
        .await
    }

    /// Buy an article, tendering `value`
    pub async fn buy_article(
        &self,
        caller: AccountId,
        id: ArticleId,
        value: Amount,
    ) -> Result<Receipt> {
        self.request(|response| MarketMessage::BuyArticle {
            caller,
            id,
            value,
            response,
        })
        .await
    }

    /// Get article by id
    pub async fn get_article(&self, id: ArticleId) -> Result<Option<Article>> {
        self.request(|response| MarketMessage::GetArticle { id, response })
            .await
    }

    /// Ids of unsold articles, ascending
    pub async fn articles_for_sale(&self) -> Result<Vec<ArticleId>> {
        self.request(|response| MarketMessage::ArticlesForSale { response })
            .await
    }

    /// Total articles ever listed
    pub async fn number_of_articles(&self) -> Result<u64> {
        self.request(|response| MarketMessage::NumberOfArticles { response })
            .await
    }

    /// Settlement balance of an account
    pub async fn balance(&self, account: AccountId) -> Result<Amount> {
        self.request(|response| MarketMessage::Balance { account, response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(MarketMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the market actor
pub fn spawn_market_actor(
    engine: MarketEngine,
    mailbox_capacity: usize,
) -> (MarketHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1)); // Bounded channel for backpressure
    let actor = MarketActor::new(engine, rx);

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    (MarketHandle::new(tx), task)
}
