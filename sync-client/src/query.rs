//! Read-side seams the sync client depends on

use crate::{Error, Result};
use async_trait::async_trait;
use market_core::{
    AccountId, Amount, Article, ArticleId, EventKind, EventLog, MarketHandle, SettlementError,
    Subscription, SubscriptionId,
};
use rust_decimal::Decimal;

/// Marketplace queries used to rebuild the mirror
#[async_trait]
pub trait MarketQuery: Send + Sync {
    /// Ids of unsold articles, ascending
    async fn articles_for_sale(&self) -> Result<Vec<ArticleId>>;

    /// Article by id
    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>>;

    /// Balance of `account`
    async fn balance(&self, account: &AccountId) -> Result<Amount>;
}

/// Source of replayable event subscriptions
pub trait EventSource: Send + Sync {
    /// Subscribe to `kind` from `from_position`
    fn subscribe(&self, kind: EventKind, from_position: u64) -> Subscription;

    /// Close a subscription; false if it was already closed
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

#[async_trait]
impl MarketQuery for MarketHandle {
    async fn articles_for_sale(&self) -> Result<Vec<ArticleId>> {
        Ok(MarketHandle::articles_for_sale(self).await?)
    }

    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>> {
        Ok(MarketHandle::get_article(self, id).await?)
    }

    async fn balance(&self, account: &AccountId) -> Result<Amount> {
        match MarketHandle::balance(self, account.clone()).await {
            Ok(balance) => Ok(balance),
            // Accounts the settlement book has never seen hold nothing
            Err(market_core::Error::SettlementFailed(SettlementError::UnknownAccount(_))) => {
                Ok(Decimal::ZERO)
            }
            Err(e) => Err(Error::from(e)),
        }
    }
}

impl EventSource for EventLog {
    fn subscribe(&self, kind: EventKind, from_position: u64) -> Subscription {
        EventLog::subscribe(self, kind, from_position)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        EventLog::unsubscribe(self, id)
    }
}
