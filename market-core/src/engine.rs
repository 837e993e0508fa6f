//! Marketplace engine: listing and purchase rules
//!
//! The engine is owned by the actor task (see `actor`), which processes one
//! request at a time. That makes every `buy_article` an atomic
//! check-then-act unit without further locking.
//!
//! Each accepted transition is committed to RocksDB as one batch holding the
//! article record and its event, then applied to the in-memory store.

use crate::event_log::EventLog;
use crate::metrics::Metrics;
use crate::settlement::Settlement;
use crate::store::LedgerStore;
use crate::types::{AccountId, Amount, Article, ArticleId, EventKind, MarketEvent, Receipt};
use crate::{Error, Result, Storage};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Listing and purchase state machine
pub struct MarketEngine {
    storage: Arc<Storage>,
    store: LedgerStore,
    log: Arc<EventLog>,
    settlement: Arc<dyn Settlement>,
    metrics: Metrics,
}

impl std::fmt::Debug for MarketEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketEngine")
            .field("articles", &self.store.count())
            .field("log", &self.log)
            .finish()
    }
}

impl MarketEngine {
    /// Load the store and make sure the log covers it
    pub fn open(
        storage: Arc<Storage>,
        log: Arc<EventLog>,
        settlement: Arc<dyn Settlement>,
        metrics: Metrics,
    ) -> Result<Self> {
        let store = LedgerStore::load(storage.clone())?;
        let engine = Self {
            storage,
            store,
            log,
            settlement,
            metrics,
        };
        engine.recover_events()?;
        Ok(engine)
    }

    /// List a new article
    pub fn sell_article(
        &mut self,
        caller: AccountId,
        name: String,
        description: String,
        price: Amount,
    ) -> Result<Receipt> {
        if let Err(e) = validate_listing(&name, price) {
            self.reject(&e);
            return Err(e);
        }

        let article = self.store.next_article(caller, name, description, price);
        let storage = self.storage.clone();
        let record = self
            .log
            .append_with(MarketEvent::listed(&article), |record| {
                storage.commit_transition(&article, record)
            })?;

        let article_id = self.store.insert_created(article);
        self.metrics.record_listing();

        tracing::info!(
            %article_id,
            position = record.position,
            "Article listed"
        );

        Ok(Receipt {
            article_id,
            event: record,
        })
    }

    /// Buy an article at its exact price
    pub async fn buy_article(
        &mut self,
        caller: AccountId,
        id: ArticleId,
        tendered: Amount,
    ) -> Result<Receipt> {
        let start = Instant::now();

        let article = match self.check_purchase(&caller, id, tendered) {
            Ok(article) => article.clone(),
            Err(e) => {
                self.reject(&e);
                return Err(e);
            }
        };

        if let Err(e) = self
            .settlement
            .transfer(&caller, &article.seller, tendered)
            .await
        {
            let e = Error::from(e);
            self.reject(&e);
            return Err(e);
        }

        let updated = self.store.purchased(id, caller.clone())?;
        let storage = self.storage.clone();
        let committed = self
            .log
            .append_with(MarketEvent::sold(&article, caller), |record| {
                storage.commit_transition(&updated, record)
            });

        let record = match committed {
            Ok(record) => record,
            Err(e) => {
                // Funds already moved; the sale is lost locally
                tracing::error!(
                    article_id = %id,
                    error = %e,
                    "Settled purchase could not be recorded"
                );
                return Err(e);
            }
        };

        self.store.replace(updated);
        self.metrics.record_sale(start.elapsed().as_secs_f64());

        tracing::info!(
            article_id = %id,
            position = record.position,
            "Article sold"
        );

        Ok(Receipt {
            article_id: id,
            event: record,
        })
    }

    /// Purchase preconditions, in the order callers observe them
    fn check_purchase(
        &self,
        caller: &AccountId,
        id: ArticleId,
        tendered: Amount,
    ) -> Result<&Article> {
        if self.store.count() == 0 {
            return Err(Error::NoArticlesExist);
        }

        let article = self
            .store
            .get_article(id)
            .ok_or(Error::ArticleNotFound(id))?;

        if *caller == article.seller {
            return Err(Error::SelfPurchase);
        }

        if tendered != article.price {
            return Err(Error::PriceMismatch {
                expected: article.price,
                tendered,
            });
        }

        if !article.is_for_sale() {
            return Err(Error::AlreadySold(id));
        }

        Ok(article)
    }

    /// Look up an article
    pub fn get_article(&self, id: ArticleId) -> Option<Article> {
        self.store.get_article(id).cloned()
    }

    /// Ids of all unsold articles, ascending
    pub fn articles_for_sale(&self) -> Vec<ArticleId> {
        self.store.list_for_sale_ids()
    }

    /// Total articles ever listed
    pub fn number_of_articles(&self) -> u64 {
        self.store.count()
    }

    /// Balance of `account` at the settlement layer
    pub async fn balance(&self, account: &AccountId) -> Result<Amount> {
        Ok(self.settlement.balance(account).await?)
    }

    fn reject(&self, error: &Error) {
        self.metrics.record_rejection(error.reason());
        tracing::warn!(reason = error.reason(), %error, "Transition rejected");
    }

    /// Append events for articles whose transition reached the store but not
    /// the log. Every article needs a `Listed` event, and a sold one also
    /// needs a `Sold` event.
    fn recover_events(&self) -> Result<()> {
        let mut listed = HashSet::new();
        let mut sold = HashSet::new();
        for record in self.log.events_from(0)? {
            match record.kind() {
                EventKind::Listed => listed.insert(record.event.article_id()),
                EventKind::Sold => sold.insert(record.event.article_id()),
            };
        }

        let mut recovered = 0u64;
        for article in self.store.iter() {
            if !listed.contains(&article.id) {
                self.log.append(MarketEvent::listed(article))?;
                recovered += 1;
            }
            if let Some(buyer) = &article.buyer {
                if !sold.contains(&article.id) {
                    self.log.append(MarketEvent::sold(article, buyer.clone()))?;
                    recovered += 1;
                }
            }
        }

        if recovered > 0 {
            self.metrics.record_recovered_events(recovered);
            tracing::warn!(recovered, "Recovered events missing from the log");
        }

        Ok(())
    }
}

fn validate_listing(name: &str, price: Amount) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("article name must not be empty".to_string()));
    }
    if price <= Decimal::ZERO {
        return Err(Error::InvalidInput(format!(
            "price must be positive, got {}",
            price
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::InMemorySettlement;
    use crate::Config;
    use tempfile::TempDir;

    struct Fixture {
        engine: MarketEngine,
        log: Arc<EventLog>,
        book: Arc<InMemorySettlement>,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let log = Arc::new(EventLog::open(storage.clone(), &config.event_log).unwrap());
        let book = Arc::new(InMemorySettlement::with_balances([
            (AccountId::new("buyer"), Decimal::new(100, 0)),
            (AccountId::new("other"), Decimal::new(100, 0)),
        ]));
        let engine =
            MarketEngine::open(storage, log.clone(), book.clone(), Metrics::new().unwrap())
                .unwrap();

        Fixture {
            engine,
            log,
            book,
            _temp: temp,
        }
    }

    fn list(engine: &mut MarketEngine, name: &str, price: i64) -> ArticleId {
        engine
            .sell_article(
                AccountId::new("seller"),
                name.to_string(),
                format!("Description for {}", name),
                Decimal::new(price, 0),
            )
            .unwrap()
            .article_id
    }

    #[test]
    fn test_validate_listing() {
        assert!(validate_listing("lamp", Decimal::ONE).is_ok());
        assert!(matches!(
            validate_listing("", Decimal::ONE),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            validate_listing("   ", Decimal::ONE),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            validate_listing("lamp", Decimal::ZERO),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            validate_listing("lamp", Decimal::new(-1, 0)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_sell_emits_listed() {
        let mut f = fixture();
        let receipt = f
            .engine
            .sell_article(
                AccountId::new("seller"),
                "article 1".to_string(),
                "Description for article 1".to_string(),
                Decimal::new(3, 0),
            )
            .unwrap();

        assert_eq!(receipt.article_id, ArticleId::new(1));
        assert_eq!(receipt.event.position, 0);
        assert_eq!(
            receipt.event.event,
            MarketEvent::Listed {
                id: ArticleId::new(1),
                seller: AccountId::new("seller"),
                name: "article 1".to_string(),
                price: Decimal::new(3, 0),
            }
        );
        assert_eq!(f.log.head(), 1);
    }

    #[test]
    fn test_rejected_listing_has_no_effect() {
        let mut f = fixture();
        let result = f.engine.sell_article(
            AccountId::new("seller"),
            String::new(),
            String::new(),
            Decimal::ONE,
        );

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(f.engine.number_of_articles(), 0);
        assert_eq!(f.log.head(), 0);
    }

    #[tokio::test]
    async fn test_check_order_empty_ledger_first() {
        let mut f = fixture();
        // Also a price mismatch and unknown id, but nothing exists yet
        let err = f
            .engine
            .buy_article(AccountId::new("buyer"), ArticleId::new(1), Decimal::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoArticlesExist));
    }

    #[tokio::test]
    async fn test_check_order_self_purchase_before_price() {
        let mut f = fixture();
        let id = list(&mut f.engine, "lamp", 10);

        let err = f
            .engine
            .buy_article(AccountId::new("seller"), id, Decimal::new(11, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SelfPurchase));
    }

    #[tokio::test]
    async fn test_check_order_price_before_sold() {
        let mut f = fixture();
        let id = list(&mut f.engine, "lamp", 10);
        f.engine
            .buy_article(AccountId::new("buyer"), id, Decimal::new(10, 0))
            .await
            .unwrap();

        let err = f
            .engine
            .buy_article(AccountId::new("other"), id, Decimal::new(9, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PriceMismatch { .. }));
    }

    #[tokio::test]
    async fn test_settlement_failure_leaves_article_unsold() {
        let mut f = fixture();
        let id = list(&mut f.engine, "car", 500);

        let err = f
            .engine
            .buy_article(AccountId::new("buyer"), id, Decimal::new(500, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SettlementFailed(_)));
        assert!(f.engine.get_article(id).unwrap().buyer.is_none());
        assert_eq!(f.engine.articles_for_sale(), vec![id]);
        assert_eq!(f.log.head(), 1);
        assert_eq!(
            f.book.balance(&AccountId::new("buyer")).await.unwrap(),
            Decimal::new(100, 0)
        );
    }

    #[tokio::test]
    async fn test_purchase_transfers_price() {
        let mut f = fixture();
        let id = list(&mut f.engine, "lamp", 10);

        let receipt = f
            .engine
            .buy_article(AccountId::new("buyer"), id, Decimal::new(10, 0))
            .await
            .unwrap();

        assert_eq!(receipt.event.kind(), EventKind::Sold);
        assert_eq!(
            f.engine.balance(&AccountId::new("seller")).await.unwrap(),
            Decimal::new(10, 0)
        );
        assert_eq!(
            f.engine.balance(&AccountId::new("buyer")).await.unwrap(),
            Decimal::new(90, 0)
        );
    }

    #[tokio::test]
    async fn test_recovery_appends_missing_events() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();

        // Store writes that never reached the log
        {
            let storage = Arc::new(Storage::open(&config).unwrap());
            let mut store = LedgerStore::load(storage).unwrap();
            let a = store
                .create_article(
                    AccountId::new("seller"),
                    "a".to_string(),
                    String::new(),
                    Decimal::ONE,
                )
                .unwrap();
            store
                .create_article(
                    AccountId::new("seller"),
                    "b".to_string(),
                    String::new(),
                    Decimal::ONE,
                )
                .unwrap();
            store.record_purchase(a, AccountId::new("buyer")).unwrap();
        }

        let storage = Arc::new(Storage::open(&config).unwrap());
        let log = Arc::new(EventLog::open(storage.clone(), &config.event_log).unwrap());
        let engine = MarketEngine::open(
            storage,
            log.clone(),
            Arc::new(InMemorySettlement::new()),
            Metrics::new().unwrap(),
        )
        .unwrap();

        let kinds: Vec<(EventKind, u64)> = log
            .events_from(0)
            .unwrap()
            .iter()
            .map(|r| (r.kind(), r.event.article_id().get()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (EventKind::Listed, 1),
                (EventKind::Sold, 1),
                (EventKind::Listed, 2)
            ]
        );
        assert_eq!(log.verify_chain().unwrap(), 3);
        assert_eq!(engine.number_of_articles(), 2);
    }
}
