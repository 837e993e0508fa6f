//! Ledger store: the authoritative article records
//!
//! Held in memory and owned by the actor task, so it needs no locking.
//! RocksDB is the durable copy; `load` rebuilds the map on open. The store
//! does not validate anything: the engine checks preconditions first.

use crate::types::{AccountId, Amount, Article, ArticleId};
use crate::{Error, Result, Storage};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Article records keyed by id (BTreeMap keeps ascending id order)
#[derive(Debug)]
pub struct LedgerStore {
    storage: Arc<Storage>,
    articles: BTreeMap<ArticleId, Article>,
}

impl LedgerStore {
    /// Rebuild from storage
    pub fn load(storage: Arc<Storage>) -> Result<Self> {
        let mut articles = BTreeMap::new();
        for (expected, article) in (1u64..).zip(storage.load_articles()?) {
            // Ids are dense from 1; a hole means the database was edited
            if article.id.get() != expected {
                return Err(Error::InvariantViolation(format!(
                    "article ids not sequential: expected {}, found {}",
                    expected, article.id
                )));
            }
            articles.insert(article.id, article);
        }

        tracing::debug!(count = articles.len(), "Ledger store loaded");

        Ok(Self { storage, articles })
    }

    /// Record `create_article` would insert for these arguments
    pub fn next_article(
        &self,
        seller: AccountId,
        name: String,
        description: String,
        price: Amount,
    ) -> Article {
        Article {
            id: ArticleId::new(self.count() + 1),
            seller,
            buyer: None,
            name,
            description,
            price,
        }
    }

    /// Allocate the next id and store a new unsold article
    pub fn create_article(
        &mut self,
        seller: AccountId,
        name: String,
        description: String,
        price: Amount,
    ) -> Result<ArticleId> {
        let article = self.next_article(seller, name, description, price);
        self.storage.put_article(&article)?;
        Ok(self.insert_created(article))
    }

    /// Insert a record built by `next_article` and already persisted
    pub(crate) fn insert_created(&mut self, article: Article) -> ArticleId {
        let id = article.id;
        debug_assert_eq!(id.get(), self.count() + 1);
        self.articles.insert(id, article);
        id
    }

    /// Look up an article
    pub fn get_article(&self, id: ArticleId) -> Option<&Article> {
        self.articles.get(&id)
    }

    /// Set the buyer of an existing article
    pub fn record_purchase(&mut self, id: ArticleId, buyer: AccountId) -> Result<()> {
        let article = self.purchased(id, buyer)?;
        self.storage.put_article(&article)?;
        self.replace(article);
        Ok(())
    }

    /// Copy of article `id` with `buyer` set, not yet applied
    pub(crate) fn purchased(&self, id: ArticleId, buyer: AccountId) -> Result<Article> {
        let mut article = self
            .articles
            .get(&id)
            .cloned()
            .ok_or(Error::ArticleNotFound(id))?;
        article.buyer = Some(buyer);
        Ok(article)
    }

    /// Swap in an updated record that is already persisted
    pub(crate) fn replace(&mut self, article: Article) {
        self.articles.insert(article.id, article);
    }

    /// Ids of all unsold articles, ascending
    pub fn list_for_sale_ids(&self) -> Vec<ArticleId> {
        self.articles
            .values()
            .filter(|a| a.is_for_sale())
            .map(|a| a.id)
            .collect()
    }

    /// Total articles ever created
    pub fn count(&self) -> u64 {
        self.articles.len() as u64
    }

    /// All articles, ascending id
    pub fn iter(&self) -> impl Iterator<Item = &Article> {
        self.articles.values()
    }
}
