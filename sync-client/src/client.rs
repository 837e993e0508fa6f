//! Sync client: a disposable mirror of the marketplace
//!
//! The mirror is never patched from event payloads. Every delivered event is
//! appended to the feed and then triggers a full `refresh`, which re-reads
//! the listings and the viewer's balance through `MarketQuery`.
//!
//! At most one refresh runs at a time. A refresh requested while another is
//! in flight returns `RefreshOutcome::Skipped` without querying anything.

use crate::{
    config::SyncConfig,
    metrics::{SYNC_EVENTS_RECEIVED_TOTAL, SYNC_REFRESH_TOTAL},
    query::{EventSource, MarketQuery},
    Result,
};
use market_core::{
    AccountId, Amount, Article, ArticleId, EventKind, EventRecord, Marketplace, Subscription,
    SubscriptionId,
};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One row of the mirrored listing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingView {
    /// Article id
    pub id: ArticleId,
    /// Seller account
    pub seller: AccountId,
    /// Article name
    pub name: String,
    /// Free-text description
    pub description: String,
    /// Listing price
    pub price: Amount,
    /// Whether the viewing account is the seller (cannot buy it)
    pub is_own: bool,
}

impl ListingView {
    fn new(article: Article, viewer: &AccountId) -> Self {
        let is_own = article.seller == *viewer;
        Self {
            id: article.id,
            seller: article.seller,
            name: article.name,
            description: article.description,
            price: article.price,
            is_own,
        }
    }
}

/// One line of the event feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Log position of the event
    pub position: u64,
    /// Event kind
    pub kind: EventKind,
    /// Human-readable line, e.g. "bob bought lamp"
    pub text: String,
}

impl From<&EventRecord> for FeedEntry {
    fn from(record: &EventRecord) -> Self {
        Self {
            position: record.position,
            kind: record.kind(),
            text: record.event.describe(),
        }
    }
}

/// Result of a refresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Mirror replaced; `count` listings for sale
    Refreshed {
        /// Listings in the new mirror
        count: usize,
    },

    /// Another refresh was in flight; nothing was queried
    Skipped,
}

#[derive(Debug, Default)]
struct Mirror {
    listings: Vec<ListingView>,
    balance: Amount,
}

#[derive(Debug)]
struct Listener {
    id: SubscriptionId,
    task: JoinHandle<()>,
}

struct Inner {
    account: AccountId,
    config: SyncConfig,
    query: Arc<dyn MarketQuery>,
    events: Arc<dyn EventSource>,
    refreshing: AtomicBool,
    mirror: RwLock<Mirror>,
    feed: Mutex<BTreeMap<u64, FeedEntry>>,
    listeners: Mutex<HashMap<EventKind, Listener>>,
}

/// Releases the refresh flag on every exit path, cancellation included
struct RefreshGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Client-side mirror for one viewing account
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("account", &self.inner.account)
            .field("refreshing", &self.is_refreshing())
            .field("live", &self.is_live())
            .finish()
    }
}

impl SyncClient {
    /// Create a client over explicit query and event seams
    pub fn new(
        account: AccountId,
        query: Arc<dyn MarketQuery>,
        events: Arc<dyn EventSource>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                account,
                config,
                query,
                events,
                refreshing: AtomicBool::new(false),
                mirror: RwLock::new(Mirror::default()),
                feed: Mutex::new(BTreeMap::new()),
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a client reading from an in-process marketplace
    pub fn connect(market: &Marketplace, account: AccountId, config: SyncConfig) -> Self {
        Self::new(
            account,
            Arc::new(market.handle()),
            market.event_log(),
            config,
        )
    }

    /// Subscribe to every event kind, then load the mirror
    pub async fn start(&self) -> Result<RefreshOutcome> {
        self.subscribe_all();
        self.refresh().await
    }

    /// Viewing account
    pub fn account(&self) -> &AccountId {
        &self.inner.account
    }

    /// Re-derive the mirror from the marketplace.
    ///
    /// All-or-nothing: on error the previous mirror stays in place.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let Some(_guard) = RefreshGuard::acquire(&self.inner.refreshing) else {
            debug!(account = %self.inner.account, "Refresh in flight, skipping");
            SYNC_REFRESH_TOTAL.with_label_values(&["skipped"]).inc();
            return Ok(RefreshOutcome::Skipped);
        };

        match self.load_mirror().await {
            Ok(mirror) => {
                let count = mirror.listings.len();
                *self.inner.mirror.write() = mirror;
                SYNC_REFRESH_TOTAL.with_label_values(&["refreshed"]).inc();
                debug!(account = %self.inner.account, count, "Mirror refreshed");
                Ok(RefreshOutcome::Refreshed { count })
            }
            Err(e) => {
                SYNC_REFRESH_TOTAL.with_label_values(&["failed"]).inc();
                warn!(account = %self.inner.account, error = %e, "Refresh failed");
                Err(e)
            }
        }
    }

    async fn load_mirror(&self) -> Result<Mirror> {
        let query = &self.inner.query;

        let ids = query.articles_for_sale().await?;
        let mut listings = Vec::with_capacity(ids.len());
        for id in ids {
            match query.get_article(id).await? {
                Some(article) if article.is_for_sale() => {
                    listings.push(ListingView::new(article, &self.inner.account));
                }
                // Sold or gone between the two reads
                _ => {}
            }
        }

        let balance = query.balance(&self.inner.account).await?;
        Ok(Mirror { listings, balance })
    }

    /// Record a delivered event in the feed, then refresh
    pub async fn on_event(&self, record: EventRecord) -> Result<RefreshOutcome> {
        SYNC_EVENTS_RECEIVED_TOTAL
            .with_label_values(&[record.kind().label()])
            .inc();
        self.record_feed(&record);
        self.refresh().await
    }

    fn record_feed(&self, record: &EventRecord) {
        let mut feed = self.inner.feed.lock();
        // Redelivery of a position replaces its line
        feed.insert(record.position, FeedEntry::from(record));
        while feed.len() > self.inner.config.feed_capacity {
            feed.pop_first();
        }
    }

    /// Open one listener per event kind. Kinds already subscribed are left
    /// alone. Returns how many listeners were started.
    pub fn subscribe_all(&self) -> usize {
        let mut listeners = self.inner.listeners.lock();
        let mut started = 0;

        for kind in EventKind::ALL {
            if listeners.contains_key(&kind) {
                continue;
            }

            let subscription = self
                .inner
                .events
                .subscribe(kind, self.inner.config.replay_from);
            let id = subscription.id();
            let task = tokio::spawn(listen(Arc::downgrade(&self.inner), subscription));

            debug!(%kind, %id, from = self.inner.config.replay_from, "Listener started");
            listeners.insert(kind, Listener { id, task });
            started += 1;
        }

        if started > 0 {
            info!(account = %self.inner.account, started, "Subscribed to market events");
        }
        started
    }

    /// Close every listener. Returns how many were closed.
    pub fn unsubscribe_all(&self) -> usize {
        let drained: Vec<(EventKind, Listener)> =
            self.inner.listeners.lock().drain().collect();
        let closed = drained.len();

        for (kind, listener) in drained {
            self.inner.events.unsubscribe(listener.id);
            listener.task.abort();
            debug!(%kind, id = %listener.id, "Listener stopped");
        }

        if closed > 0 {
            info!(account = %self.inner.account, closed, "Unsubscribed from market events");
        }
        closed
    }

    /// Whether any listener is active
    pub fn is_live(&self) -> bool {
        !self.inner.listeners.lock().is_empty()
    }

    /// Whether a refresh is in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::Acquire)
    }

    /// Mirrored listings, ascending by id
    pub fn listings(&self) -> Vec<ListingView> {
        self.inner.mirror.read().listings.clone()
    }

    /// Mirrored balance of the viewing account
    pub fn balance(&self) -> Amount {
        self.inner.mirror.read().balance
    }

    /// Feed lines in log order
    pub fn feed(&self) -> Vec<FeedEntry> {
        self.inner.feed.lock().values().cloned().collect()
    }

    /// Tear down listeners and clear the mirror
    pub fn shutdown(self) {
        self.unsubscribe_all();
        *self.inner.mirror.write() = Mirror {
            listings: Vec::new(),
            balance: Decimal::ZERO,
        };
        self.inner.feed.lock().clear();
        info!(account = %self.inner.account, "Sync client shut down");
    }
}

async fn listen(client: Weak<Inner>, mut subscription: Subscription) {
    while let Some(record) = subscription.recv().await {
        let Some(inner) = client.upgrade() else {
            break;
        };
        let client = SyncClient { inner };
        if let Err(e) = client.on_event(record).await {
            warn!(id = %subscription.id(), error = %e, "Event handling failed");
        }
    }
    debug!(id = %subscription.id(), "Listener finished");
}
