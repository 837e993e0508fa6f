//! Core types for the marketplace
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for prices)
//! - Immutability once recorded (articles only gain a buyer, events never change)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount of the settlement asset
pub type Amount = Decimal;

/// Account identity supplied by the signing authority
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Article identifier, assigned sequentially from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArticleId(u64);

impl ArticleId {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Big-endian key bytes (sort order == id order)
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A listing record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Sequential identifier
    pub id: ArticleId,

    /// Account that listed the article
    pub seller: AccountId,

    /// Purchaser, `None` while the article is for sale
    pub buyer: Option<AccountId>,

    /// Display name
    pub name: String,

    /// Free-form description
    pub description: String,

    /// Fixed price in the settlement asset
    pub price: Amount,
}

impl Article {
    /// An article is for sale until a buyer is recorded
    pub fn is_for_sale(&self) -> bool {
        self.buyer.is_none()
    }
}

/// Event kind, used to route subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    /// An article was listed
    Listed = 1,
    /// An article was bought
    Sold = 2,
}

impl EventKind {
    /// Both kinds, in a fixed order
    pub const ALL: [EventKind; 2] = [EventKind::Listed, EventKind::Sold];

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Listed => "listed",
            EventKind::Sold => "sold",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Domain event emitted on every accepted transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketEvent {
    /// Article listed for sale
    Listed {
        /// Article id
        id: ArticleId,
        /// Seller
        seller: AccountId,
        /// Article name
        name: String,
        /// Listing price
        price: Amount,
    },

    /// Article bought
    Sold {
        /// Article id
        id: ArticleId,
        /// Seller
        seller: AccountId,
        /// Buyer
        buyer: AccountId,
        /// Article name
        name: String,
        /// Price paid
        price: Amount,
    },
}

impl MarketEvent {
    /// `Listed` event for a freshly created article
    pub fn listed(article: &Article) -> Self {
        MarketEvent::Listed {
            id: article.id,
            seller: article.seller.clone(),
            name: article.name.clone(),
            price: article.price,
        }
    }

    /// `Sold` event for an article that now has `buyer`
    pub fn sold(article: &Article, buyer: AccountId) -> Self {
        MarketEvent::Sold {
            id: article.id,
            seller: article.seller.clone(),
            buyer,
            name: article.name.clone(),
            price: article.price,
        }
    }

    /// Kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            MarketEvent::Listed { .. } => EventKind::Listed,
            MarketEvent::Sold { .. } => EventKind::Sold,
        }
    }

    /// Article this event is about
    pub fn article_id(&self) -> ArticleId {
        match self {
            MarketEvent::Listed { id, .. } | MarketEvent::Sold { id, .. } => *id,
        }
    }

    /// Human-readable line for activity feeds
    pub fn describe(&self) -> String {
        match self {
            MarketEvent::Listed { name, .. } => format!("{} is for sale", name),
            MarketEvent::Sold { buyer, name, .. } => format!("{} bought {}", buyer, name),
        }
    }
}

/// Event as stored in the log: position, timestamp and hash chain link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position in the log (replay cursor), starting at 0
    pub position: u64,

    /// The domain event
    pub event: MarketEvent,

    /// Time the event was appended
    pub recorded_at: DateTime<Utc>,

    /// Hash of the previous record (zeroes for the first)
    pub prev_hash: [u8; 32],

    /// Hash of this record
    pub hash: [u8; 32],
}

impl EventRecord {
    /// Kind of the wrapped event
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

/// Result of an accepted transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Article the transition applied to
    pub article_id: ArticleId,

    /// Event emitted by the transition
    pub event: EventRecord,
}
