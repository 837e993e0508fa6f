//! Append-only, replayable event log
//!
//! Records are persisted in RocksDB and fanned out live through a
//! `tokio::sync::broadcast` channel. A subscription first replays stored
//! records from its starting position, then follows the live channel.
//!
//! # Gap-free handover
//!
//! `append` persists and broadcasts while holding the log lock. `subscribe`
//! takes its broadcast receiver and reads the head position under the same
//! lock. Everything below the head is replayed from storage and everything
//! at or above it arrives on the receiver, so nothing is missed or repeated.
//! A receiver that lags behind the channel capacity back-fills the missed
//! range from storage instead of dropping events.

use crate::config::EventLogConfig;
use crate::crypto::{seal, verify_record, GENESIS_HASH};
use crate::types::{EventKind, EventRecord, MarketEvent};
use crate::{Error, Result, Storage};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Records read from storage per replay step
const REPLAY_BATCH: u64 = 256;

/// Handle identifying a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct LogState {
    next_position: u64,
    last_hash: [u8; 32],
}

struct SubscriberEntry {
    kind: EventKind,
    // Dropping the sender closes the subscription
    _close: watch::Sender<()>,
}

type Registry = Arc<Mutex<HashMap<SubscriptionId, SubscriberEntry>>>;

/// The event log
pub struct EventLog {
    storage: Arc<Storage>,
    state: Mutex<LogState>,
    sender: broadcast::Sender<EventRecord>,
    subscribers: Registry,
    next_subscription: AtomicU64,
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("head", &self.head())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventLog {
    /// Open the log, resuming after the last stored record
    pub fn open(storage: Arc<Storage>, config: &EventLogConfig) -> Result<Self> {
        let state = match storage.latest_event()? {
            Some(last) => LogState {
                next_position: last.position + 1,
                last_hash: last.hash,
            },
            None => LogState {
                next_position: 0,
                last_hash: GENESIS_HASH,
            },
        };

        tracing::debug!(head = state.next_position, "Event log opened");

        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));

        Ok(Self {
            storage,
            state: Mutex::new(state),
            sender,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Append an event on its own
    pub fn append(&self, event: MarketEvent) -> Result<EventRecord> {
        let storage = self.storage.clone();
        self.append_with(event, |record| storage.put_event(record))
    }

    /// Append an event, letting `persist` write it (plus anything that must
    /// land atomically with it). Nothing is advanced or broadcast if
    /// `persist` fails.
    pub fn append_with<F>(&self, event: MarketEvent, persist: F) -> Result<EventRecord>
    where
        F: FnOnce(&EventRecord) -> Result<()>,
    {
        let mut state = self.state.lock();

        let record = seal(state.next_position, event, state.last_hash)?;
        persist(&record)?;

        state.next_position = record.position + 1;
        state.last_hash = record.hash;

        // No receivers is fine: late subscribers replay from storage
        let receivers = self.sender.send(record.clone()).unwrap_or(0);

        tracing::debug!(
            position = record.position,
            kind = %record.kind(),
            receivers,
            "Event appended"
        );

        Ok(record)
    }

    /// Subscribe to `kind`, starting at `from_position` (0 replays everything)
    pub fn subscribe(&self, kind: EventKind, from_position: u64) -> Subscription {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (close_tx, close_rx) = watch::channel(());

        let (receiver, head) = {
            let state = self.state.lock();
            (self.sender.subscribe(), state.next_position)
        };

        self.subscribers.lock().insert(
            id,
            SubscriberEntry {
                kind,
                _close: close_tx,
            },
        );

        tracing::debug!(%id, %kind, from_position, head, "Subscription created");

        Subscription {
            id,
            kind,
            storage: self.storage.clone(),
            registry: self.subscribers.clone(),
            receiver,
            closed: close_rx,
            backlog: VecDeque::new(),
            cursor: from_position,
            replay_until: head,
        }
    }

    /// Close a subscription. Unknown or already-closed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.lock().remove(&id);
        if let Some(entry) = &removed {
            tracing::debug!(%id, kind = %entry.kind, "Subscription closed");
        }
        removed.is_some()
    }

    /// Number of open subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Position the next appended record will get
    pub fn head(&self) -> u64 {
        self.state.lock().next_position
    }

    /// Stored records from `position` up to the current head
    pub fn events_from(&self, position: u64) -> Result<Vec<EventRecord>> {
        let head = self.head();
        self.storage.events_range(position, head)
    }

    /// Re-walk the whole log and check positions and hash links.
    /// Returns the number of records verified.
    pub fn verify_chain(&self) -> Result<u64> {
        let head = self.head();
        let mut expected_prev = GENESIS_HASH;
        let mut position = 0u64;

        while position < head {
            let batch = self
                .storage
                .events_range(position, head.min(position.saturating_add(REPLAY_BATCH)))?;
            if batch.is_empty() {
                return Err(Error::InvariantViolation(format!(
                    "event log missing position {}",
                    position
                )));
            }

            for record in batch {
                if record.position != position {
                    return Err(Error::InvariantViolation(format!(
                        "expected position {}, found {}",
                        position, record.position
                    )));
                }
                if record.prev_hash != expected_prev || !verify_record(&record)? {
                    return Err(Error::InvariantViolation(format!(
                        "hash chain broken at position {}",
                        position
                    )));
                }
                expected_prev = record.hash;
                position += 1;
            }
        }

        Ok(position)
    }
}

/// Live subscription to one event kind
///
/// Dropping it has the same effect as `EventLog::unsubscribe`.
pub struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    storage: Arc<Storage>,
    registry: Registry,
    receiver: broadcast::Receiver<EventRecord>,
    closed: watch::Receiver<()>,
    backlog: VecDeque<EventRecord>,
    /// Next position to deliver (of any kind)
    cursor: u64,
    /// Positions below this are read from storage rather than the channel
    replay_until: u64,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Subscription {
    /// Subscription handle
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Kind this subscription receives
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next matching record, in position order.
    ///
    /// Returns `None` once the subscription is closed, the log is dropped,
    /// or storage fails during replay.
    pub async fn recv(&mut self) -> Option<EventRecord> {
        loop {
            if self.closed.has_changed().is_err() {
                return None;
            }

            if let Some(record) = self.backlog.pop_front() {
                self.cursor = record.position + 1;
                if record.kind() == self.kind {
                    return Some(record);
                }
                continue;
            }

            if self.cursor < self.replay_until {
                let to = self
                    .replay_until
                    .min(self.cursor.saturating_add(REPLAY_BATCH));
                match self.storage.events_range(self.cursor, to) {
                    Ok(batch) if batch.is_empty() => self.replay_until = self.cursor,
                    Ok(batch) => self.backlog.extend(batch),
                    Err(e) => {
                        tracing::error!(id = %self.id, error = %e, "Replay failed");
                        return None;
                    }
                }
                continue;
            }

            tokio::select! {
                biased;

                _ = self.closed.changed() => return None,

                received = self.receiver.recv() => match received {
                    Ok(record) if record.position < self.cursor => continue,
                    Ok(record) if record.position > self.cursor => {
                        // Missed something; it is in storage
                        self.replay_until = record.position + 1;
                    }
                    Ok(record) => {
                        self.backlog.push_back(record);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(id = %self.id, skipped, "Subscriber lagged, back-filling");
                        self.replay_until = u64::MAX;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}
