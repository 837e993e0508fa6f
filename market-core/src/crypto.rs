//! Hashing for the event log chain
//!
//! Every record commits to its position, encoded event, timestamp and the
//! hash of the record before it. Rewriting any stored event breaks the chain
//! from that point on.

use crate::types::{EventRecord, MarketEvent};
use crate::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Hash of the (non-existent) record before position 0
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Compute the chain hash of a record
pub fn hash_record(
    position: u64,
    event: &MarketEvent,
    recorded_at: &DateTime<Utc>,
    prev_hash: &[u8; 32],
) -> Result<[u8; 32]> {
    let encoded = bincode::serialize(event)?;

    let mut hasher = Sha256::new();
    hasher.update(position.to_be_bytes());
    hasher.update(&encoded);
    hasher.update(recorded_at.timestamp_nanos_opt().unwrap_or(0).to_be_bytes());
    hasher.update(prev_hash);

    Ok(hasher.finalize().into())
}

/// Build a linked record for `event`
pub fn seal(position: u64, event: MarketEvent, prev_hash: [u8; 32]) -> Result<EventRecord> {
    let recorded_at = Utc::now();
    let hash = hash_record(position, &event, &recorded_at, &prev_hash)?;

    Ok(EventRecord {
        position,
        event,
        recorded_at,
        prev_hash,
        hash,
    })
}

/// Check a record's own hash (not its link to the previous record)
pub fn verify_record(record: &EventRecord) -> Result<bool> {
    let expected = hash_record(
        record.position,
        &record.event,
        &record.recorded_at,
        &record.prev_hash,
    )?;
    Ok(expected == record.hash)
}

/// Hex encoding for logs
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}
