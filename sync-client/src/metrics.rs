//! Prometheus metrics for the sync client

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Refresh attempts by outcome (refreshed/skipped/failed)
    pub static ref SYNC_REFRESH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sync_refresh_total",
        "Mirror refresh attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Events delivered to listeners
    pub static ref SYNC_EVENTS_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sync_events_received_total",
        "Events received by sync listeners",
        &["kind"]
    )
    .unwrap();
}
