//! Sync client configuration

use serde::{Deserialize, Serialize};

/// Sync client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Log position listeners replay from
    pub replay_from: u64,

    /// Feed lines retained (oldest dropped first)
    pub feed_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            replay_from: 0,
            feed_capacity: 256,
        }
    }
}
