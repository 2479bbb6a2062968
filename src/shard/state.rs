//! Shard state tracking
//!
//! Shared registry of per-shard session state, read by the health
//! endpoints and metrics without touching the shards themselves.

use crate::shard::session::ShardStatus;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tracked state for a single shard session
#[derive(Debug)]
pub struct ShardEntry {
    pub status: ShardStatus,
    pub ping: Option<Duration>,
    pub messages_received: AtomicU64,
    pub last_message: Option<Instant>,
}

impl Default for ShardEntry {
    fn default() -> Self {
        Self {
            status: ShardStatus::Closed,
            ping: None,
            messages_received: AtomicU64::new(0),
            last_message: None,
        }
    }
}

/// Shared registry across all shard sessions in the process
#[derive(Debug, Clone)]
pub struct ShardRegistry {
    inner: Arc<DashMap<u64, ShardEntry>>,
}

impl ShardRegistry {
    /// Create a registry with one entry per shard ID
    pub fn new(shard_ids: impl Iterator<Item = u64>) -> Self {
        let shards = DashMap::new();
        for shard_id in shard_ids {
            shards.insert(shard_id, ShardEntry::default());
        }

        Self {
            inner: Arc::new(shards),
        }
    }

    /// Update a shard's connection status
    pub fn set_status(&self, shard_id: u64, status: ShardStatus) {
        if let Some(mut entry) = self.inner.get_mut(&shard_id) {
            entry.status = status;
        }
        crate::metrics::set_shards_connected(self.connected_shards());
    }

    /// Record the latest measured auth round-trip
    pub fn set_ping(&self, shard_id: u64, ping: Duration) {
        if let Some(mut entry) = self.inner.get_mut(&shard_id) {
            entry.ping = Some(ping);
        }
    }

    /// Count one inbound message and stamp its arrival
    pub fn record_message(&self, shard_id: u64) {
        if let Some(mut entry) = self.inner.get_mut(&shard_id) {
            entry.messages_received.fetch_add(1, Ordering::Relaxed);
            entry.last_message = Some(Instant::now());
        }
    }

    /// Get a shard's current status
    pub fn get_status(&self, shard_id: u64) -> Option<ShardStatus> {
        self.inner.get(&shard_id).map(|e| e.status)
    }

    /// Total messages received across all shards
    pub fn total_messages(&self) -> u64 {
        self.inner
            .iter()
            .map(|e| e.messages_received.load(Ordering::Relaxed))
            .sum()
    }

    /// Count of shards currently in the Connected state
    pub fn connected_shards(&self) -> usize {
        self.inner
            .iter()
            .filter(|e| e.status.is_connected())
            .count()
    }

    /// Total shard count in this process
    pub fn shard_count(&self) -> usize {
        self.inner.len()
    }

    /// Ready when every configured shard holds an open session, or when
    /// no shards are configured at all.
    pub fn is_ready(&self) -> bool {
        self.shard_count() == 0 || self.connected_shards() > 0
    }
}
