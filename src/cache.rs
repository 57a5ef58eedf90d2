//! In-memory realtime snapshot store.
//!
//! Latest known state per slot, shared between the ingest pipeline and
//! read requests. Lost on restart; readers fall back to the durable slot
//! row on a miss.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::SlotSnapshot;

const SHARDS: usize = 16;

/// Thread-safe latest-snapshot store, hash-partitioned by slot id so
/// writers for unrelated slots never contend on one lock.
#[derive(Clone)]
pub struct RealtimeCache {
    shards: Arc<Vec<RwLock<HashMap<i64, SlotSnapshot>>>>,
}

impl RealtimeCache {
    pub fn new() -> Self {
        Self {
            shards: Arc::new((0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect()),
        }
    }

    fn shard(&self, slot_id: i64) -> &RwLock<HashMap<i64, SlotSnapshot>> {
        &self.shards[(slot_id.unsigned_abs() as usize) % SHARDS]
    }

    /// Store a snapshot unless a newer one is already cached.
    ///
    /// A snapshot whose `observed_at` is strictly older than the cached
    /// one is a late delivery and must not regress the slot; it is
    /// rejected as a no-op. Equal timestamps are accepted so re-applying
    /// the same measurement stays idempotent. Returns whether the
    /// snapshot was stored.
    pub fn upsert(&self, slot_id: i64, snapshot: SlotSnapshot) -> bool {
        let mut shard = self.shard(slot_id).write().unwrap();
        match shard.get(&slot_id) {
            Some(current) if snapshot.observed_at < current.observed_at => false,
            _ => {
                shard.insert(slot_id, snapshot);
                true
            }
        }
    }

    pub fn get(&self, slot_id: i64) -> Option<SlotSnapshot> {
        self.shard(slot_id).read().unwrap().get(&slot_id).cloned()
    }

    /// Number of slots with a cached snapshot.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RealtimeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MeasurementSource, SlotStatus};
    use chrono::{TimeZone, Utc};

    fn snapshot(status: SlotStatus, observed_secs: u32) -> SlotSnapshot {
        let observed = Utc
            .with_ymd_and_hms(2026, 8, 6, 9, 0, observed_secs)
            .unwrap();
        SlotSnapshot {
            status,
            distance_cm: Some(172.0),
            percentage: Some(86.0),
            battery_level: Some(90.0),
            sensor_state: Some("FREE".to_string()),
            gateway_id: Some("gw-01".to_string()),
            source: MeasurementSource::Uplink,
            observed_at: observed,
            processed_at: observed,
        }
    }

    #[test]
    fn upsert_and_get() {
        let cache = RealtimeCache::new();
        assert!(cache.upsert(7, snapshot(SlotStatus::Available, 0)));
        let cached = cache.get(7).unwrap();
        assert_eq!(cached.status, SlotStatus::Available);
    }

    #[test]
    fn miss_returns_none() {
        let cache = RealtimeCache::new();
        assert!(cache.get(404).is_none());
    }

    #[test]
    fn stale_snapshot_is_rejected() {
        let cache = RealtimeCache::new();
        assert!(cache.upsert(7, snapshot(SlotStatus::Occupied, 30)));
        assert!(!cache.upsert(7, snapshot(SlotStatus::Available, 10)));
        assert_eq!(cache.get(7).unwrap().status, SlotStatus::Occupied);
    }

    #[test]
    fn newer_snapshot_replaces() {
        let cache = RealtimeCache::new();
        assert!(cache.upsert(7, snapshot(SlotStatus::Occupied, 10)));
        assert!(cache.upsert(7, snapshot(SlotStatus::Available, 30)));
        assert_eq!(cache.get(7).unwrap().status, SlotStatus::Available);
    }

    #[test]
    fn equal_timestamp_reapply_is_idempotent() {
        let cache = RealtimeCache::new();
        let snap = snapshot(SlotStatus::Available, 10);
        assert!(cache.upsert(7, snap.clone()));
        assert!(cache.upsert(7, snap.clone()));
        assert_eq!(cache.get(7).unwrap(), snap);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn slots_are_isolated() {
        let cache = RealtimeCache::new();
        assert!(cache.upsert(1, snapshot(SlotStatus::Available, 10)));
        assert!(cache.upsert(17, snapshot(SlotStatus::Occupied, 10)));
        assert_eq!(cache.get(1).unwrap().status, SlotStatus::Available);
        assert_eq!(cache.get(17).unwrap().status, SlotStatus::Occupied);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clone_shares_storage() {
        let cache = RealtimeCache::new();
        let other = cache.clone();
        assert!(cache.upsert(3, snapshot(SlotStatus::Reserved, 5)));
        assert_eq!(other.get(3).unwrap().status, SlotStatus::Reserved);
    }
}
