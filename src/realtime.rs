//! Realtime read surface.
//!
//! Answers "what is the latest known state of this slot" from the cache
//! when possible, from the durable slot row otherwise. The `data_source`
//! tag tells observers which of the two served the answer.

use crate::{
    cache::RealtimeCache,
    database::Database,
    errors::RecorderError,
    models::{DataSource, SlotRealtimeStatus, SlotSnapshot},
};

pub struct RealtimeStatus {
    cache: RealtimeCache,
    database: Database,
}

impl RealtimeStatus {
    pub fn new(cache: RealtimeCache, database: Database) -> Self {
        Self { cache, database }
    }

    /// Latest status for a slot; `None` if the slot does not exist.
    pub async fn slot_status(
        &self,
        slot_id: i64,
    ) -> Result<Option<SlotRealtimeStatus>, RecorderError> {
        if let Some(snapshot) = self.cache.get(slot_id) {
            return Ok(Some(respond(slot_id, snapshot, DataSource::MqttCache)));
        }

        let row = self.database.fetch_slot_snapshot(slot_id).await?;
        Ok(row.map(|snapshot| respond(slot_id, snapshot, DataSource::Database)))
    }
}

fn respond(slot_id: i64, snapshot: SlotSnapshot, data_source: DataSource) -> SlotRealtimeStatus {
    SlotRealtimeStatus {
        slot_id,
        status: snapshot.status,
        distance_cm: snapshot.distance_cm,
        percentage: snapshot.percentage,
        battery_level: snapshot.battery_level,
        sensor_state: snapshot.sensor_state,
        gateway_id: snapshot.gateway_id,
        processed_at: snapshot.processed_at,
        data_source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MeasurementSource, SlotStatus};
    use chrono::{TimeZone, Utc};

    #[test]
    fn respond_carries_snapshot_fields_and_tag() {
        let observed = Utc.with_ymd_and_hms(2026, 8, 6, 9, 0, 0).unwrap();
        let snapshot = SlotSnapshot {
            status: SlotStatus::Available,
            distance_cm: Some(172.0),
            percentage: Some(86.0),
            battery_level: Some(91.0),
            sensor_state: Some("FREE".to_string()),
            gateway_id: Some("gw-01".to_string()),
            source: MeasurementSource::Uplink,
            observed_at: observed,
            processed_at: observed,
        };

        let status = respond(7, snapshot, DataSource::MqttCache);
        assert_eq!(status.slot_id, 7);
        assert_eq!(status.status, SlotStatus::Available);
        assert_eq!(status.distance_cm, Some(172.0));
        assert_eq!(status.gateway_id.as_deref(), Some("gw-01"));
        assert_eq!(status.data_source, DataSource::MqttCache);
        assert_eq!(status.processed_at, observed);
    }
}
