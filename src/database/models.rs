//! Row types for the durable store.

use chrono::{DateTime, Utc};

use crate::models::{MeasurementSource, SlotSnapshot, SlotStatus};
use crate::status;

/// State columns of one `parking_slots` row.
#[derive(Debug, sqlx::FromRow)]
pub struct SlotStateRow {
    pub status: String,
    pub last_distance_cm: Option<f64>,
    pub last_sensor_state: Option<String>,
    pub last_gateway_id: Option<String>,
    pub last_message_received_at: Option<DateTime<Utc>>,
}

impl SlotStateRow {
    /// Rebuild an in-memory snapshot from the durable row.
    ///
    /// A slot no telemetry has ever touched has no received-at timestamp;
    /// the epoch stands in so any real measurement passes the cache's
    /// ordering guard.
    pub fn into_snapshot(self) -> SlotSnapshot {
        let observed_at = self.last_message_received_at.unwrap_or(DateTime::UNIX_EPOCH);
        SlotSnapshot {
            status: SlotStatus::from_column(&self.status),
            percentage: self.last_distance_cm.map(status::percentage_from_distance),
            distance_cm: self.last_distance_cm,
            battery_level: None,
            sensor_state: self.last_sensor_state,
            gateway_id: self.last_gateway_id,
            source: MeasurementSource::Uplink,
            observed_at,
            processed_at: observed_at,
        }
    }
}
