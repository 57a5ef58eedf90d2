//! Data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RecorderError;

/// LoRaWAN device EUI.
///
/// A stable, globally unique 64-bit identifier for a physical sensor,
/// written as 16 hexadecimal characters. Stored lowercase so lookups are
/// not case-dependent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DevEui(String);

impl TryFrom<&str> for DevEui {
    type Error = RecorderError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.len() != 16 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RecorderError::InvalidDevEui(value.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }
}

impl DevEui {
    /// Get the normalized EUI string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DevEui {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical occupancy status of a parking slot.
///
/// Normalized from the raw sensor vocabulary; every consumer of slot state
/// sees only these four values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Occupied,
    Reserved,
    Unknown,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Occupied => "occupied",
            SlotStatus::Reserved => "reserved",
            SlotStatus::Unknown => "unknown",
        }
    }

    /// Parse a stored status column value. Anything unrecognized maps to
    /// `Unknown` rather than failing the read.
    pub fn from_column(value: &str) -> Self {
        match value {
            "available" => SlotStatus::Available,
            "occupied" => SlotStatus::Occupied,
            "reserved" => SlotStatus::Reserved,
            _ => SlotStatus::Unknown,
        }
    }
}

/// Where a realtime read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataSource {
    #[serde(rename = "mqtt-cache")]
    MqttCache,
    #[serde(rename = "database")]
    Database,
}

/// Origin of a measurement, carried through to the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementSource {
    Uplink,
    Simulated,
}

impl MeasurementSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementSource::Uplink => "uplink",
            MeasurementSource::Simulated => "simulated",
        }
    }
}

/// A single decoded uplink, normalized from the wire envelope.
///
/// `sensor_state` keeps the raw token exactly as the sensor sent it;
/// interpretation happens in status derivation. At least one of
/// `sensor_state`/`distance_cm` is guaranteed present by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub dev_eui: DevEui,
    pub application_id: String,
    pub distance_cm: Option<f64>,
    pub sensor_state: Option<String>,
    /// Occupancy percentage 0-100, reported by the sensor or derived from
    /// distance by the parser.
    pub percentage: Option<f64>,
    pub battery_level: Option<f64>,
    pub gateway_id: String,
    pub rssi: i32,
    pub snr: f64,
    /// Receive timestamp from the gateway, not ingest time.
    pub observed_at: DateTime<Utc>,
    pub source: MeasurementSource,
}

/// Latest known state of one slot, held in the realtime cache.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSnapshot {
    pub status: SlotStatus,
    pub distance_cm: Option<f64>,
    pub percentage: Option<f64>,
    pub battery_level: Option<f64>,
    pub sensor_state: Option<String>,
    pub gateway_id: Option<String>,
    pub source: MeasurementSource,
    /// Ordering key for the cache guard; equals the measurement's receive
    /// timestamp and the slot row's `last_message_received_at`.
    pub observed_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl SlotSnapshot {
    /// Snapshot of a measurement with its derived status. `processed_at`
    /// is the ingest wall-clock time, `observed_at` stays the gateway
    /// receive time.
    pub fn from_measurement(
        measurement: &Measurement,
        status: SlotStatus,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            distance_cm: measurement.distance_cm,
            percentage: measurement.percentage,
            battery_level: measurement.battery_level,
            sensor_state: measurement.sensor_state.clone(),
            gateway_id: Some(measurement.gateway_id.clone()),
            source: measurement.source,
            observed_at: measurement.observed_at,
            processed_at,
        }
    }
}

/// Realtime read surface response for one slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotRealtimeStatus {
    pub slot_id: i64,
    pub status: SlotStatus,
    pub distance_cm: Option<f64>,
    pub percentage: Option<f64>,
    pub battery_level: Option<f64>,
    pub sensor_state: Option<String>,
    pub gateway_id: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub data_source: DataSource,
}

/// Broker connection health, as reported by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionHealth {
    pub connected: bool,
    pub reconnect_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_eui_normalizes_case() {
        let eui = DevEui::try_from("A84041FFFE123456").unwrap();
        assert_eq!(eui.as_str(), "a84041fffe123456");
    }

    #[test]
    fn dev_eui_rejects_wrong_length() {
        assert!(DevEui::try_from("a84041").is_err());
        assert!(DevEui::try_from("a84041fffe1234567890").is_err());
    }

    #[test]
    fn dev_eui_rejects_non_hex() {
        assert!(DevEui::try_from("a84041fffe12345z").is_err());
    }

    #[test]
    fn slot_status_column_round_trip() {
        for status in [
            SlotStatus::Available,
            SlotStatus::Occupied,
            SlotStatus::Reserved,
            SlotStatus::Unknown,
        ] {
            assert_eq!(SlotStatus::from_column(status.as_str()), status);
        }
    }

    #[test]
    fn slot_status_column_unrecognized_is_unknown() {
        assert_eq!(SlotStatus::from_column("parked"), SlotStatus::Unknown);
    }

    #[test]
    fn data_source_serializes_with_wire_names() {
        assert_eq!(
            serde_json::to_string(&DataSource::MqttCache).unwrap(),
            "\"mqtt-cache\""
        );
        assert_eq!(
            serde_json::to_string(&DataSource::Database).unwrap(),
            "\"database\""
        );
    }
}
