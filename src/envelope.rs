//! Uplink envelope decoding.
//!
//! The network-server bridge publishes one JSON envelope per uplink on
//! `application/{applicationId}/device/{deviceId}/event/up`. Parsing turns
//! topic + payload into a normalized [`Measurement`] or fails the single
//! message; the ingestion loop never stops for a malformed envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    errors::RecorderError,
    models::{DevEui, Measurement, MeasurementSource},
    status,
};

/// Wire shape of an uplink envelope.
///
/// Also serialized by the simulation bridge, which is why the fields are
/// two-way serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UplinkEnvelope {
    pub device_info: DeviceInfo,
    /// Decoded sensor payload; field names come from the device codec and
    /// stay snake_case.
    pub object: MeasurementObject,
    pub rx_info: Vec<RxInfo>,
    /// Set by the simulation bridge; absent on real uplinks.
    #[serde(default)]
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub dev_eui: String,
    pub application_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MeasurementObject {
    /// Measured distance to the nearest obstruction, centimetres.
    pub distance_cm: Option<f64>,
    /// Discrete state token reported by the sensor, e.g. FREE / OCCUPIED.
    pub state: Option<String>,
    /// Occupancy percentage, if the device codec computes one itself.
    pub percentage: Option<f64>,
    /// Battery level percentage.
    pub battery: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RxInfo {
    pub gateway_id: String,
    pub rssi: i32,
    pub snr: f64,
    /// Gateway receive timestamp.
    pub time: DateTime<Utc>,
}

/// Parse an uplink from its topic and raw payload.
///
/// The device identifier in the topic path is authoritative; a differing
/// `deviceInfo.devEui` in the payload is logged and overridden.
pub fn parse(topic: &str, payload: &[u8]) -> Result<Measurement, RecorderError> {
    let parts: Vec<&str> = topic.split('/').collect();

    if parts.len() != 6
        || parts[0] != "application"
        || parts[2] != "device"
        || parts[4] != "event"
        || parts[5] != "up"
    {
        return Err(RecorderError::InvalidTopic(topic.to_string()));
    }

    let topic_eui: DevEui = parts[3].try_into()?;
    let application_id = parts[1].to_string();

    let envelope: UplinkEnvelope = serde_json::from_slice(payload)?;

    if let Ok(payload_eui) = DevEui::try_from(envelope.device_info.dev_eui.as_str()) {
        if payload_eui != topic_eui {
            warn!(
                topic_eui = %topic_eui,
                payload_eui = %payload_eui,
                "devEui mismatch between topic and payload, using topic value"
            );
        }
    }

    let rx = envelope
        .rx_info
        .first()
        .ok_or(RecorderError::MissingField("rxInfo"))?;

    if envelope.object.state.is_none() && envelope.object.distance_cm.is_none() {
        return Err(RecorderError::MissingField("object.state/distance_cm"));
    }

    let percentage = envelope
        .object
        .percentage
        .or_else(|| envelope.object.distance_cm.map(status::percentage_from_distance));

    Ok(Measurement {
        dev_eui: topic_eui,
        application_id,
        distance_cm: envelope.object.distance_cm,
        sensor_state: envelope.object.state.clone(),
        percentage,
        battery_level: envelope.object.battery,
        gateway_id: rx.gateway_id.clone(),
        rssi: rx.rssi,
        snr: rx.snr,
        observed_at: rx.time,
        source: if envelope.simulated {
            MeasurementSource::Simulated
        } else {
            MeasurementSource::Uplink
        },
    })
}

/// Short lossy excerpt of a raw payload, for parse-failure logs.
pub fn payload_excerpt(payload: &[u8]) -> String {
    const MAX: usize = 120;
    let text = String::from_utf8_lossy(payload);
    if text.len() <= MAX {
        text.into_owned()
    } else {
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}
