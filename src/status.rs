//! Canonical status derivation.
//!
//! Pure mapping from one measurement to one [`SlotStatus`]; no I/O, no
//! clock, so replaying a measurement always derives the same status.

use crate::models::{Measurement, SlotStatus};

/// Full sensing range of the mounted distance sensors, centimetres. The
/// occupancy percentage is the measured distance relative to this range.
pub const FULL_RANGE_CM: f64 = 200.0;

const AVAILABLE_THRESHOLD: f64 = 80.0;
const RESERVED_THRESHOLD: f64 = 60.0;

/// Derive the canonical slot status from a measurement.
///
/// An explicit state token takes precedence over the percentage signal.
/// Unrecognized tokens map to `Unknown` rather than falling through to the
/// percentage path: a sensor that speaks tokens is expected to keep
/// speaking them, and a token we cannot read is a sensor fault worth
/// surfacing, not a gap to paper over.
pub fn derive(measurement: &Measurement) -> SlotStatus {
    if let Some(token) = measurement.sensor_state.as_deref() {
        return from_state_token(token);
    }
    if let Some(percentage) = measurement.percentage {
        return from_percentage(percentage);
    }
    SlotStatus::Unknown
}

/// Map a discrete sensor token to a status. Comparison is exact after
/// trimming; the sensor vocabulary is uppercase.
pub fn from_state_token(token: &str) -> SlotStatus {
    match token.trim() {
        "FREE" => SlotStatus::Available,
        "OCCUPIED" => SlotStatus::Occupied,
        _ => SlotStatus::Unknown,
    }
}

/// Map an occupancy percentage (0-100) to a status.
///
/// The 60-79 band is indeterminate in the sensor data; it resolves to
/// `Occupied` as the conservative reading.
pub fn from_percentage(percentage: f64) -> SlotStatus {
    if percentage >= AVAILABLE_THRESHOLD {
        SlotStatus::Available
    } else if percentage < RESERVED_THRESHOLD {
        SlotStatus::Reserved
    } else {
        SlotStatus::Occupied
    }
}

/// Occupancy percentage for a raw distance reading, clamped to 0-100.
pub fn percentage_from_distance(distance_cm: f64) -> f64 {
    (distance_cm / FULL_RANGE_CM * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DevEui, MeasurementSource};
    use chrono::{TimeZone, Utc};

    fn measurement(state: Option<&str>, percentage: Option<f64>) -> Measurement {
        Measurement {
            dev_eui: DevEui::try_from("a84041fffe123456").unwrap(),
            application_id: "lot-42".to_string(),
            distance_cm: None,
            sensor_state: state.map(str::to_string),
            percentage,
            battery_level: None,
            gateway_id: "gw-01".to_string(),
            rssi: -95,
            snr: 8.0,
            observed_at: Utc.with_ymd_and_hms(2026, 8, 6, 9, 0, 0).unwrap(),
            source: MeasurementSource::Uplink,
        }
    }

    #[test]
    fn free_token_is_available() {
        assert_eq!(
            derive(&measurement(Some("FREE"), None)),
            SlotStatus::Available
        );
    }

    #[test]
    fn occupied_token_is_occupied() {
        assert_eq!(
            derive(&measurement(Some("OCCUPIED"), None)),
            SlotStatus::Occupied
        );
    }

    #[test]
    fn unrecognized_token_is_unknown() {
        for token in ["BLOCKED", "free", "Occupied", ""] {
            assert_eq!(
                derive(&measurement(Some(token), Some(95.0))),
                SlotStatus::Unknown,
                "token {token:?}"
            );
        }
    }

    #[test]
    fn token_trims_whitespace() {
        assert_eq!(
            derive(&measurement(Some(" FREE "), None)),
            SlotStatus::Available
        );
    }

    #[test]
    fn token_takes_precedence_over_percentage() {
        assert_eq!(
            derive(&measurement(Some("FREE"), Some(10.0))),
            SlotStatus::Available
        );
    }

    #[test]
    fn percentage_bands() {
        assert_eq!(from_percentage(100.0), SlotStatus::Available);
        assert_eq!(from_percentage(80.0), SlotStatus::Available);
        assert_eq!(from_percentage(79.9), SlotStatus::Occupied);
        assert_eq!(from_percentage(60.0), SlotStatus::Occupied);
        assert_eq!(from_percentage(59.9), SlotStatus::Reserved);
        assert_eq!(from_percentage(0.0), SlotStatus::Reserved);
    }

    #[test]
    fn no_signal_is_unknown() {
        assert_eq!(derive(&measurement(None, None)), SlotStatus::Unknown);
    }

    #[test]
    fn derivation_is_deterministic() {
        let m = measurement(None, Some(72.5));
        assert_eq!(derive(&m), derive(&m));
        assert_eq!(derive(&m), SlotStatus::Occupied);
    }

    #[test]
    fn distance_percentage_clamps() {
        assert_eq!(percentage_from_distance(100.0), 50.0);
        assert_eq!(percentage_from_distance(250.0), 100.0);
        assert_eq!(percentage_from_distance(-5.0), 0.0);
    }
}
