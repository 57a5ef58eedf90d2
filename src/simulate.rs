//! Simulation bridge.
//!
//! Operator-triggered test traffic: build an envelope with the same shape
//! as a real uplink and publish it to the broker. The connection manager
//! is subscribed to the same topic, so the message comes back through the
//! identical parse → resolve → derive → commit path as hardware traffic.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    database::Database,
    envelope::{DeviceInfo, MeasurementObject, RxInfo, UplinkEnvelope},
    errors::RecorderError,
    mqtt::MqttHandle,
};

// Signal values reported for synthetic receives.
const SIMULATED_RSSI: i32 = -60;
const SIMULATED_SNR: f64 = 10.0;

/// Desired sensor reading for one slot.
#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub slot_id: i64,
    pub state: Option<String>,
    pub distance_cm: Option<f64>,
    pub gateway_id: String,
}

pub struct SimulationBridge {
    database: Database,
    mqtt: MqttHandle,
}

impl SimulationBridge {
    pub fn new(database: Database, mqtt: MqttHandle) -> Self {
        Self { database, mqtt }
    }

    /// Publish a synthetic uplink for the node serving the requested slot.
    ///
    /// Fails if the slot has no node (nothing could ever report for it) or
    /// if the broker is currently unreachable.
    pub async fn inject(&self, request: &SimulationRequest) -> Result<(), RecorderError> {
        let (dev_eui, application_id) = self.database.node_for_slot(request.slot_id).await?;

        let envelope = build_envelope(&dev_eui, &application_id, request, Utc::now());
        let topic = format!("application/{application_id}/device/{dev_eui}/event/up");
        let payload = serde_json::to_vec(&envelope)?;

        info!(
            slot_id = request.slot_id,
            %topic,
            "Publishing simulated uplink"
        );
        self.mqtt.publish(&topic, payload).await
    }
}

fn build_envelope(
    dev_eui: &str,
    application_id: &str,
    request: &SimulationRequest,
    received_at: DateTime<Utc>,
) -> UplinkEnvelope {
    UplinkEnvelope {
        device_info: DeviceInfo {
            dev_eui: dev_eui.to_string(),
            application_id: application_id.to_string(),
        },
        object: MeasurementObject {
            distance_cm: request.distance_cm,
            state: request.state.clone(),
            percentage: None,
            battery: None,
        },
        rx_info: vec![RxInfo {
            gateway_id: request.gateway_id.clone(),
            rssi: SIMULATED_RSSI,
            snr: SIMULATED_SNR,
            time: received_at,
        }],
        simulated: true,
    }
}
