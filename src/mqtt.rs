//! MQTT connection manager.
//!
//! Owns the broker connection for the life of the process. Connection loss
//! is always treated as transient: the event task backs off and keeps
//! polling, re-issuing subscriptions on every ConnAck, and the process
//! never exits because the broker went away.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    config::MqttConfig,
    envelope,
    errors::RecorderError,
    models::{ConnectionHealth, Measurement},
};

const BACKOFF_CAP_SECS: u64 = 30;
const JITTER_BOUND_MS: u64 = 250;

/// Connection health shared between the event task and client handles.
#[derive(Debug, Default)]
struct ConnectionState {
    connected: AtomicBool,
    reconnect_attempts: AtomicU32,
}

impl ConnectionState {
    fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    fn mark_disconnected(&self) -> u32 {
        self.connected.store(false, Ordering::SeqCst);
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn health(&self) -> ConnectionHealth {
        ConnectionHealth {
            connected: self.connected.load(Ordering::SeqCst),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
        }
    }
}

/// Builder for the MQTT client
pub struct MqttClientBuilder {
    client: AsyncClient,
    event_loop: EventLoop,
    tx: mpsc::Sender<Measurement>,
    rx: mpsc::Receiver<Measurement>,
}

pub struct MqttClient {
    client: AsyncClient,
    rx: mpsc::Receiver<Measurement>,
    state: Arc<ConnectionState>,
    _handle: tokio::task::JoinHandle<()>,
}

impl MqttClientBuilder {
    /// Create a new MQTT client
    pub fn new(config: &MqttConfig) -> Result<Self, RecorderError> {
        config.validate()?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);
        mqtt_options.set_keep_alive(Duration::from_secs(5));

        let (client, event_loop) = AsyncClient::new(mqtt_options, 100);
        let (tx, rx) = mpsc::channel(100);

        Ok(Self {
            client,
            event_loop,
            tx,
            rx,
        })
    }

    /// Connect to the broker and subscribe to the uplink topics.
    ///
    /// Subscription is not issued here; the event task subscribes on every
    /// ConnAck, which covers both the initial connect and every reconnect.
    pub async fn connect(self, topics: &[String]) -> Result<MqttClient, RecorderError> {
        let state = Arc::new(ConnectionState::default());

        let _handle = tokio::spawn(Self::process_events(
            self.tx,
            self.event_loop,
            self.client.clone(),
            topics.to_vec(),
            Arc::clone(&state),
        ));

        Ok(MqttClient {
            client: self.client,
            rx: self.rx,
            state,
            _handle,
        })
    }

    async fn subscribe(client: AsyncClient, topics: &[String]) -> Result<(), RecorderError> {
        for topic in topics.iter() {
            info!("Subscribing to topic: {}", topic);
            client.subscribe(topic, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    /// Process MQTT events.
    ///
    /// Parse failures drop the single message and keep the loop running.
    /// Poll errors mark the connection down and back off exponentially
    /// (capped, with clock-derived jitter so a fleet of recorders does not
    /// reconnect in lockstep) before polling again; rumqttc re-establishes
    /// the session on the next poll.
    async fn process_events(
        tx: mpsc::Sender<Measurement>,
        mut event_loop: EventLoop,
        client: AsyncClient,
        topics: Vec<String>,
        state: Arc<ConnectionState>,
    ) {
        let mut backoff_secs: u64 = 1;
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker, subscribing to topics");
                    state.mark_connected();
                    backoff_secs = 1;
                    if let Err(e) = Self::subscribe(client.clone(), &topics).await {
                        error!("Failed to subscribe: {}", e);
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match envelope::parse(&publish.topic, &publish.payload) {
                        Ok(measurement) => {
                            if tx.send(measurement).await.is_err() {
                                // Pipeline gone; shutting down.
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(
                                topic = %publish.topic,
                                payload = %envelope::payload_excerpt(&publish.payload),
                                "Failed to parse uplink, dropping message: {}",
                                e
                            );
                        }
                    }
                }
                Ok(_) => continue,
                Err(e) => {
                    let attempts = state.mark_disconnected();
                    let delay = backoff_delay(backoff_secs);
                    warn!(
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        "MQTT connection error, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    backoff_secs = (backoff_secs * 2).min(BACKOFF_CAP_SECS);
                }
            }
        }
    }
}

/// Exponential backoff step plus 0-250 ms of jitter taken from the clock.
fn backoff_delay(backoff_secs: u64) -> Duration {
    let jitter_ms = Utc::now().timestamp_millis().unsigned_abs() % JITTER_BOUND_MS;
    Duration::from_secs(backoff_secs) + Duration::from_millis(jitter_ms)
}

impl MqttClient {
    /// Receive the next parsed measurement. `None` once the connection
    /// task has stopped.
    pub async fn recv(&mut self) -> Option<Measurement> {
        self.rx.recv().await
    }

    /// Publish an outbound payload, e.g. a simulated uplink.
    ///
    /// Fails fast while the broker is unreachable instead of queuing; a
    /// simulation triggered during an outage should report the outage.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RecorderError> {
        if !self.state.health().connected {
            return Err(RecorderError::NotConnected);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    pub fn status(&self) -> ConnectionHealth {
        self.state.health()
    }

    /// Cheap cloneable publisher/health handle for components that do not
    /// consume the inbound stream.
    pub fn handle(&self) -> MqttHandle {
        MqttHandle {
            client: self.client.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub async fn disconnect(&self) -> Result<(), RecorderError> {
        self.client.disconnect().await?;
        Ok(())
    }
}

/// Publish/health handle detached from the receive side.
#[derive(Clone)]
pub struct MqttHandle {
    client: AsyncClient,
    state: Arc<ConnectionState>,
}

impl MqttHandle {
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RecorderError> {
        if !self.state.health().connected {
            return Err(RecorderError::NotConnected);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    pub fn status(&self) -> ConnectionHealth {
        self.state.health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_starts_disconnected() {
        let state = ConnectionState::default();
        let health = state.health();
        assert!(!health.connected);
        assert_eq!(health.reconnect_attempts, 0);
    }

    #[test]
    fn disconnect_counts_attempts_and_connack_resets() {
        let state = ConnectionState::default();
        assert_eq!(state.mark_disconnected(), 1);
        assert_eq!(state.mark_disconnected(), 2);
        assert_eq!(state.mark_disconnected(), 3);
        assert_eq!(state.health().reconnect_attempts, 3);
        assert!(!state.health().connected);

        state.mark_connected();
        let health = state.health();
        assert!(health.connected);
        assert_eq!(health.reconnect_attempts, 0);
    }

    #[test]
    fn backoff_delay_stays_within_jitter_bound() {
        for base in [1u64, 2, 4, 30] {
            let delay = backoff_delay(base);
            assert!(delay >= Duration::from_secs(base));
            assert!(delay < Duration::from_secs(base) + Duration::from_millis(JITTER_BOUND_MS));
        }
    }

    #[tokio::test]
    async fn publish_fails_fast_when_disconnected() {
        let config = MqttConfig {
            host: "localhost".to_string(),
            // Nothing listens here; the event task stays in its backoff loop.
            port: 39183,
            client_id: "test-client".to_string(),
            topics: vec!["application/+/device/+/event/up".to_string()],
        };
        let builder = MqttClientBuilder::new(&config).unwrap();
        let client = builder.connect(&config.topics).await.unwrap();

        // No broker is running; the connection state never reaches connected.
        let result = client.publish("application/a/device/b/event/up", vec![]).await;
        assert!(matches!(result, Err(RecorderError::NotConnected)));
    }
}
