//! Errors for the slot recorder
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("MQTT connection failed")]
    MqttConnectionError(#[from] rumqttc::ConnectionError),

    #[error("MQTT client error")]
    MqttClientError(#[from] rumqttc::ClientError),

    #[error("MQTT client not connected")]
    NotConnected,

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid device EUI: {0}")]
    InvalidDevEui(String),

    #[error("Missing field in uplink envelope: {0}")]
    MissingField(&'static str),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device {0} has no slot assigned")]
    SlotNotAssigned(String),

    #[error("No node provisioned for slot {0}")]
    NoNodeForSlot(i64),

    #[error("Database migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),
}
