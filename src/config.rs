//! Application configuration

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::RecorderError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Subscription filters; the default covers every device under every
    /// application: `application/+/device/+/event/up`.
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// How long in-flight persistence writes may keep running after a
    /// shutdown signal before the process disconnects anyway.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub shutdown_grace: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("SLOTRECORDER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("mqtt.topics"),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl MqttConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.host.is_empty() {
            return Err(RecorderError::ConfigurationError {
                message: "MQTT host cannot be empty".to_string(),
            });
        }
        if self.client_id.is_empty() {
            return Err(RecorderError::ConfigurationError {
                message: "MQTT client id cannot be empty".to_string(),
            });
        }
        if self.topics.is_empty() {
            return Err(RecorderError::ConfigurationError {
                message: "At least one MQTT topic filter is required".to_string(),
            });
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.url.is_empty() {
            return Err(RecorderError::ConfigurationError {
                message: "Database URL cannot be empty".to_string(),
            });
        }
        if self.max_connections == 0 {
            return Err(RecorderError::ConfigurationError {
                message: "Database pool needs at least one connection".to_string(),
            });
        }
        Ok(())
    }
}
