//! Slot recorder service

use slot_recorder::cache::RealtimeCache;
use slot_recorder::config::AppConfig;
use slot_recorder::database::Database;
use slot_recorder::errors::RecorderError;
use slot_recorder::mqtt::MqttClientBuilder;
use slot_recorder::pipeline::{Pipeline, UnresolvedDevices};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), RecorderError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration, preferring environment variables and config files
    let config = AppConfig::load()?;

    let mqtt_client = MqttClientBuilder::new(&config.mqtt)?
        .connect(&config.mqtt.topics)
        .await?;

    let database = Database::from_config(&config.database).await?;
    let cache = RealtimeCache::new();
    let unresolved = UnresolvedDevices::new();

    let pipeline = Pipeline::new(
        cache,
        database,
        unresolved,
        config.pipeline.shutdown_grace,
    );

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    };

    let result = pipeline.run(mqtt_client, shutdown).await;
    info!("Slot recorder stopped: {:?}", result);

    result
}
