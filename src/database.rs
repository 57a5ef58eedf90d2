//! Durable slot state and history log.

mod models;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::{
    config::DatabaseConfig,
    errors::RecorderError,
    models::{DevEui, Measurement, SlotSnapshot},
};
use self::models::SlotStateRow;

/// Attempts per durable write, including the first one.
const WRITE_ATTEMPTS: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Database layer: device resolution, write-through commits and the
/// fallback read for cache misses.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Wrap an existing pool and bring the schema up to date.
    pub async fn new(pool: PgPool) -> Result<Self, RecorderError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self, RecorderError> {
        config.validate()?;
        info!(max_connections = config.max_connections, "Connecting to database");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Self::new(pool).await
    }

    pub async fn from_url(url: &str) -> Result<Self, RecorderError> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        Self::new(pool).await
    }

    /// Map a device identifier to its parking slot.
    ///
    /// Unknown devices and devices without a slot assignment are both
    /// resolution failures; neither creates a node. Provisioning owns node
    /// creation because a node is only meaningful with a slot attached.
    pub async fn resolve_device(&self, dev_eui: &DevEui) -> Result<i64, RecorderError> {
        let slot_id: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT slot_id FROM nodes WHERE dev_eui = $1")
                .bind(dev_eui.as_str())
                .fetch_optional(&self.pool)
                .await?;

        match slot_id {
            None => Err(RecorderError::UnknownDevice(dev_eui.to_string())),
            Some((None,)) => Err(RecorderError::SlotNotAssigned(dev_eui.to_string())),
            Some((Some(id),)) => Ok(id),
        }
    }

    /// The node serving a slot, as (dev_eui, application_id). Used by the
    /// simulation bridge to address synthetic uplinks.
    pub async fn node_for_slot(&self, slot_id: i64) -> Result<(String, String), RecorderError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT dev_eui, application_id FROM nodes WHERE slot_id = $1")
                .bind(slot_id)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or(RecorderError::NoNodeForSlot(slot_id))
    }

    /// Write one accepted measurement through to durable state.
    ///
    /// Single transaction: slot row update, history append, node
    /// last-seen/metadata update, gateway presence upsert. The history
    /// entry is keyed on `(slot_id, detected_at)` so a redelivered
    /// measurement overwrites its own entry instead of duplicating it.
    pub async fn commit(
        &self,
        slot_id: i64,
        measurement: &Measurement,
        snapshot: &SlotSnapshot,
    ) -> Result<(), RecorderError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE parking_slots
             SET status = $2,
                 last_distance_cm = $3,
                 last_sensor_state = $4,
                 last_gateway_id = $5,
                 last_message_received_at = $6
             WHERE id = $1",
        )
        .bind(slot_id)
        .bind(snapshot.status.as_str())
        .bind(snapshot.distance_cm)
        .bind(snapshot.sensor_state.as_deref())
        .bind(snapshot.gateway_id.as_deref())
        .bind(snapshot.observed_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO status_log (
                slot_id, status, detected_at, distance_cm, percentage,
                battery_level, rssi, snr, gateway_id, source
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (slot_id, detected_at) DO UPDATE SET
                status = EXCLUDED.status,
                distance_cm = EXCLUDED.distance_cm,
                percentage = EXCLUDED.percentage,
                battery_level = EXCLUDED.battery_level,
                rssi = EXCLUDED.rssi,
                snr = EXCLUDED.snr,
                gateway_id = EXCLUDED.gateway_id,
                source = EXCLUDED.source",
        )
        .bind(slot_id)
        .bind(snapshot.status.as_str())
        .bind(snapshot.observed_at)
        .bind(snapshot.distance_cm)
        .bind(snapshot.percentage)
        .bind(snapshot.battery_level)
        .bind(measurement.rssi)
        .bind(measurement.snr)
        .bind(measurement.gateway_id.as_str())
        .bind(measurement.source.as_str())
        .execute(&mut *tx)
        .await?;

        self.touch_node(&mut tx, measurement, snapshot).await?;
        self.touch_gateway(&mut tx, &measurement.gateway_id, snapshot).await?;

        tx.commit().await?;
        Ok(())
    }

    /// [`Self::commit`] with a small bounded retry. After the last failed
    /// attempt the error is returned for the caller to log as an
    /// incident; the realtime cache stays authoritative until the next
    /// successful write.
    pub async fn commit_with_retry(
        &self,
        slot_id: i64,
        measurement: &Measurement,
        snapshot: &SlotSnapshot,
    ) -> Result<(), RecorderError> {
        let mut attempt = 1;
        loop {
            match self.commit(slot_id, measurement, snapshot).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < WRITE_ATTEMPTS => {
                    warn!(
                        slot_id,
                        attempt,
                        error = %e,
                        "durable write failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(WRITE_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn touch_node(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        measurement: &Measurement,
        snapshot: &SlotSnapshot,
    ) -> Result<(), RecorderError> {
        let metadata = serde_json::json!({
            "battery": measurement.battery_level,
            "rssi": measurement.rssi,
            "snr": measurement.snr,
            "last_state": measurement.sensor_state,
        });

        sqlx::query("UPDATE nodes SET last_seen = $2, metadata = $3 WHERE dev_eui = $1")
            .bind(measurement.dev_eui.as_str())
            .bind(snapshot.observed_at)
            .bind(metadata.to_string())
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Gateways, unlike nodes, are auto-created from telemetry: any
    /// gateway id seen in a receive-info block gets an `unassigned`
    /// placeholder row until an operator claims it.
    async fn touch_gateway(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        gateway_id: &str,
        snapshot: &SlotSnapshot,
    ) -> Result<(), RecorderError> {
        sqlx::query(
            "INSERT INTO gateways (gateway_id, status, first_seen, last_seen)
             VALUES ($1, 'unassigned', $2, $2)
             ON CONFLICT (gateway_id) DO UPDATE SET last_seen = EXCLUDED.last_seen",
        )
        .bind(gateway_id)
        .bind(snapshot.observed_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Rebuild a snapshot from the durable slot row, for cache misses.
    ///
    /// Battery level is not stored on the slot row; the rebuilt snapshot
    /// carries the fields the row has and re-derives the percentage from
    /// the stored distance.
    pub async fn fetch_slot_snapshot(
        &self,
        slot_id: i64,
    ) -> Result<Option<SlotSnapshot>, RecorderError> {
        let row: Option<SlotStateRow> = sqlx::query_as(
            "SELECT status, last_distance_cm, last_sensor_state,
                    last_gateway_id, last_message_received_at
             FROM parking_slots WHERE id = $1",
        )
        .bind(slot_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SlotStateRow::into_snapshot))
    }
}
