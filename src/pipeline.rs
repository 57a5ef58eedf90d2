//! Ingest pipeline.
//!
//! Each parsed measurement is one independent unit of work: resolve the
//! device, derive the canonical status, update the realtime cache, then
//! write through to the durable store. Work is spawned per message so one
//! slot's slow database write never delays another slot's update; per-slot
//! ordering comes from the cache's compare-on-timestamp guard rather than
//! a lock.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::{
    cache::RealtimeCache,
    database::Database,
    errors::RecorderError,
    models::{Measurement, SlotSnapshot},
    mqtt::MqttClient,
    status,
};

/// Devices that sent telemetry but could not be resolved to a slot.
///
/// An operational listing for provisioning follow-up; in-memory only,
/// like the realtime cache.
#[derive(Clone, Default)]
pub struct UnresolvedDevices {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl UnresolvedDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, dev_eui: &str) {
        self.inner.write().unwrap().insert(dev_eui.to_string());
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().unwrap().iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

pub struct Pipeline {
    cache: RealtimeCache,
    database: Database,
    unresolved: UnresolvedDevices,
    shutdown_grace: Duration,
}

impl Pipeline {
    pub fn new(
        cache: RealtimeCache,
        database: Database,
        unresolved: UnresolvedDevices,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            cache,
            database,
            unresolved,
            shutdown_grace,
        }
    }

    /// Consume measurements until the connection task stops or `shutdown`
    /// resolves, then drain in-flight writes within the grace period and
    /// disconnect.
    pub async fn run(
        &self,
        mut client: MqttClient,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), RecorderError> {
        let mut tasks: JoinSet<()> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping intake");
                    break;
                }
                message = client.recv() => {
                    match message {
                        Some(measurement) => {
                            let worker = Worker {
                                cache: self.cache.clone(),
                                database: self.database.clone(),
                                unresolved: self.unresolved.clone(),
                            };
                            tasks.spawn(async move { worker.process(measurement).await });
                            // Reap whatever already finished to keep the set small.
                            while tasks.try_join_next().is_some() {}
                        }
                        None => {
                            info!("Measurement channel closed");
                            break;
                        }
                    }
                }
            }
        }

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!(
                in_flight = tasks.len(),
                "Shutdown grace expired, abandoning remaining writes"
            );
            tasks.abort_all();
        }

        if let Err(e) = client.disconnect().await {
            warn!("Error disconnecting from broker: {}", e);
        }

        Ok(())
    }
}

struct Worker {
    cache: RealtimeCache,
    database: Database,
    unresolved: UnresolvedDevices,
}

impl Worker {
    async fn process(&self, measurement: Measurement) {
        let slot_id = match self.database.resolve_device(&measurement.dev_eui).await {
            Ok(slot_id) => slot_id,
            Err(
                e @ (RecorderError::UnknownDevice(_) | RecorderError::SlotNotAssigned(_)),
            ) => {
                self.unresolved.record(measurement.dev_eui.as_str());
                warn!(
                    dev_eui = %measurement.dev_eui,
                    "Provisioning gap, dropping measurement: {}",
                    e
                );
                return;
            }
            Err(e) => {
                error!(
                    dev_eui = %measurement.dev_eui,
                    "Device resolution query failed, dropping measurement: {}",
                    e
                );
                return;
            }
        };

        let derived = status::derive(&measurement);
        let snapshot = SlotSnapshot::from_measurement(&measurement, derived, Utc::now());

        // Cache first, durable store second: readers see the fresh value
        // even if the write below has to retry.
        if !self.cache.upsert(slot_id, snapshot.clone()) {
            debug!(
                slot_id,
                observed_at = %snapshot.observed_at,
                "Out-of-order measurement ignored"
            );
            return;
        }

        if let Err(e) = self
            .database
            .commit_with_retry(slot_id, &measurement, &snapshot)
            .await
        {
            error!(
                slot_id,
                "Durable write failed after retries, cache remains authoritative: {}",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_devices_deduplicate() {
        let unresolved = UnresolvedDevices::new();
        unresolved.record("a84041fffe000001");
        unresolved.record("a84041fffe000002");
        unresolved.record("a84041fffe000001");

        assert_eq!(unresolved.len(), 2);
        assert_eq!(
            unresolved.list(),
            vec![
                "a84041fffe000001".to_string(),
                "a84041fffe000002".to_string()
            ]
        );
    }

    #[test]
    fn unresolved_devices_share_state_across_clones() {
        let unresolved = UnresolvedDevices::new();
        let clone = unresolved.clone();
        clone.record("a84041fffe000003");
        assert!(!unresolved.is_empty());
    }
}
