//! Health monitor
//!
//! Probes every registered leaf concurrently and folds the probe outcomes
//! through the `LeafStatus` state machine. A failing probe never fails the
//! refresh; it only shows up in that leaf's status.

use crate::client::LeafApi;
use crate::registry::TopologyRegistry;
use futures::stream::{self, StreamExt};
use leafmesh_common::{HealthRecord, LeafRouter, LeafStatus, ProbeEvent, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct HealthMonitor {
    leaf: Arc<dyn LeafApi>,
    registry: Arc<dyn TopologyRegistry>,
    max_concurrency: usize,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        leaf: Arc<dyn LeafApi>,
        registry: Arc<dyn TopologyRegistry>,
        max_concurrency: usize,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            leaf,
            registry,
            max_concurrency: max_concurrency.max(1),
            probe_timeout,
        }
    }

    /// One record per input leaf, in input order
    pub async fn refresh_all(&self, leaves: &[LeafRouter]) -> Vec<HealthRecord> {
        // Collected first so the refresh future stays `Send`
        let probes: Vec<_> = leaves.iter().map(|leaf| self.probe(leaf)).collect();
        stream::iter(probes)
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    /// Refresh every registered leaf and cache the result in the registry
    pub async fn refresh_registry(&self) -> Result<Vec<HealthRecord>> {
        let leaves = self.registry.list().await?;
        let records = self.refresh_all(&leaves).await;

        for record in &records {
            if let Err(e) = self
                .registry
                .update_health(record.node_id, record.status, record.version.as_deref())
                .await
            {
                warn!("Failed to cache health of {}: {}", record.address, e);
            }
        }
        Ok(records)
    }

    async fn probe(&self, leaf: &LeafRouter) -> HealthRecord {
        let mut status = LeafStatus::Unknown;
        let mut version = leaf.version.clone();

        let probed = tokio::time::timeout(
            self.probe_timeout,
            self.leaf.get_version(&leaf.address, &leaf.api_token),
        )
        .await;

        match probed {
            Ok(Ok(v)) => {
                version = Some(v);
                status = status.on(ProbeEvent::VersionOk);

                let mesh = tokio::time::timeout(
                    self.probe_timeout,
                    self.leaf.get_mesh_status(&leaf.address, &leaf.api_token),
                )
                .await;
                status = match mesh {
                    Ok(Ok(enabled)) => status.on(ProbeEvent::MeshMode { enabled }),
                    Ok(Err(e)) => {
                        debug!("{}: mesh probe failed: {}", leaf.address, e);
                        status.on(ProbeEvent::MeshProbeFailed)
                    }
                    Err(_) => {
                        debug!("{}: mesh probe timed out", leaf.address);
                        status.on(ProbeEvent::MeshProbeFailed)
                    }
                };
            }
            Ok(Err(e)) => {
                debug!("{}: version probe failed: {}", leaf.address, e);
                status = status.on(ProbeEvent::VersionFailed);
            }
            Err(_) => {
                debug!("{}: version probe timed out", leaf.address);
                status = status.on(ProbeEvent::VersionFailed);
            }
        }

        HealthRecord {
            node_id: leaf.node_id,
            address: leaf.address.clone(),
            status,
            version,
        }
    }

    /// Refresh on a fixed period until cancelled, publishing each snapshot
    pub fn spawn_ticker(
        self: Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> (JoinHandle<()>, watch::Receiver<Vec<HealthRecord>>) {
        let (tx, rx) = watch::channel(Vec::new());

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("Health ticker started, every {:?}", period);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.refresh_registry().await {
                            Ok(records) => {
                                if tx.send(records).is_err() {
                                    debug!("No health subscribers left");
                                }
                            }
                            Err(e) => warn!("Health refresh failed: {}", e),
                        }
                    }
                }
            }

            info!("Health ticker stopped");
        });

        (handle, rx)
    }
}

/// Sync operations only make sense once some leaf runs in mesh mode
pub fn sync_ready(records: &[HealthRecord]) -> bool {
    records.iter().any(|r| r.status.is_healthy())
}

/// Status transition of one leaf between two snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub address: String,
    pub from: LeafStatus,
    pub to: LeafStatus,
}

/// Leaves whose status differs between `previous` and `current`; leaves new
/// in `current` are reported as coming from `Unknown`.
pub fn status_changes(previous: &[HealthRecord], current: &[HealthRecord]) -> Vec<StatusChange> {
    current
        .iter()
        .filter_map(|record| {
            let from = previous
                .iter()
                .find(|p| p.node_id == record.node_id)
                .map(|p| p.status)
                .unwrap_or(LeafStatus::Unknown);
            (from != record.status).then(|| StatusChange {
                address: record.address.clone(),
                from,
                to: record.status,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use leafmesh_common::NodeId;

    fn record(node_id: NodeId, status: LeafStatus) -> HealthRecord {
        HealthRecord {
            node_id,
            address: "10.0.0.5".to_string(),
            status,
            version: None,
        }
    }

    #[test]
    fn test_sync_ready() {
        let a = NodeId::new();
        assert!(!sync_ready(&[]));
        assert!(!sync_ready(&[record(a, LeafStatus::Offline)]));
        assert!(sync_ready(&[
            record(a, LeafStatus::Offline),
            record(NodeId::new(), LeafStatus::MeshEnabled)
        ]));
    }

    #[test]
    fn test_status_changes() {
        let a = NodeId::new();
        let b = NodeId::new();
        let previous = vec![record(a, LeafStatus::MeshEnabled)];
        let current = vec![record(a, LeafStatus::Offline), record(b, LeafStatus::Unknown)];

        let changes = status_changes(&previous, &current);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].from, LeafStatus::MeshEnabled);
        assert_eq!(changes[0].to, LeafStatus::Offline);
    }
}
