//! Controller wiring
//!
//! Builds the concrete adapters from configuration and exposes the
//! operations the daemon and CLI drive.

use crate::broker::CredentialBroker;
use crate::ca::FileCaProvider;
use crate::client::HttpLeafClient;
use crate::commission::{
    Candidate, Collaborators, CommissionError, CommissionReport, CommissionSettings, Commissioner,
    DecommissionReport,
};
use crate::config::ControllerConfig;
use crate::controller_api::ControllerApi;
use crate::devices::HttpDeviceRegistry;
use crate::health::{self, HealthMonitor};
use crate::journal::{CommissionJournal, JournalEntry};
use crate::registry::{SqliteTopologyRegistry, TopologyRegistry};
use crate::sync::{HttpMeshSync, MeshSync};
use crate::tokens::SqliteTokenStore;
use leafmesh_common::{
    Database, Error, HealthRecord, LeafRouter, NodeId, OtpVerifier, Result, ScopedToken,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Clone)]
pub struct Controller {
    config: ControllerConfig,
    db: Database,
    deps: Collaborators,
    commissioner: Arc<Commissioner>,
    health: Arc<HealthMonitor>,
}

impl Controller {
    /// Open the state database and build the HTTP/SQLite adapters
    pub fn open(config: &ControllerConfig) -> Result<Self> {
        let db = Database::open(config.db_path())?;

        let mut store = SqliteTokenStore::new(db.clone());
        if let Some(secret) = &config.security.otp_secret {
            let otp = OtpVerifier::from_base32(secret)?;
            store = store.with_step_up(otp, config.security.step_up_ttl_secs);
            info!("Credential operations require OTP step-up");
        }
        let broker = CredentialBroker::new(Arc::new(store), &config.controller.downhaul_token_name);

        let api = ControllerApi::new(&config.controller, &config.remote)?;
        debug!("Controller API at {}", api.base_url());

        let deps = Collaborators {
            leaf: Arc::new(HttpLeafClient::new(&config.remote)?),
            devices: Arc::new(HttpDeviceRegistry::new(api.clone())),
            broker: Arc::new(broker),
            ca: Arc::new(FileCaProvider::new(config.ca_cert_path())),
            registry: Arc::new(SqliteTopologyRegistry::new(db.clone())),
            sync: Arc::new(HttpMeshSync::new(api)),
        };

        Ok(Self::with_collaborators(config.clone(), db, deps))
    }

    /// Assemble from explicit collaborators
    pub fn with_collaborators(config: ControllerConfig, db: Database, deps: Collaborators) -> Self {
        let commissioner = Commissioner::new(
            deps.clone(),
            CommissionJournal::new(db.clone()),
            CommissionSettings::from(&config),
        );
        let health = HealthMonitor::new(
            deps.leaf.clone(),
            deps.registry.clone(),
            config.health.max_concurrency,
            config.probe_timeout(),
        );

        Self {
            config,
            db,
            deps,
            commissioner: Arc::new(commissioner),
            health: Arc::new(health),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn commissioner(&self) -> &Arc<Commissioner> {
        &self.commissioner
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn broker(&self) -> &Arc<CredentialBroker> {
        &self.deps.broker
    }

    pub fn registry(&self) -> &Arc<dyn TopologyRegistry> {
        &self.deps.registry
    }

    // ========================================================================
    // Leaves
    // ========================================================================

    pub async fn commission(
        &self,
        candidate: Candidate,
        cancel: &CancellationToken,
    ) -> std::result::Result<CommissionReport, CommissionError> {
        self.commissioner.commission(candidate, cancel).await
    }

    pub async fn repair(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<CommissionReport, CommissionError> {
        self.commissioner.repair(address, cancel).await
    }

    pub async fn decommission(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<DecommissionReport> {
        self.commissioner.decommission(address, cancel).await
    }

    pub async fn relocate(&self, node_id: NodeId, new_address: &str) -> Result<LeafRouter> {
        self.commissioner.relocate(node_id, new_address).await
    }

    pub async fn list_leaves(&self) -> Result<Vec<LeafRouter>> {
        self.deps.registry.list().await
    }

    /// Forget a leaf without touching it
    pub async fn remove_leaf(&self, address: &str) -> Result<()> {
        let address = address.trim();
        let _guard = self.commissioner.locks().try_acquire(address)?;
        if self.deps.registry.delete_by_address(address).await? {
            self.commissioner.journal().clear(address)?;
            Ok(())
        } else {
            Err(Error::not_found("leaf", address))
        }
    }

    /// Runs that did not finish every step
    pub fn pending_runs(&self) -> Result<Vec<JournalEntry>> {
        self.commissioner.journal().list()
    }

    pub async fn refresh(&self) -> Result<Vec<HealthRecord>> {
        self.health.refresh_registry().await
    }

    // ========================================================================
    // Mesh sync
    // ========================================================================

    /// Fail unless the last cached refresh saw a leaf in mesh mode
    async fn ensure_sync_ready(&self) -> Result<()> {
        let records: Vec<HealthRecord> = self
            .deps
            .registry
            .list()
            .await?
            .into_iter()
            .map(|leaf| HealthRecord {
                node_id: leaf.node_id,
                address: leaf.address,
                status: leaf.status,
                version: leaf.version,
            })
            .collect();

        if health::sync_ready(&records) {
            Ok(())
        } else {
            Err(Error::Validation(
                "no leaf is in mesh mode; refresh health before syncing".to_string(),
            ))
        }
    }

    pub async fn sync_ssid(&self, ssid: &str) -> Result<()> {
        self.ensure_sync_ready().await?;
        self.deps.sync.sync_ssid(ssid).await
    }

    pub async fn sync_otp(&self) -> Result<()> {
        self.ensure_sync_ready().await?;
        self.deps.sync.sync_otp().await
    }

    pub async fn sync_device_registry(&self) -> Result<()> {
        self.deps.sync.sync_device_registry().await
    }

    pub fn mesh_sync(&self) -> &Arc<dyn MeshSync> {
        &self.deps.sync
    }

    // ========================================================================
    // Credentials
    // ========================================================================

    pub async fn step_up(&self, code: &str) -> Result<()> {
        self.deps.broker.store().step_up(code).await
    }

    pub async fn list_tokens(&self) -> Result<Vec<ScopedToken>> {
        self.deps.broker.list_tokens().await
    }

    pub async fn downhaul_token(&self) -> Result<ScopedToken> {
        self.deps.broker.downhaul_token().await
    }

    pub async fn enrollment_token(&self) -> Result<ScopedToken> {
        self.deps.broker.enrollment_token().await
    }

    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        self.deps.broker.revoke_token(token).await
    }
}
