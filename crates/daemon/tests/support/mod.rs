//! Recording stand-ins for the controller's collaborators.
//!
//! Every stub appends to one shared call log so tests can assert on the
//! exact order of calls across collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use leafmesh_common::{
    AuthSide, Database, DeviceInfo, Error, LeafMode, LeafRouter, LeafStatus, NodeId, Result,
    TrustBundle, CREDENTIAL_STORE, DOWNHAUL_TOKEN_NAME,
};
use leafmesh_daemon::broker::CredentialBroker;
use leafmesh_daemon::ca::CaProvider;
use leafmesh_daemon::client::LeafApi;
use leafmesh_daemon::commission::{Collaborators, CommissionSettings, Commissioner};
use leafmesh_daemon::config::LateFailurePolicy;
use leafmesh_daemon::devices::DeviceRegistry;
use leafmesh_daemon::journal::CommissionJournal;
use leafmesh_daemon::registry::{SqliteTopologyRegistry, TopologyRegistry};
use leafmesh_daemon::sync::MeshSync;
use leafmesh_daemon::{Controller, ControllerConfig};
use leafmesh_daemon::tokens::{SqliteTokenStore, TokenStore};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub const CA_PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Calls whose name starts with `prefix`
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with(prefix)).collect()
    }
}

/// How a stubbed leaf operation should behave
#[derive(Clone, Debug)]
pub enum Behavior {
    Ok,
    Unreachable,
    Unauthorized,
    Rejected,
    /// Never completes
    Hang,
}

impl Behavior {
    async fn apply(&self, address: &str, operation: &str) -> Result<()> {
        match self {
            Behavior::Ok => Ok(()),
            Behavior::Unreachable => Err(Error::RemoteUnreachable {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            }),
            Behavior::Unauthorized => Err(Error::RemoteAuthRequired {
                side: AuthSide::Candidate,
                address: address.to_string(),
                reason: "401".to_string(),
            }),
            Behavior::Rejected => Err(Error::RemoteApi {
                address: address.to_string(),
                operation: operation.to_string(),
                status: Some(500),
                body: "boom".to_string(),
            }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

/// Leaf stub keyed by operation name, defaulting to success
pub struct StubLeaf {
    log: CallLog,
    behaviors: Mutex<HashMap<&'static str, Behavior>>,
    /// Per-address overrides for health tests
    address_behaviors: Mutex<HashMap<String, Behavior>>,
    pub mesh_enabled: Mutex<bool>,
    pub version: String,
    pub pushed: Mutex<Vec<TrustBundle>>,
}

impl StubLeaf {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            behaviors: Mutex::new(HashMap::new()),
            address_behaviors: Mutex::new(HashMap::new()),
            mesh_enabled: Mutex::new(true),
            version: "1.0.0".to_string(),
            pushed: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, operation: &'static str, behavior: Behavior) {
        self.behaviors.lock().insert(operation, behavior);
    }

    pub fn set_for_address(&self, address: &str, behavior: Behavior) {
        self.address_behaviors.lock().insert(address.to_string(), behavior);
    }

    async fn run(&self, operation: &'static str, address: &str, detail: &str) -> Result<()> {
        self.log.push(format!("leaf.{}({}{})", operation, address, detail));
        let behavior = self
            .address_behaviors
            .lock()
            .get(address)
            .cloned()
            .or_else(|| self.behaviors.lock().get(operation).cloned())
            .unwrap_or(Behavior::Ok);
        behavior.apply(address, operation).await
    }
}

#[async_trait]
impl LeafApi for StubLeaf {
    async fn get_mesh_status(&self, address: &str, _token: &str) -> Result<bool> {
        self.run("get_mesh_status", address, "").await?;
        Ok(*self.mesh_enabled.lock())
    }

    async fn push_trust(&self, address: &str, _token: &str, bundle: &TrustBundle) -> Result<()> {
        self.run("push_trust", address, "").await?;
        self.pushed.lock().push(bundle.clone());
        Ok(())
    }

    async fn set_leaf_mode(&self, address: &str, _token: &str, mode: LeafMode) -> Result<()> {
        let detail = format!(", {}", mode);
        match mode {
            LeafMode::Enable => self.run("set_leaf_mode", address, &detail).await,
            LeafMode::Disable => self.run("disable_leaf_mode", address, &detail).await,
        }
    }

    async fn restart(&self, address: &str, _token: &str) -> Result<()> {
        self.run("restart", address, "").await
    }

    async fn get_version(&self, address: &str, _token: &str) -> Result<String> {
        self.run("get_version", address, "").await?;
        Ok(self.version.clone())
    }
}

/// Device registry that knows a fixed set of devices
pub struct StubDevices {
    log: CallLog,
    known: Mutex<HashMap<String, DeviceInfo>>,
}

impl StubDevices {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, address: &str, vlan_tag: Option<&str>) {
        self.known.lock().insert(
            address.to_string(),
            DeviceInfo {
                address: address.to_string(),
                mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
                name: Some("leaf".to_string()),
                vlan_tag: vlan_tag.map(|t| t.to_string()),
            },
        );
    }
}

#[async_trait]
impl DeviceRegistry for StubDevices {
    async fn lookup(&self, address: &str) -> Result<Option<DeviceInfo>> {
        self.log.push(format!("devices.lookup({})", address));
        Ok(self.known.lock().get(address).cloned())
    }
}

pub struct StubCa {
    log: CallLog,
}

#[async_trait]
impl CaProvider for StubCa {
    async fn ca_certificate(&self) -> Result<String> {
        self.log.push("ca.certificate");
        Ok(CA_PEM.to_string())
    }
}

pub struct StubSync {
    log: CallLog,
    pub fail_devices: Mutex<bool>,
}

impl StubSync {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_devices: Mutex::new(false),
        }
    }
}

#[async_trait]
impl MeshSync for StubSync {
    async fn sync_ssid(&self, ssid: &str) -> Result<()> {
        self.log.push(format!("sync.ssid({})", ssid));
        leafmesh_daemon::sync::validate_ssid(ssid)
    }

    async fn sync_otp(&self) -> Result<()> {
        self.log.push("sync.otp");
        Ok(())
    }

    async fn sync_device_registry(&self) -> Result<()> {
        self.log.push("sync.device_registry");
        if *self.fail_devices.lock() {
            return Err(Error::RemoteUnreachable {
                address: "controller".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

/// Token store wrapper that records calls and can demand step-up
pub struct RecordingTokens {
    log: CallLog,
    inner: SqliteTokenStore,
    pub locked: Mutex<bool>,
}

impl RecordingTokens {
    fn check(&self) -> Result<()> {
        if *self.locked.lock() {
            return Err(Error::RemoteAuthRequired {
                side: AuthSide::Controller,
                address: CREDENTIAL_STORE.to_string(),
                reason: "step-up required".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for RecordingTokens {
    async fn find_by_name(&self, name: &str) -> Result<Option<leafmesh_common::ScopedToken>> {
        self.log.push(format!("tokens.find({})", name));
        self.check()?;
        self.inner.find_by_name(name).await
    }

    async fn create(
        &self,
        name: &str,
        allowed_paths: &[String],
        ttl_secs: i64,
    ) -> Result<leafmesh_common::ScopedToken> {
        self.log.push(format!("tokens.create({})", name));
        self.check()?;
        self.inner.create(name, allowed_paths, ttl_secs).await
    }

    async fn list(&self) -> Result<Vec<leafmesh_common::ScopedToken>> {
        self.check()?;
        self.inner.list().await
    }

    async fn revoke(&self, token: &str) -> Result<bool> {
        self.check()?;
        self.inner.revoke(token).await
    }

    async fn step_up(&self, _code: &str) -> Result<()> {
        *self.locked.lock() = false;
        Ok(())
    }
}

/// Registry wrapper that records writes; reads stay silent
pub struct RecordingRegistry {
    log: CallLog,
    inner: SqliteTopologyRegistry,
}

#[async_trait]
impl TopologyRegistry for RecordingRegistry {
    async fn list(&self) -> Result<Vec<LeafRouter>> {
        self.inner.list().await
    }

    async fn get(&self, node_id: NodeId) -> Result<Option<LeafRouter>> {
        self.inner.get(node_id).await
    }

    async fn get_by_address(&self, address: &str) -> Result<Option<LeafRouter>> {
        self.inner.get_by_address(address).await
    }

    async fn upsert(&self, leaf: LeafRouter) -> Result<LeafRouter> {
        self.log.push(format!("registry.upsert({})", leaf.address));
        self.inner.upsert(leaf).await
    }

    async fn restore(&self, leaf: &LeafRouter) -> Result<()> {
        self.log.push(format!("registry.restore({})", leaf.address));
        self.inner.restore(leaf).await
    }

    async fn delete_by_address(&self, address: &str) -> Result<bool> {
        self.log.push(format!("registry.delete({})", address));
        self.inner.delete_by_address(address).await
    }

    async fn relocate(&self, node_id: NodeId, new_address: &str) -> Result<LeafRouter> {
        self.log.push(format!("registry.relocate({})", new_address));
        self.inner.relocate(node_id, new_address).await
    }

    async fn update_health(
        &self,
        node_id: NodeId,
        status: LeafStatus,
        version: Option<&str>,
    ) -> Result<()> {
        self.inner.update_health(node_id, status, version).await
    }
}

/// Fully wired commissioner over stubs and an in-memory database
pub struct Harness {
    pub log: CallLog,
    pub db: Database,
    pub leaf: Arc<StubLeaf>,
    pub devices: Arc<StubDevices>,
    pub sync: Arc<StubSync>,
    pub tokens: Arc<RecordingTokens>,
    pub broker: Arc<CredentialBroker>,
    pub registry: Arc<RecordingRegistry>,
    pub deps: Collaborators,
    pub commissioner: Commissioner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(LateFailurePolicy::Accept)
    }

    pub fn with_policy(policy: LateFailurePolicy) -> Self {
        let log = CallLog::default();
        let db = Database::open_memory().unwrap();

        let leaf = Arc::new(StubLeaf::new(log.clone()));
        let devices = Arc::new(StubDevices::new(log.clone()));
        let sync = Arc::new(StubSync::new(log.clone()));
        let tokens = Arc::new(RecordingTokens {
            log: log.clone(),
            inner: SqliteTokenStore::new(db.clone()),
            locked: Mutex::new(false),
        });
        let broker = Arc::new(CredentialBroker::new(tokens.clone(), DOWNHAUL_TOKEN_NAME));
        let registry = Arc::new(RecordingRegistry {
            log: log.clone(),
            inner: SqliteTopologyRegistry::new(db.clone()),
        });

        let deps = Collaborators {
            leaf: leaf.clone(),
            devices: devices.clone(),
            broker: broker.clone(),
            ca: Arc::new(StubCa { log: log.clone() }),
            registry: registry.clone(),
            sync: sync.clone(),
        };
        let settings = CommissionSettings {
            late_failure_policy: policy,
            ..CommissionSettings::default()
        };
        let commissioner =
            Commissioner::new(deps.clone(), CommissionJournal::new(db.clone()), settings);

        Self {
            log,
            db,
            leaf,
            devices,
            sync,
            tokens,
            broker,
            registry,
            deps,
            commissioner,
        }
    }

    /// Controller over the same stubs and database
    pub fn controller(&self) -> Controller {
        Controller::with_collaborators(ControllerConfig::default(), self.db.clone(), self.deps.clone())
    }

    pub async fn registered(&self) -> Vec<leafmesh_common::LeafRouter> {
        self.registry.list().await.unwrap()
    }

    /// Distinct leaf operations seen, in first-seen order
    pub fn leaf_operations(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.log
            .matching("leaf.")
            .into_iter()
            .map(|c| c.split('(').next().unwrap_or_default().to_string())
            .filter(|op| seen.insert(op.clone()))
            .collect()
    }
}
