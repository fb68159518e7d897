//! Commissioning orchestrator
//!
//! Takes a candidate leaf from "reachable with an operator token" to
//! "registered, trusting this controller, and running in leaf mode". Steps
//! run in a fixed order; a failure before registration aborts the run,
//! failures after it are reported (or rolled back, per policy).
//!
//! Progress is mirrored into the [`CommissionJournal`] so `repair` can pick
//! an interrupted run up at its first incomplete step.

use crate::broker::CredentialBroker;
use crate::ca::CaProvider;
use crate::client::LeafApi;
use crate::config::{ControllerConfig, LateFailurePolicy};
use crate::devices::DeviceRegistry;
use crate::journal::CommissionJournal;
use crate::locks::AddressLocks;
use crate::registry::TopologyRegistry;
use crate::sync::MeshSync;
use leafmesh_common::{
    crypto::token_fingerprint, net, Error, LeafMode, LeafRouter, NodeId, Result, ScopedToken,
    TrustBundle,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Commissioning steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Validate,
    VerifyRemote,
    ProvisionToken,
    PushTrust,
    ActivateLeafMode,
    Register,
    SyncRegistry,
    Restart,
}

impl Step {
    pub const ALL: [Step; 8] = [
        Step::Validate,
        Step::VerifyRemote,
        Step::ProvisionToken,
        Step::PushTrust,
        Step::ActivateLeafMode,
        Step::Register,
        Step::SyncRegistry,
        Step::Restart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Validate => "validate",
            Step::VerifyRemote => "verify_remote",
            Step::ProvisionToken => "provision_token",
            Step::PushTrust => "push_trust",
            Step::ActivateLeafMode => "activate_leaf_mode",
            Step::Register => "register",
            Step::SyncRegistry => "sync_registry",
            Step::Restart => "restart",
        }
    }

    /// Steps that run after the leaf is registered; their failure leaves a
    /// usable but not fully converged leaf.
    pub fn is_late(&self) -> bool {
        matches!(self, Step::SyncRegistry | Step::Restart)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leaf offered for commissioning by the operator
#[derive(Clone)]
pub struct Candidate {
    pub address: String,
    /// Bearer token valid on the leaf itself
    pub token: String,
}

impl Candidate {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("address", &self.address)
            .field("token", &token_fingerprint(&self.token))
            .finish()
    }
}

/// A non-fatal failure of a late step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepWarning {
    pub step: Step,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionReport {
    pub leaf: LeafRouter,
    /// Every step completed for this address, including earlier runs
    pub completed: Vec<Step>,
    pub warnings: Vec<StepWarning>,
}

impl CommissionReport {
    /// True when late steps failed and the leaf may not have converged
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecommissionReport {
    pub leaf: LeafRouter,
    pub warnings: Vec<StepWarning>,
}

/// Failure of a commissioning run, naming the step that failed
#[derive(Debug, thiserror::Error)]
#[error("commissioning {address} failed at {step}: {source}")]
pub struct CommissionError {
    pub address: String,
    pub step: Step,
    #[source]
    pub source: Error,
}

impl CommissionError {
    fn new(address: &str, step: Step, source: Error) -> Self {
        Self {
            address: address.to_string(),
            step,
            source,
        }
    }

    pub fn requires_step_up(&self) -> bool {
        self.source.requires_step_up()
    }

    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// External systems the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub leaf: Arc<dyn LeafApi>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub broker: Arc<CredentialBroker>,
    pub ca: Arc<dyn CaProvider>,
    pub registry: Arc<dyn TopologyRegistry>,
    pub sync: Arc<dyn MeshSync>,
}

/// Addressing and policy knobs
#[derive(Debug, Clone, Copy)]
pub struct CommissionSettings {
    pub subnet_prefix: u8,
    pub gateway_host: u32,
    pub late_failure_policy: LateFailurePolicy,
}

impl Default for CommissionSettings {
    fn default() -> Self {
        Self {
            subnet_prefix: 24,
            gateway_host: 1,
            late_failure_policy: LateFailurePolicy::Accept,
        }
    }
}

impl From<&ControllerConfig> for CommissionSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            subnet_prefix: config.controller.subnet_prefix,
            gateway_host: config.controller.gateway_host,
            late_failure_policy: config.commission.late_failure_policy,
        }
    }
}

/// Per-attempt state; never persisted as a whole
struct Session {
    candidate: Candidate,
    node_id: NodeId,
    parent_token: Option<ScopedToken>,
    leaf: Option<LeafRouter>,
    /// Registry entry as it was before this run touched it
    previous: Option<LeafRouter>,
    completed: Vec<Step>,
    done_this_run: Vec<Step>,
    warnings: Vec<StepWarning>,
}

pub struct Commissioner {
    deps: Collaborators,
    journal: CommissionJournal,
    locks: AddressLocks,
    settings: CommissionSettings,
}

impl Commissioner {
    pub fn new(deps: Collaborators, journal: CommissionJournal, settings: CommissionSettings) -> Self {
        Self {
            deps,
            journal,
            locks: AddressLocks::new(),
            settings,
        }
    }

    pub fn journal(&self) -> &CommissionJournal {
        &self.journal
    }

    pub fn locks(&self) -> &AddressLocks {
        &self.locks
    }

    /// Run the full workflow for `candidate`
    pub async fn commission(
        &self,
        candidate: Candidate,
        cancel: &CancellationToken,
    ) -> std::result::Result<CommissionReport, CommissionError> {
        let candidate = Candidate::new(candidate.address.trim(), candidate.token.trim());
        let address = candidate.address.clone();
        let fail = |e: Error| CommissionError::new(&address, Step::Validate, e);

        if address.is_empty() {
            return Err(fail(Error::Validation("address is empty".to_string())));
        }
        let _guard = self.locks.try_acquire(&address).map_err(fail)?;

        info!(
            "Commissioning leaf {} with token {}",
            address,
            token_fingerprint(&candidate.token)
        );

        let previous = self
            .deps
            .registry
            .get_by_address(&address)
            .await
            .map_err(fail)?;
        let node_id = previous.as_ref().map(|l| l.node_id).unwrap_or_default();

        self.journal
            .begin(&address, node_id, &candidate.token)
            .map_err(fail)?;
        self.journal.reset(&address).map_err(fail)?;

        let session = Session {
            candidate,
            node_id,
            parent_token: None,
            leaf: None,
            previous,
            completed: Vec::new(),
            done_this_run: Vec::new(),
            warnings: Vec::new(),
        };
        self.run(session, cancel).await
    }

    /// Resume an earlier run for `address` from its first incomplete step
    pub async fn repair(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<CommissionReport, CommissionError> {
        let address = address.trim();
        let _guard = self
            .locks
            .try_acquire(address)
            .map_err(|e| CommissionError::new(address, Step::Validate, e))?;

        let entry = self
            .journal
            .load(address)
            .and_then(|entry| entry.ok_or_else(|| Error::not_found("journal", address)))
            .map_err(|e| CommissionError::new(address, Step::Validate, e))?;
        let resume_at = entry.next_step().unwrap_or(Step::Restart);

        info!(
            "Repairing leaf {} from step {} ({} step(s) already done)",
            address,
            resume_at,
            entry.completed.len()
        );

        let previous = self
            .deps
            .registry
            .get_by_address(address)
            .await
            .map_err(|e| CommissionError::new(address, resume_at, e))?;

        let session = Session {
            candidate: Candidate::new(address, entry.caller_token),
            node_id: entry.node_id,
            parent_token: None,
            leaf: None,
            previous,
            completed: entry.completed,
            done_this_run: Vec::new(),
            warnings: Vec::new(),
        };
        self.run(session, cancel).await
    }

    async fn run(
        &self,
        mut session: Session,
        cancel: &CancellationToken,
    ) -> std::result::Result<CommissionReport, CommissionError> {
        let address = session.candidate.address.clone();

        for step in Step::ALL {
            if session.completed.contains(&step) {
                debug!("{}: {} already done", address, step);
                continue;
            }

            let outcome = if cancel.is_cancelled() {
                Err(Error::Cancelled {
                    address: address.clone(),
                })
            } else {
                debug!("{}: running {}", address, step);
                self.execute(step, &mut session, cancel).await
            };

            match outcome {
                Ok(()) => {
                    session.completed.push(step);
                    session.done_this_run.push(step);
                    self.journal
                        .record_step(&address, step)
                        .map_err(|e| CommissionError::new(&address, step, e))?;
                }
                Err(e) if step.is_late() && !matches!(e, Error::Cancelled { .. }) => {
                    warn!("{}: {} failed after registration: {}", address, step, e);
                    self.note_error(&address, step, &e);
                    session.warnings.push(StepWarning {
                        step,
                        error: e.to_string(),
                    });

                    if self.settings.late_failure_policy == LateFailurePolicy::Rollback {
                        let partial = self.rollback(&session, step, &e).await;
                        return Err(CommissionError::new(&address, step, partial));
                    }
                }
                Err(e) if step == Step::Validate => {
                    // A rejected candidate leaves nothing to repair
                    warn!("{}: candidate rejected: {}", address, e);
                    if let Err(journal_err) = self.journal.clear(&address) {
                        warn!("{}: failed to clear commission journal: {}", address, journal_err);
                    }
                    return Err(CommissionError::new(&address, step, e));
                }
                Err(e) => {
                    error!("{}: commissioning aborted at {}: {}", address, step, e);
                    self.note_error(&address, step, &e);
                    return Err(CommissionError::new(&address, step, e));
                }
            }
        }

        let leaf = match session.leaf.take() {
            Some(leaf) => leaf,
            None => self
                .deps
                .registry
                .get_by_address(&address)
                .await
                .and_then(|leaf| leaf.ok_or_else(|| Error::not_found("leaf", &address)))
                .map_err(|e| CommissionError::new(&address, Step::Register, e))?,
        };

        if session.warnings.is_empty() {
            if let Err(e) = self.journal.clear(&address) {
                warn!("{}: failed to clear commission journal: {}", address, e);
            }
            info!("Leaf {} commissioned as {}", address, leaf.node_id);
        } else {
            info!(
                "Leaf {} commissioned as {} with {} warning(s); run repair to retry",
                address,
                leaf.node_id,
                session.warnings.len()
            );
        }

        Ok(CommissionReport {
            leaf,
            completed: session.completed,
            warnings: session.warnings,
        })
    }

    async fn execute(&self, step: Step, session: &mut Session, cancel: &CancellationToken) -> Result<()> {
        let address = session.candidate.address.clone();
        let token = session.candidate.token.clone();

        match step {
            Step::Validate => self.validate(&session.candidate, cancel).await,

            Step::VerifyRemote => {
                let enabled = guarded(
                    cancel,
                    &address,
                    self.deps.leaf.get_mesh_status(&address, &token),
                )
                .await?;
                debug!("{}: mesh plugin answered, leaf mode {}", address, enabled);
                Ok(())
            }

            Step::ProvisionToken => {
                let parent = guarded(cancel, &address, self.deps.broker.downhaul_token()).await?;
                debug!(
                    "{}: downhaul token {} ready",
                    address,
                    token_fingerprint(&parent.token)
                );
                session.parent_token = Some(parent);
                Ok(())
            }

            Step::PushTrust => {
                let parent = match session.parent_token.clone() {
                    Some(parent) => parent,
                    None => guarded(cancel, &address, self.deps.broker.downhaul_token()).await?,
                };
                let parent_ca = guarded(cancel, &address, self.deps.ca.ca_certificate()).await?;
                let parent_address = net::derive_parent_address(
                    &address,
                    self.settings.subnet_prefix,
                    self.settings.gateway_host,
                )?;

                let bundle = TrustBundle {
                    parent_api_token: parent.token,
                    parent_address: parent_address.to_string(),
                    parent_ca,
                    node_id: session.node_id,
                };
                guarded(cancel, &address, self.deps.leaf.push_trust(&address, &token, &bundle))
                    .await?;
                debug!("{}: trust pushed, parent {}", address, parent_address);
                Ok(())
            }

            Step::ActivateLeafMode => {
                guarded(
                    cancel,
                    &address,
                    self.deps.leaf.set_leaf_mode(&address, &token, LeafMode::Enable),
                )
                .await
            }

            Step::Register => {
                let leaf = LeafRouter::new(session.node_id, address.clone(), token);
                let stored = self.deps.registry.upsert(leaf).await?;
                session.leaf = Some(stored);
                Ok(())
            }

            Step::SyncRegistry => {
                guarded(cancel, &address, self.deps.sync.sync_device_registry()).await
            }

            Step::Restart => {
                guarded(cancel, &address, self.deps.leaf.restart(&address, &token)).await?;
                info!("{}: restart requested", address);
                Ok(())
            }
        }
    }

    async fn validate(&self, candidate: &Candidate, cancel: &CancellationToken) -> Result<()> {
        if candidate.token.is_empty() {
            return Err(Error::Validation("leaf API token is empty".to_string()));
        }
        net::candidate_ipv4(&candidate.address)?;

        let device = guarded(
            cancel,
            &candidate.address,
            self.deps.devices.lookup(&candidate.address),
        )
        .await?
        .ok_or_else(|| {
            Error::Validation(format!(
                "{} is not a known device on this network",
                candidate.address
            ))
        })?;

        if device.is_vlan_tagged() {
            return Err(Error::Validation(format!(
                "{} is on VLAN {}; leaves must sit on the untagged LAN",
                candidate.address,
                device.vlan_tag.as_deref().unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Undo what this run changed after the trust push. The trust bundle
    /// itself cannot be withdrawn.
    async fn rollback(&self, session: &Session, failed: Step, cause: &Error) -> Error {
        let address = &session.candidate.address;
        warn!("{}: rolling back after {} failed", address, failed);

        if session.done_this_run.contains(&Step::Register) {
            let undo = match &session.previous {
                Some(previous) => self.deps.registry.restore(previous).await,
                None => self.deps.registry.delete_by_address(address).await.map(|_| ()),
            };
            if let Err(e) = undo {
                error!("{}: failed to undo registration: {}", address, e);
            }
        }

        if session.done_this_run.contains(&Step::ActivateLeafMode) {
            if let Err(e) = self
                .deps
                .leaf
                .set_leaf_mode(address, &session.candidate.token, LeafMode::Disable)
                .await
            {
                warn!("{}: failed to disable leaf mode during rollback: {}", address, e);
            }
        }

        if let Err(e) = self.journal.reset(address) {
            warn!("{}: failed to reset commission journal: {}", address, e);
        }

        Error::PartialCommissioning {
            address: address.clone(),
            step: failed.to_string(),
            reason: cause.to_string(),
        }
    }

    fn note_error(&self, address: &str, step: Step, e: &Error) {
        if let Err(journal_err) = self.journal.record_error(address, &format!("{}: {}", step, e)) {
            warn!("{}: failed to journal error: {}", address, journal_err);
        }
    }

    /// Take a leaf out of the mesh and forget it
    pub async fn decommission(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<DecommissionReport> {
        let address = address.trim();
        let _guard = self.locks.try_acquire(address)?;

        let leaf = self
            .deps
            .registry
            .get_by_address(address)
            .await?
            .ok_or_else(|| Error::not_found("leaf", address))?;

        info!("Decommissioning leaf {} ({})", address, leaf.node_id);
        let mut warnings = Vec::new();

        let disabled = guarded(
            cancel,
            address,
            self.deps.leaf.set_leaf_mode(address, &leaf.api_token, LeafMode::Disable),
        )
        .await;
        if let Err(e) = disabled {
            if matches!(e, Error::Cancelled { .. }) {
                return Err(e);
            }
            warn!("{}: could not disable leaf mode: {}", address, e);
            warnings.push(StepWarning {
                step: Step::ActivateLeafMode,
                error: e.to_string(),
            });
        } else if let Err(e) =
            guarded(cancel, address, self.deps.leaf.restart(address, &leaf.api_token)).await
        {
            warn!("{}: could not restart leaf: {}", address, e);
            warnings.push(StepWarning {
                step: Step::Restart,
                error: e.to_string(),
            });
        }

        self.deps.registry.delete_by_address(address).await?;
        self.journal.clear(address)?;

        if let Err(e) = self.deps.sync.sync_device_registry().await {
            warn!("{}: device registry sync failed: {}", address, e);
            warnings.push(StepWarning {
                step: Step::SyncRegistry,
                error: e.to_string(),
            });
        }

        Ok(DecommissionReport { leaf, warnings })
    }

    /// Record that a commissioned leaf now lives at `new_address`
    pub async fn relocate(&self, node_id: NodeId, new_address: &str) -> Result<LeafRouter> {
        let new_address = new_address.trim();
        net::candidate_ipv4(new_address)?;

        let current = self
            .deps
            .registry
            .get(node_id)
            .await?
            .ok_or_else(|| Error::not_found("leaf", node_id.to_string()))?;

        let _current_guard = self.locks.try_acquire(&current.address)?;
        let _new_guard = if current.address != new_address {
            Some(self.locks.try_acquire(new_address)?)
        } else {
            None
        };
        self.deps.registry.relocate(node_id, new_address).await
    }
}

/// Race a remote call against cancellation
async fn guarded<T, F>(cancel: &CancellationToken, address: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled { address: address.to_string() }),
        result = fut => result,
    }
}
