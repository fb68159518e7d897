//! Leaf commands

use anyhow::{Context, Result};
use clap::Subcommand;
use leafmesh_common::{AuthSide, Error, HealthRecord, LeafRouter, LeafStatus, NodeId};
use leafmesh_daemon::commission::{CommissionReport, DecommissionReport, StepWarning};
use leafmesh_daemon::journal::JournalEntry;
use leafmesh_daemon::{Candidate, CommissionError, Controller};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::output::{
    print_error, print_info, print_item, print_list, print_success, print_warning, status_cell,
    OutputFormat, TableDisplay,
};

#[derive(Subcommand)]
pub enum LeafCommands {
    /// Commission a leaf router into the mesh
    Commission {
        /// Leaf address (IPv4, optionally with :port)
        address: String,

        /// API token generated on the leaf
        #[arg(short, long, env = "LEAFMESH_LEAF_TOKEN")]
        token: String,
    },

    /// Resume an interrupted commissioning run
    Repair {
        /// Leaf address
        address: String,
    },

    /// List commissioned leaves with their cached status
    List,

    /// Show commissioning runs that did not finish
    Pending,

    /// Probe every leaf and update its status
    Refresh,

    /// Forget a leaf without contacting it
    Remove {
        /// Leaf address
        address: String,
    },

    /// Take a leaf out of mesh mode and forget it
    Decommission {
        /// Leaf address
        address: String,
    },

    /// Record a new address for a commissioned leaf
    Relocate {
        /// Node ID of the leaf
        node_id: String,

        /// New leaf address
        address: String,
    },
}

/// Leaf display wrapper for serialization
#[derive(Serialize)]
pub struct LeafDisplay {
    pub node_id: String,
    pub address: String,
    pub status: LeafStatus,
    pub version: String,
    pub token: String,
    pub updated: String,
}

impl From<LeafRouter> for LeafDisplay {
    fn from(leaf: LeafRouter) -> Self {
        Self {
            node_id: leaf.node_id.to_string(),
            address: leaf.address,
            status: leaf.status,
            version: leaf.version.unwrap_or_else(|| "-".to_string()),
            token: mask(&leaf.api_token),
            updated: format_time(leaf.updated_at),
        }
    }
}

impl TableDisplay for LeafDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Node ID", "Address", "Status", "Version", "Token", "Updated"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.node_id.clone(),
            self.address.clone(),
            status_cell(self.status),
            self.version.clone(),
            self.token.clone(),
            self.updated.clone(),
        ]
    }
}

/// Health record display wrapper
#[derive(Serialize)]
pub struct HealthDisplay {
    pub address: String,
    pub status: LeafStatus,
    pub version: String,
}

impl From<HealthRecord> for HealthDisplay {
    fn from(record: HealthRecord) -> Self {
        Self {
            address: record.address,
            status: record.status,
            version: record.version.unwrap_or_else(|| "-".to_string()),
        }
    }
}

impl TableDisplay for HealthDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Address", "Status", "Version"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.address.clone(), status_cell(self.status), self.version.clone()]
    }
}

/// Pending run display wrapper
#[derive(Serialize)]
pub struct PendingDisplay {
    pub address: String,
    pub node_id: String,
    pub completed: Vec<String>,
    pub next_step: String,
    pub last_error: String,
}

impl From<JournalEntry> for PendingDisplay {
    fn from(entry: JournalEntry) -> Self {
        Self {
            next_step: entry
                .next_step()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            address: entry.address,
            node_id: entry.node_id.to_string(),
            completed: entry.completed.iter().map(|s| s.to_string()).collect(),
            last_error: entry.last_error.unwrap_or_default(),
        }
    }
}

impl TableDisplay for PendingDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Address", "Node ID", "Completed", "Next", "Last Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.address.clone(),
            self.node_id.clone(),
            self.completed.len().to_string(),
            self.next_step.clone(),
            self.last_error.clone(),
        ]
    }
}

fn mask(token: &str) -> String {
    let shown: String = token.chars().take(4).collect();
    format!("{}…", shown)
}

fn format_time(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Token that fires when the operator hits Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

fn print_warnings(warnings: &[StepWarning]) {
    for warning in warnings {
        print_warning(&format!("{} failed: {}", warning.step, warning.error));
    }
}

fn report_commission(report: CommissionReport, format: OutputFormat) {
    print_item(&LeafDisplay::from(report.leaf.clone()), format);
    if report.is_partial() {
        print_warnings(&report.warnings);
        print_info(&format!(
            "Leaf is registered; run `leafmesh repair {}` to retry the failed steps",
            report.leaf.address
        ));
    } else {
        print_success(&format!("Leaf {} commissioned", report.leaf.address));
    }
}

/// Operator-facing remedy for a failed run, and whether it is an error
fn failure_hint(err: &CommissionError) -> Option<(&'static str, bool)> {
    match &err.source {
        Error::RemoteAuthRequired { side: AuthSide::Candidate, .. } => Some((
            "The leaf rejected the API token; generate a new token on the leaf, \
             or complete the leaf's own OTP login first if it has one enabled",
            true,
        )),
        e if e.needs_otp() => Some((
            "Credential store needs step-up; rerun with --otp <code>",
            true,
        )),
        Error::RemoteAuthRequired { side: AuthSide::Controller, .. } => Some((
            "The controller API rejected its token; check controller.api_token",
            true,
        )),
        Error::Busy { .. } => Some((
            "Another operation on this leaf is in progress",
            true,
        )),
        _ if err.is_retryable() => Some((
            "The failure looks transient; rerunning may succeed",
            false,
        )),
        _ => None,
    }
}

fn explain_failure(err: CommissionError) -> anyhow::Error {
    match failure_hint(&err) {
        Some((hint, true)) => print_error(hint),
        Some((hint, false)) => print_info(hint),
        None => {}
    }
    anyhow::Error::new(err)
}

fn report_decommission(report: DecommissionReport) {
    print_warnings(&report.warnings);
    print_success(&format!("Leaf {} decommissioned", report.leaf.address));
}

/// Execute leaf commands
pub async fn execute(cmd: LeafCommands, controller: Controller, format: OutputFormat) -> Result<()> {
    match cmd {
        LeafCommands::Commission { address, token } => {
            let cancel = cancel_on_ctrl_c();
            let report = controller
                .commission(Candidate::new(address, token), &cancel)
                .await
                .map_err(explain_failure)?;
            report_commission(report, format);
        }

        LeafCommands::Repair { address } => {
            let cancel = cancel_on_ctrl_c();
            let report = controller
                .repair(&address, &cancel)
                .await
                .map_err(explain_failure)?;
            report_commission(report, format);
        }

        LeafCommands::List => {
            let leaves: Vec<LeafDisplay> = controller
                .list_leaves()
                .await?
                .into_iter()
                .map(LeafDisplay::from)
                .collect();
            print_list(&leaves, format);
        }

        LeafCommands::Pending => {
            let pending: Vec<PendingDisplay> = controller
                .pending_runs()?
                .into_iter()
                .map(PendingDisplay::from)
                .collect();
            print_list(&pending, format);
        }

        LeafCommands::Refresh => {
            let records = controller.refresh().await?;
            let ready = leafmesh_daemon::health::sync_ready(&records);
            let rows: Vec<HealthDisplay> = records.into_iter().map(HealthDisplay::from).collect();
            print_list(&rows, format);
            if !ready && !rows.is_empty() {
                print_warning("No leaf is in mesh mode; sync commands are unavailable");
            }
        }

        LeafCommands::Remove { address } => {
            controller.remove_leaf(&address).await?;
            print_success(&format!("Leaf {} removed", address));
        }

        LeafCommands::Decommission { address } => {
            let cancel = cancel_on_ctrl_c();
            let report = controller.decommission(&address, &cancel).await?;
            report_decommission(report);
        }

        LeafCommands::Relocate { node_id, address } => {
            let node_id: NodeId = node_id
                .parse()
                .map_err(anyhow::Error::msg)
                .context("invalid node id")?;
            let leaf = controller.relocate(node_id, &address).await?;
            print_item(&LeafDisplay::from(leaf), format);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use leafmesh_common::CREDENTIAL_STORE;
    use leafmesh_daemon::Step;

    #[test]
    fn test_mask_hides_token() {
        assert_eq!(mask("abcdefgh"), "abcd…");
        assert_eq!(mask("ab"), "ab…");
    }

    fn auth_failure(side: AuthSide, address: &str) -> CommissionError {
        CommissionError {
            address: "10.0.0.5".to_string(),
            step: Step::VerifyRemote,
            source: Error::RemoteAuthRequired {
                side,
                address: address.to_string(),
                reason: "401".to_string(),
            },
        }
    }

    #[test]
    fn test_failure_hints_by_auth_side() {
        let (leaf, _) = failure_hint(&auth_failure(AuthSide::Candidate, "10.0.0.5")).unwrap();
        assert!(leaf.contains("new token on the leaf"));
        assert!(leaf.contains("OTP"));

        let (store, _) =
            failure_hint(&auth_failure(AuthSide::Controller, CREDENTIAL_STORE)).unwrap();
        assert!(store.contains("--otp"));

        let (api, _) =
            failure_hint(&auth_failure(AuthSide::Controller, "http://127.0.0.1")).unwrap();
        assert!(!api.contains("--otp"));
        assert!(api.contains("controller.api_token"));
    }

    #[test]
    fn test_leaf_display() {
        let leaf = LeafRouter::new(NodeId::new(), "10.0.0.5", "secret-token");
        let display = LeafDisplay::from(leaf);
        assert_eq!(display.status, LeafStatus::Unknown);
        assert_eq!(display.version, "-");
        assert!(!display.token.contains("secret-token"));
        assert_eq!(display.row().len(), LeafDisplay::headers().len());
    }
}
