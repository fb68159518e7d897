//! Controller configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// How leaves are reached
    pub remote: RemoteConfig,

    /// The controller's own API and addressing
    pub controller: ApiConfig,

    /// Health polling
    pub health: HealthConfig,

    /// Commissioning behavior
    pub commission: CommissionConfig,

    /// Security configuration
    pub security: SecurityConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            store_path: leafmesh_common::default_store_path(),
            remote: RemoteConfig::default(),
            controller: ApiConfig::default(),
            health: HealthConfig::default(),
            commission: CommissionConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// Leaf transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// URL scheme used for leaf endpoints
    pub scheme: String,

    /// Whole-request timeout
    pub request_timeout_secs: u64,

    /// TCP connect timeout
    pub connect_timeout_secs: u64,

    /// Leaves ship self-signed certificates until they trust the controller CA
    pub accept_invalid_certs: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            request_timeout_secs: 10,
            connect_timeout_secs: 3,
            accept_invalid_certs: true,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Controller API and addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the controller's own REST API
    pub api_url: String,

    /// Bearer token for the controller's REST API
    pub api_token: Option<String>,

    /// Host number of the controller inside each leaf subnet
    pub gateway_host: u32,

    /// Prefix length of leaf subnets
    pub subnet_prefix: u8,

    /// PEM file holding the controller CA certificate
    pub ca_cert_path: Option<PathBuf>,

    /// Name of the token leaves use for callbacks
    pub downhaul_token_name: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1/".to_string(),
            api_token: None,
            gateway_host: 1,
            subnet_prefix: 24,
            ca_cert_path: None,
            downhaul_token_name: leafmesh_common::DOWNHAUL_TOKEN_NAME.to_string(),
        }
    }
}

/// Health polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Upper bound on probes in flight
    pub max_concurrency: usize,

    /// Per-probe timeout
    pub probe_timeout_secs: u64,

    /// Background refresh period; 0 disables the ticker
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            probe_timeout_secs: 5,
            interval_secs: 60,
        }
    }
}

/// What to do when a step after the leaf was switched into leaf mode fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LateFailurePolicy {
    /// Keep the leaf and report the failures as warnings
    #[default]
    Accept,
    /// Undo registration and leaf mode, then fail
    Rollback,
}

impl std::str::FromStr for LateFailurePolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Self::Accept),
            "rollback" => Ok(Self::Rollback),
            _ => Err(format!("unknown late failure policy: {}", s)),
        }
    }
}

/// Commissioning configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionConfig {
    pub late_failure_policy: LateFailurePolicy,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Base32 TOTP secret; when set, credential operations need step-up
    pub otp_secret: Option<String>,

    /// How long a successful step-up stays valid
    pub step_up_ttl_secs: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            otp_secret: None,
            step_up_ttl_secs: 300,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.controller.subnet_prefix > 30 {
            anyhow::bail!(
                "controller.subnet_prefix must be at most 30, got {}",
                self.controller.subnet_prefix
            );
        }
        if self.controller.gateway_host == 0 {
            anyhow::bail!("controller.gateway_host must be non-zero");
        }
        if self.health.max_concurrency == 0 {
            anyhow::bail!("health.max_concurrency must be at least 1");
        }
        if self.health.probe_timeout_secs == 0 {
            anyhow::bail!("health.probe_timeout_secs must be at least 1");
        }
        if !matches!(self.remote.scheme.as_str(), "http" | "https") {
            anyhow::bail!("remote.scheme must be http or https, got {}", self.remote.scheme);
        }
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("state.db")
    }

    /// Get the CA certificate path
    pub fn ca_cert_path(&self) -> PathBuf {
        self.controller
            .ca_cert_path
            .clone()
            .unwrap_or_else(|| self.store_path.join("ca.pem"))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health.probe_timeout_secs)
    }

    /// Ticker period, `None` when disabled
    pub fn health_interval(&self) -> Option<Duration> {
        (self.health.interval_secs > 0).then(|| Duration::from_secs(self.health.interval_secs))
    }
}
