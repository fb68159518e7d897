//! Core types for LeafMesh

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known name of the token leaves use to call back into the controller
pub const DOWNHAUL_TOKEN_NAME: &str = "MESH-API-DOWNHAUL-TOKEN";

/// Well-known name of the token this device hands to a parent that adopts it
pub const ENROLLMENT_TOKEN_NAME: &str = "MESH-API-ENROLLMENT-TOKEN";

/// Callback endpoints a leaf may reach on the controller
pub const DOWNHAUL_CALLBACK_PATHS: [&str; 3] = [
    "/reportPSKAuthSuccess",
    "/reportPSKAuthFailure",
    "/reportDisconnect",
];

/// Current epoch seconds
pub fn now_epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Stable identifier of a commissioned leaf, independent of its address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for NodeId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(NodeId)
            .map_err(|e| format!("invalid node id {}: {}", s, e))
    }
}

// ============================================================================
// Leaf status
// ============================================================================

/// Observed health of a leaf, recomputed on every refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafStatus {
    Unknown,
    Offline,
    ApiReachable,
    MeshApiUnreachable,
    MeshEnabled,
    MeshLeafNotEnabled,
}

impl Default for LeafStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Outcome of one probe against a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeEvent {
    VersionFailed,
    VersionOk,
    MeshProbeFailed,
    MeshMode { enabled: bool },
}

impl LeafStatus {
    /// Advance the per-refresh state machine. Events that do not apply to
    /// the current state leave it unchanged.
    pub fn on(self, event: ProbeEvent) -> LeafStatus {
        match (self, event) {
            (LeafStatus::Unknown, ProbeEvent::VersionFailed) => LeafStatus::Offline,
            (LeafStatus::Unknown, ProbeEvent::VersionOk) => LeafStatus::ApiReachable,
            (LeafStatus::ApiReachable, ProbeEvent::MeshProbeFailed) => {
                LeafStatus::MeshApiUnreachable
            }
            (LeafStatus::ApiReachable, ProbeEvent::MeshMode { enabled: true }) => {
                LeafStatus::MeshEnabled
            }
            (LeafStatus::ApiReachable, ProbeEvent::MeshMode { enabled: false }) => {
                LeafStatus::MeshLeafNotEnabled
            }
            (state, _) => state,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, LeafStatus::MeshEnabled)
    }
}

impl std::fmt::Display for LeafStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeafStatus::Unknown => write!(f, "Unknown"),
            LeafStatus::Offline => write!(f, "Offline"),
            LeafStatus::ApiReachable => write!(f, "API OK"),
            LeafStatus::MeshApiUnreachable => write!(f, "Mesh API down"),
            LeafStatus::MeshEnabled => write!(f, "Mesh Enabled"),
            LeafStatus::MeshLeafNotEnabled => write!(f, "Mesh Leaf Not Enabled"),
        }
    }
}

impl std::str::FromStr for LeafStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "offline" => Ok(Self::Offline),
            "api_reachable" => Ok(Self::ApiReachable),
            "mesh_api_unreachable" => Ok(Self::MeshApiUnreachable),
            "mesh_enabled" => Ok(Self::MeshEnabled),
            "mesh_leaf_not_enabled" => Ok(Self::MeshLeafNotEnabled),
            _ => Err(format!("unknown leaf status: {}", s)),
        }
    }
}

impl LeafStatus {
    /// Storage key used in the database
    pub fn as_key(&self) -> &'static str {
        match self {
            LeafStatus::Unknown => "unknown",
            LeafStatus::Offline => "offline",
            LeafStatus::ApiReachable => "api_reachable",
            LeafStatus::MeshApiUnreachable => "mesh_api_unreachable",
            LeafStatus::MeshEnabled => "mesh_enabled",
            LeafStatus::MeshLeafNotEnabled => "mesh_leaf_not_enabled",
        }
    }
}

// ============================================================================
// Leaf router
// ============================================================================

/// A commissioned satellite node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafRouter {
    pub node_id: NodeId,
    pub address: String,
    pub api_token: String,
    #[serde(default)]
    pub status: LeafStatus,
    pub version: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl LeafRouter {
    pub fn new(node_id: NodeId, address: impl Into<String>, api_token: impl Into<String>) -> Self {
        let now = now_epoch_secs();
        Self {
            node_id,
            address: address.into(),
            api_token: api_token.into(),
            status: LeafStatus::Unknown,
            version: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Leaf operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafMode {
    Enable,
    Disable,
}

impl LeafMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeafMode::Enable => "enable",
            LeafMode::Disable => "disable",
        }
    }
}

impl std::fmt::Display for LeafMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// A named, path-restricted bearer credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedToken {
    pub name: String,
    pub token: String,
    /// Empty means unrestricted
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    /// Epoch seconds, 0 never expires
    #[serde(default)]
    pub expire: i64,
}

impl ScopedToken {
    pub fn is_unrestricted(&self) -> bool {
        self.allowed_paths.is_empty()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expire != 0 && self.expire <= now
    }

    /// Whether a request to `path` is within this token's scope
    pub fn permits(&self, path: &str) -> bool {
        self.is_unrestricted() || self.allowed_paths.iter().any(|p| p == path)
    }
}

/// Data pushed to a leaf to seed its trust of the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustBundle {
    #[serde(rename = "ParentAPIToken")]
    pub parent_api_token: String,
    #[serde(rename = "ParentIP")]
    pub parent_address: String,
    #[serde(rename = "ParentCA")]
    pub parent_ca: String,
    #[serde(rename = "NodeID")]
    pub node_id: NodeId,
}

// ============================================================================
// Devices and health
// ============================================================================

/// What the local device registry knows about an address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub address: String,
    pub mac: Option<String>,
    pub name: Option<String>,
    pub vlan_tag: Option<String>,
}

impl DeviceInfo {
    pub fn is_vlan_tagged(&self) -> bool {
        self.vlan_tag
            .as_deref()
            .map_or(false, |tag| !tag.trim().is_empty())
    }
}

/// Per-refresh health observation of one leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub node_id: NodeId,
    pub address: String,
    pub status: LeafStatus,
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_machine_offline() {
        let status = LeafStatus::Unknown.on(ProbeEvent::VersionFailed);
        assert_eq!(status, LeafStatus::Offline);
        // Terminal for the cycle
        assert_eq!(status.on(ProbeEvent::MeshMode { enabled: true }), LeafStatus::Offline);
    }

    #[test]
    fn test_status_machine_mesh_paths() {
        let reachable = LeafStatus::Unknown.on(ProbeEvent::VersionOk);
        assert_eq!(reachable, LeafStatus::ApiReachable);
        assert_eq!(reachable.on(ProbeEvent::MeshProbeFailed), LeafStatus::MeshApiUnreachable);
        assert_eq!(
            reachable.on(ProbeEvent::MeshMode { enabled: true }),
            LeafStatus::MeshEnabled
        );
        assert_eq!(
            reachable.on(ProbeEvent::MeshMode { enabled: false }),
            LeafStatus::MeshLeafNotEnabled
        );
        assert!(LeafStatus::MeshEnabled.is_healthy());
        assert!(!LeafStatus::MeshLeafNotEnabled.is_healthy());
    }

    #[test]
    fn test_status_key_roundtrip() {
        for status in [
            LeafStatus::Unknown,
            LeafStatus::Offline,
            LeafStatus::ApiReachable,
            LeafStatus::MeshApiUnreachable,
            LeafStatus::MeshEnabled,
            LeafStatus::MeshLeafNotEnabled,
        ] {
            assert_eq!(status.as_key().parse::<LeafStatus>().unwrap(), status);
        }
        assert_eq!(LeafStatus::MeshApiUnreachable.to_string(), "Mesh API down");
    }

    #[test]
    fn test_token_scope() {
        let token = ScopedToken {
            name: DOWNHAUL_TOKEN_NAME.to_string(),
            token: "secret".to_string(),
            allowed_paths: DOWNHAUL_CALLBACK_PATHS.iter().map(|p| p.to_string()).collect(),
            expire: 0,
        };
        assert!(token.permits("/reportDisconnect"));
        assert!(!token.permits("/tokens"));
        assert!(!token.is_expired(now_epoch_secs()));

        let admin = ScopedToken {
            allowed_paths: Vec::new(),
            expire: 100,
            ..token
        };
        assert!(admin.permits("/tokens"));
        assert!(admin.is_expired(100));
    }

    #[test]
    fn test_trust_bundle_wire_names() {
        let bundle = TrustBundle {
            parent_api_token: "tok".to_string(),
            parent_address: "10.0.0.1".to_string(),
            parent_ca: "pem".to_string(),
            node_id: NodeId::new(),
        };
        let value = serde_json::to_value(&bundle).unwrap();
        assert_eq!(value["ParentAPIToken"], "tok");
        assert_eq!(value["ParentIP"], "10.0.0.1");
        assert_eq!(value["ParentCA"], "pem");
        assert!(value["NodeID"].is_string());
    }

    #[test]
    fn test_vlan_detection() {
        let mut device = DeviceInfo {
            address: "10.0.0.5".to_string(),
            ..Default::default()
        };
        assert!(!device.is_vlan_tagged());
        device.vlan_tag = Some("  ".to_string());
        assert!(!device.is_vlan_tagged());
        device.vlan_tag = Some("20".to_string());
        assert!(device.is_vlan_tagged());
    }
}
