//! Error types for LeafMesh

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using LeafMesh Error
pub type Result<T> = std::result::Result<T, Error>;

/// Which side of a commissioning run rejected a call for lack of authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthSide {
    /// The candidate leaf rejected the operator-supplied token
    Candidate,
    /// The controller's own credential store needs step-up authentication
    Controller,
}

impl std::fmt::Display for AuthSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthSide::Candidate => write!(f, "candidate"),
            AuthSide::Controller => write!(f, "controller"),
        }
    }
}

/// Address reported by `RemoteAuthRequired` when the local credential store,
/// rather than a remote API, wants OTP step-up
pub const CREDENTIAL_STORE: &str = "credential-store";

/// LeafMesh error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Remote {address} unreachable: {reason}")]
    RemoteUnreachable { address: String, reason: String },

    #[error("Authorization required on {side} side ({address}): {reason}")]
    RemoteAuthRequired {
        side: AuthSide,
        address: String,
        reason: String,
    },

    #[error("Remote {address} rejected {operation}{}: {body}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    RemoteApi {
        address: String,
        operation: String,
        status: Option<u16>,
        body: String,
    },

    #[error("Leaf {address} commissioned but {step} failed: {reason}")]
    PartialCommissioning {
        address: String,
        step: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Commissioning already in progress for {address}")]
    Busy { address: String },

    #[error("Operation on {address} cancelled")]
    Cancelled { address: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the remedy is a step-up authentication flow rather than
    /// abandoning the operation.
    pub fn requires_step_up(&self) -> bool {
        matches!(self, Error::RemoteAuthRequired { .. })
    }

    /// True when an OTP code (`--otp`) unlocks the operation. Other
    /// controller-side rejections come from a misconfigured API token.
    pub fn needs_otp(&self) -> bool {
        matches!(
            self,
            Error::RemoteAuthRequired { side: AuthSide::Controller, address, .. }
                if address == CREDENTIAL_STORE
        )
    }

    /// True when re-invoking the same operation later may succeed without
    /// any change on the operator's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RemoteUnreachable { .. } | Error::Busy { .. } | Error::Cancelled { .. }
        )
    }

    pub fn not_found(kind: &str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_api_display_includes_status() {
        let err = Error::RemoteApi {
            address: "10.0.0.5".to_string(),
            operation: "push_trust".to_string(),
            status: Some(500),
            body: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Remote 10.0.0.5 rejected push_trust with status 500: boom"
        );

        let err = Error::RemoteApi {
            address: "10.0.0.5".to_string(),
            operation: "set_leaf_mode".to_string(),
            status: None,
            body: "returned false".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Remote 10.0.0.5 rejected set_leaf_mode: returned false"
        );
    }

    #[test]
    fn test_classification_helpers() {
        let auth = Error::RemoteAuthRequired {
            side: AuthSide::Candidate,
            address: "10.0.0.5".to_string(),
            reason: "401".to_string(),
        };
        assert!(auth.requires_step_up());
        assert!(!auth.is_retryable());

        let unreachable = Error::RemoteUnreachable {
            address: "10.0.0.5".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(unreachable.is_retryable());
        assert!(!Error::Validation("vlan".to_string()).is_retryable());
    }

    #[test]
    fn test_otp_only_for_credential_store() {
        let store = Error::RemoteAuthRequired {
            side: AuthSide::Controller,
            address: CREDENTIAL_STORE.to_string(),
            reason: "step-up".to_string(),
        };
        assert!(store.needs_otp());

        let api = Error::RemoteAuthRequired {
            side: AuthSide::Controller,
            address: "http://127.0.0.1".to_string(),
            reason: "devices returned 401".to_string(),
        };
        assert!(api.requires_step_up());
        assert!(!api.needs_otp());

        let leaf = Error::RemoteAuthRequired {
            side: AuthSide::Candidate,
            address: CREDENTIAL_STORE.to_string(),
            reason: "401".to_string(),
        };
        assert!(!leaf.needs_otp());
    }
}
