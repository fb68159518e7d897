//! Token commands

use anyhow::Result;
use clap::Subcommand;
use leafmesh_common::{crypto::token_fingerprint, now_epoch_secs, ScopedToken};
use leafmesh_daemon::Controller;
use serde::Serialize;

use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum TokenCommands {
    /// List issued tokens
    List,

    /// Show (creating if needed) the token leaves use for callbacks
    Downhaul,

    /// Show (creating if needed) the token a parent uses to adopt this device
    Enrollment,

    /// Revoke a token by value
    Revoke {
        /// Token value
        token: String,
    },
}

/// Token display wrapper for serialization
#[derive(Serialize)]
pub struct TokenDisplay {
    pub name: String,
    pub fingerprint: String,
    pub scope: Vec<String>,
    pub expires: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl TokenDisplay {
    /// Listing never reveals token values
    fn redacted(token: ScopedToken) -> Self {
        let mut display = Self::revealed(token);
        display.token = None;
        display
    }

    fn revealed(token: ScopedToken) -> Self {
        let expires = if token.expire == 0 {
            "never".to_string()
        } else if token.is_expired(now_epoch_secs()) {
            "expired".to_string()
        } else {
            chrono::DateTime::from_timestamp(token.expire, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| token.expire.to_string())
        };
        Self {
            name: token.name,
            fingerprint: token_fingerprint(&token.token),
            scope: token.allowed_paths,
            expires,
            token: Some(token.token),
        }
    }
}

impl TableDisplay for TokenDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Fingerprint", "Scope", "Expires", "Token"]
    }

    fn row(&self) -> Vec<String> {
        let scope = if self.scope.is_empty() {
            "unrestricted".to_string()
        } else {
            self.scope.join(", ")
        };
        vec![
            self.name.clone(),
            self.fingerprint.clone(),
            scope,
            self.expires.clone(),
            self.token.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

/// Execute token commands
pub async fn execute(cmd: TokenCommands, controller: Controller, format: OutputFormat) -> Result<()> {
    match cmd {
        TokenCommands::List => {
            let tokens: Vec<TokenDisplay> = controller
                .list_tokens()
                .await?
                .into_iter()
                .map(TokenDisplay::redacted)
                .collect();
            print_list(&tokens, format);
        }
        TokenCommands::Downhaul => {
            let token = controller.downhaul_token().await?;
            print_item(&TokenDisplay::revealed(token), format);
        }
        TokenCommands::Enrollment => {
            let token = controller.enrollment_token().await?;
            print_item(&TokenDisplay::revealed(token), format);
        }
        TokenCommands::Revoke { token } => {
            controller.revoke_token(&token).await?;
            print_success(&format!("Token {} revoked", token_fingerprint(&token)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_redacts_value() {
        let token = ScopedToken {
            name: "MESH-API-DOWNHAUL-TOKEN".to_string(),
            token: "very-secret".to_string(),
            allowed_paths: vec!["/reportDisconnect".to_string()],
            expire: 0,
        };
        let display = TokenDisplay::redacted(token);
        assert!(display.token.is_none());
        assert_eq!(display.expires, "never");
        let json = serde_json::to_string(&display).unwrap();
        assert!(!json.contains("very-secret"));
    }
}
