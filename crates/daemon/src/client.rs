//! Remote client for leaf control endpoints
//!
//! Stateless: every call takes the leaf address and the bearer token to
//! present. Failures are classified into unreachable, unauthorized, and
//! rejected so callers can pick a remedy without inspecting HTTP details.

use crate::config::RemoteConfig;
use async_trait::async_trait;
use leafmesh_common::{AuthSide, Error, LeafMode, Result, TrustBundle};
use reqwest::{RequestBuilder, StatusCode};
use tracing::debug;

const BODY_EXCERPT_LEN: usize = 200;

/// Authenticated operations on one leaf
#[async_trait]
pub trait LeafApi: Send + Sync {
    /// Whether the leaf currently runs in leaf mode
    async fn get_mesh_status(&self, address: &str, token: &str) -> Result<bool>;

    /// Seed the leaf's trust of this controller
    async fn push_trust(&self, address: &str, token: &str, bundle: &TrustBundle) -> Result<()>;

    async fn set_leaf_mode(&self, address: &str, token: &str, mode: LeafMode) -> Result<()>;

    async fn restart(&self, address: &str, token: &str) -> Result<()>;

    /// Firmware/API version string, used as the liveness probe
    async fn get_version(&self, address: &str, token: &str) -> Result<String>;
}

/// `LeafApi` over JSON/HTTP
#[derive(Clone)]
pub struct HttpLeafClient {
    http: reqwest::Client,
    scheme: String,
}

impl HttpLeafClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            scheme: config.scheme.clone(),
        })
    }

    fn url(&self, address: &str, path: &str) -> String {
        format!("{}://{}/{}", self.scheme, address, path)
    }

    /// Send a request and return the body of a 2xx response
    async fn send(&self, address: &str, operation: &str, request: RequestBuilder) -> Result<String> {
        debug!("{} -> {}", operation, address);

        let response = request.send().await.map_err(|e| Error::RemoteUnreachable {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| Error::RemoteUnreachable {
            address: address.to_string(),
            reason: format!("reading response: {}", e),
        })?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::RemoteAuthRequired {
                side: AuthSide::Candidate,
                address: address.to_string(),
                reason: format!("{} returned {}", operation, status),
            });
        }

        if !status.is_success() {
            return Err(Error::RemoteApi {
                address: address.to_string(),
                operation: operation.to_string(),
                status: Some(status.as_u16()),
                body: excerpt(&body),
            });
        }

        Ok(body)
    }

    /// Send a request whose success body must be JSON `true`
    async fn send_expect_true(
        &self,
        address: &str,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<()> {
        let body = self.send(address, operation, request).await?;
        match parse_flag(&body) {
            Some(true) => Ok(()),
            _ => Err(Error::RemoteApi {
                address: address.to_string(),
                operation: operation.to_string(),
                status: None,
                body: format!("expected true, got {}", excerpt(&body)),
            }),
        }
    }
}

#[async_trait]
impl LeafApi for HttpLeafClient {
    async fn get_mesh_status(&self, address: &str, token: &str) -> Result<bool> {
        let request = self
            .http
            .get(self.url(address, "plugins/mesh/leafMode"))
            .bearer_auth(token);
        let body = self.send(address, "get_mesh_status", request).await?;

        parse_flag(&body).ok_or_else(|| Error::RemoteApi {
            address: address.to_string(),
            operation: "get_mesh_status".to_string(),
            status: None,
            body: format!("unexpected leaf mode {}", excerpt(&body)),
        })
    }

    async fn push_trust(&self, address: &str, token: &str, bundle: &TrustBundle) -> Result<()> {
        let request = self
            .http
            .put(self.url(address, "plugins/mesh/setParentCredentials"))
            .bearer_auth(token)
            .json(bundle);
        self.send_expect_true(address, "push_trust", request).await
    }

    async fn set_leaf_mode(&self, address: &str, token: &str, mode: LeafMode) -> Result<()> {
        let request = self
            .http
            .put(self.url(address, &format!("plugins/mesh/leafMode/{}", mode.as_str())))
            .bearer_auth(token);
        self.send_expect_true(address, "set_leaf_mode", request).await
    }

    async fn restart(&self, address: &str, token: &str) -> Result<()> {
        let request = self.http.put(self.url(address, "restart")).bearer_auth(token);
        self.send(address, "restart", request).await.map(|_| ())
    }

    async fn get_version(&self, address: &str, token: &str) -> Result<String> {
        let request = self.http.get(self.url(address, "version")).bearer_auth(token);
        let body = self.send(address, "get_version", request).await?;

        // Leaves answer with a JSON string; tolerate a bare one
        let version = serde_json::from_str::<String>(&body)
            .unwrap_or_else(|_| body.trim().to_string());
        Ok(version)
    }
}

/// Interpret a boolean-ish JSON body: `true`, `false`, `"true"`, `"false"`
pub(crate) fn parse_flag(body: &str) -> Option<bool> {
    match serde_json::from_str::<serde_json::Value>(body.trim()).ok()? {
        serde_json::Value::Bool(b) => Some(b),
        serde_json::Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.len() <= BODY_EXCERPT_LEN {
        return body.to_string();
    }
    let mut end = BODY_EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
