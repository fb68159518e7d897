//! Client for the controller's own REST API
//!
//! Shared by the device registry and mesh sync adapters.

use crate::config::{ApiConfig, RemoteConfig};
use leafmesh_common::{AuthSide, Error, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[derive(Clone)]
pub struct ControllerApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ControllerApi {
    pub fn new(api: &ApiConfig, remote: &RemoteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(remote.request_timeout())
            .connect_timeout(remote.connect_timeout())
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: api.api_url.trim_end_matches('/').to_string(),
            token: api.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let request = self
            .http
            .request(method, format!("{}/{}", self.base_url, path.trim_start_matches('/')));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<reqwest::Response> {
        debug!("controller api {}", operation);

        let response = request.send().await.map_err(|e| Error::RemoteUnreachable {
            address: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::RemoteAuthRequired {
                side: AuthSide::Controller,
                address: self.base_url.clone(),
                reason: format!("{} returned {}", operation, status),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteApi {
                address: self.base_url.clone(),
                operation: operation.to_string(),
                status: Some(status.as_u16()),
                body: body.chars().take(200).collect(),
            });
        }
        Ok(response)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .send(path, self.request(reqwest::Method::GET, path))
            .await?;
        response.json::<T>().await.map_err(|e| Error::RemoteApi {
            address: self.base_url.clone(),
            operation: path.to_string(),
            status: None,
            body: format!("unparseable response: {}", e),
        })
    }

    pub async fn put(&self, path: &str) -> Result<()> {
        self.send(path, self.request(reqwest::Method::PUT, path))
            .await
            .map(|_| ())
    }

    pub async fn put_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.send(path, self.request(reqwest::Method::PUT, path).json(body))
            .await
            .map(|_| ())
    }
}
