//! Controller CA certificate source

use async_trait::async_trait;
use leafmesh_common::{Error, Result};
use std::path::PathBuf;

const PEM_CERT_HEADER: &str = "-----BEGIN CERTIFICATE-----";

#[async_trait]
pub trait CaProvider: Send + Sync {
    /// PEM-encoded CA certificate leaves should trust
    async fn ca_certificate(&self) -> Result<String>;
}

/// Reads the CA certificate from a PEM file on every call
pub struct FileCaProvider {
    path: PathBuf,
}

impl FileCaProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CaProvider for FileCaProvider {
    async fn ca_certificate(&self) -> Result<String> {
        let pem = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Crypto(format!("reading CA certificate {:?}: {}", self.path, e))
        })?;
        if !pem.contains(PEM_CERT_HEADER) {
            return Err(Error::Crypto(format!(
                "{:?} does not contain a PEM certificate",
                self.path
            )));
        }
        Ok(pem)
    }
}
