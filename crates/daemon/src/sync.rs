//! Mesh sync dispatcher
//!
//! Fire-and-forget propagation calls. Each is idempotent, so callers may
//! simply invoke them again after a failure.

use crate::controller_api::ControllerApi;
use async_trait::async_trait;
use leafmesh_common::{Error, Result};
use tracing::info;

#[async_trait]
pub trait MeshSync: Send + Sync {
    /// Propagate the access-point SSID to every leaf
    async fn sync_ssid(&self, ssid: &str) -> Result<()>;

    /// Propagate the OTP/authentication configuration to every leaf
    async fn sync_otp(&self) -> Result<()>;

    /// Push the device registry to every leaf
    async fn sync_device_registry(&self) -> Result<()>;
}

/// `MeshSync` over the controller REST API
pub struct HttpMeshSync {
    api: ControllerApi,
}

impl HttpMeshSync {
    pub fn new(api: ControllerApi) -> Self {
        Self { api }
    }
}

/// Reject SSIDs the radio stack cannot carry
pub fn validate_ssid(ssid: &str) -> Result<()> {
    if ssid.is_empty() {
        return Err(Error::Validation("SSID is empty".to_string()));
    }
    if ssid.len() > 32 {
        return Err(Error::Validation(format!(
            "SSID is {} bytes, at most 32 allowed",
            ssid.len()
        )));
    }
    Ok(())
}

#[async_trait]
impl MeshSync for HttpMeshSync {
    async fn sync_ssid(&self, ssid: &str) -> Result<()> {
        validate_ssid(ssid)?;
        self.api.put_json("plugins/mesh/setSSID", ssid).await?;
        info!("Requested SSID sync across mesh");
        Ok(())
    }

    async fn sync_otp(&self) -> Result<()> {
        self.api.put("plugins/mesh/syncOTP").await?;
        info!("Requested OTP sync across mesh");
        Ok(())
    }

    async fn sync_device_registry(&self) -> Result<()> {
        self.api.put("hostapd/syncMesh").await?;
        info!("Requested device registry sync across mesh");
        Ok(())
    }
}
