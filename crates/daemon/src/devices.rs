//! Local device registry lookup
//!
//! Commissioning only accepts candidates the controller already knows as
//! devices, and only when they sit on the untagged LAN.

use crate::controller_api::ControllerApi;
use async_trait::async_trait;
use leafmesh_common::{net, DeviceInfo, Result};
use serde::Deserialize;
use std::collections::HashMap;

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Device currently holding `address`, if any
    async fn lookup(&self, address: &str) -> Result<Option<DeviceInfo>>;
}

/// Device entry as the controller API serializes it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceEntry {
    #[serde(rename = "MAC", default)]
    mac: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "RecentIP", default)]
    recent_ip: String,
    #[serde(rename = "VLANTag", default)]
    vlan_tag: String,
}

fn non_empty(s: String) -> Option<String> {
    (!s.trim().is_empty()).then_some(s)
}

/// Find the device matching the host part of `address`
fn match_device(devices: HashMap<String, DeviceEntry>, address: &str) -> Result<Option<DeviceInfo>> {
    let (host, _) = net::split_host_port(address)?;
    let found = devices
        .into_values()
        .find(|entry| entry.recent_ip == host)
        .map(|entry| DeviceInfo {
            address: address.to_string(),
            mac: non_empty(entry.mac),
            name: non_empty(entry.name),
            vlan_tag: non_empty(entry.vlan_tag),
        });
    Ok(found)
}

/// `DeviceRegistry` backed by the controller's `devices` endpoint
pub struct HttpDeviceRegistry {
    api: ControllerApi,
}

impl HttpDeviceRegistry {
    pub fn new(api: ControllerApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl DeviceRegistry for HttpDeviceRegistry {
    async fn lookup(&self, address: &str) -> Result<Option<DeviceInfo>> {
        let devices: HashMap<String, DeviceEntry> = self.api.get_json("devices").await?;
        match_device(devices, address)
    }
}
