//! Mesh sync commands

use anyhow::Result;
use clap::Subcommand;
use leafmesh_daemon::Controller;

use crate::output::print_success;

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Propagate the access-point SSID to every leaf
    Ssid {
        /// SSID to apply
        ssid: String,
    },

    /// Propagate OTP settings to every leaf
    Otp,

    /// Push the device registry to every leaf
    Devices,
}

/// Execute sync commands
pub async fn execute(cmd: SyncCommands, controller: Controller) -> Result<()> {
    match cmd {
        SyncCommands::Ssid { ssid } => {
            controller.sync_ssid(&ssid).await?;
            print_success(&format!("SSID {} sync requested", ssid));
        }
        SyncCommands::Otp => {
            controller.sync_otp().await?;
            print_success("OTP sync requested");
        }
        SyncCommands::Devices => {
            controller.sync_device_registry().await?;
            print_success("Device registry sync requested");
        }
    }
    Ok(())
}
