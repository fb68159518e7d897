//! LeafMesh Common Library
//!
//! Shared types, persistence, and helpers for the LeafMesh controller and CLI.

pub mod crypto;
pub mod db;
pub mod error;
pub mod net;
pub mod types;

// Re-export commonly used types
pub use crypto::OtpVerifier;
pub use db::Database;
pub use error::{AuthSide, Error, Result, CREDENTIAL_STORE};
pub use types::*;

/// LeafMesh version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".leafmesh")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("state.db")
}

/// Default daemon configuration path
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
