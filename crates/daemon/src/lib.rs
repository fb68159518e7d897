//! LeafMesh controller library
//!
//! Commissioning of leaf routers into the mesh, scoped credential issuance,
//! health monitoring, and mesh-wide synchronization. The `leafmeshd` binary
//! and the `leafmesh` CLI are thin shells over [`state::Controller`].

pub mod broker;
pub mod ca;
pub mod client;
pub mod commission;
pub mod config;
pub mod controller_api;
pub mod devices;
pub mod health;
pub mod journal;
pub mod locks;
pub mod registry;
pub mod state;
pub mod sync;
pub mod tokens;

pub use commission::{Candidate, CommissionError, CommissionReport, Commissioner, Step};
pub use config::ControllerConfig;
pub use health::HealthMonitor;
pub use state::Controller;
