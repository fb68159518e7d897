//! CLI Commands

pub mod leaf;
pub mod sync;
pub mod token;
