//! Network management module
//!
//! Project networks are created before any container and removed after the
//! last one.

pub mod config;
pub mod manager;

pub use config::{CreateNetworkRequest, NetworkDriver, NetworkSummary};
pub use manager::NetworkManager;
