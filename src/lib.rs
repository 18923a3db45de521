//! Corral - Docker Compose style project orchestration
//!
//! Corral brings multi-container projects up and down against a container
//! runtime. It provides:
//!
//! - Compose file loading, interpolation and validation
//! - Dependency ordering with cycle detection
//! - Label-based container discovery (no persisted container IDs)
//! - Replica scaling, status aggregation and combined logs
//! - A Docker Engine runtime and an in-memory runtime

pub mod compose;
pub mod container;
pub mod error;
pub mod network;
pub mod settings;

pub use compose::{OpContext, Project, ProjectConfig, ProjectLoader};
pub use container::{ContainerRuntime, DockerRuntime, DynRuntime, MemoryRuntime};
pub use error::{CorralError, Result};
pub use settings::Settings;
