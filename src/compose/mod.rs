//! Docker Compose compatible orchestration
//!
//! Loads compose projects and brings their services up and down against a
//! container runtime in dependency order.

pub mod config;
pub mod context;
pub mod locks;
pub mod logs;
pub mod parser;
pub mod ports;
pub mod project;
pub mod provisioner;
pub mod resolver;
pub mod scale;
pub mod status;

pub use config::{NetworkSpec, ProjectConfig, ServiceSpec, VolumeSpec};
pub use context::OpContext;
pub use locks::LockRegistry;
pub use logs::{LogEvent, ProjectLogStream};
pub use parser::{validate, ProjectLoader};
pub use project::{Project, ProjectOptions, TeardownReport};
pub use provisioner::Deployment;
pub use resolver::{resolve, waves, Resolution};
pub use scale::ScaleOutcome;
pub use status::{ProjectState, ProjectStatus, ServiceInfo};
