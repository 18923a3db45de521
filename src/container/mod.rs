//! Container runtime access
//!
//! This module defines the runtime contract the engine drives, the container
//! model it exchanges, and the two backends: Docker via bollard and an
//! in-memory runtime for tests and dry runs.

pub mod config;
pub mod docker;
pub mod memory;
pub mod runtime;

pub use config::{
    labels, ContainerStatus, ContainerSummary, CreateContainerRequest, LabelFilter, PortBinding,
    Protocol, RemoveOptions,
};
pub use docker::DockerRuntime;
pub use memory::{MemoryRuntime, RuntimeEvent};
pub use runtime::{
    ContainerRuntime, DynRuntime, LogChunk, LogOptions, LogStream, OutputStream,
};
