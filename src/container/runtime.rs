//! Container runtime contract
//!
//! The engine never owns containers. Everything it knows about a project is
//! re-read through this trait on every operation.

use super::config::{ContainerSummary, CreateContainerRequest, LabelFilter, RemoveOptions};
use crate::error::Result;
use crate::network::{CreateNetworkRequest, NetworkSummary};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

/// Shared runtime trait object
pub type DynRuntime = Arc<dyn ContainerRuntime>;

/// Demultiplexed log output of one container
pub type LogStream = BoxStream<'static, Result<LogChunk>>;

/// Which stream a log chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
    /// TTY containers do not separate streams
    Console,
}

/// A piece of container output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub stream: OutputStream,
    pub data: Vec<u8>,
}

impl LogChunk {
    /// Build a chunk from text
    pub fn text(stream: OutputStream, text: &str) -> Self {
        Self {
            stream,
            data: text.as_bytes().to_vec(),
        }
    }
}

/// Options for a log request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Keep the stream open for new output
    pub follow: bool,
    /// Only the last N lines
    pub tail: Option<usize>,
    /// Prefix lines with runtime timestamps
    pub timestamps: bool,
}

/// Container runtime control API consumed by the engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &'static str;

    /// List containers in any state matching the filter
    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ContainerSummary>>;

    /// Inspect one container by ID or name
    async fn inspect_container(&self, id: &str) -> Result<ContainerSummary>;

    /// Create a container, returning its ID
    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String>;

    /// Start a created container
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container, killing it after the grace period
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;

    /// Remove a container
    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<()>;

    /// Create a network, returning its ID
    async fn create_network(&self, request: &CreateNetworkRequest) -> Result<String>;

    /// List networks matching the filter
    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<NetworkSummary>>;

    /// Remove a network by ID or name
    async fn remove_network(&self, id: &str) -> Result<()>;

    /// Stream a container's output
    async fn logs(&self, id: &str, options: &LogOptions) -> Result<LogStream>;
}
