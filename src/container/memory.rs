//! In-process container runtime
//!
//! Keeps containers and networks in memory behind a lock and follows the same
//! state machine a real daemon does (created -> running -> exited). Used for
//! dry runs and as the runtime behind the engine's tests, with knobs to make
//! individual calls fail.

use super::config::{
    ContainerStatus, ContainerSummary, CreateContainerRequest, LabelFilter, RemoveOptions,
};
use super::runtime::{ContainerRuntime, LogChunk, LogOptions, LogStream, OutputStream};
use crate::error::{CorralError, Result, RuntimeErrorKind, RuntimeOp};
use crate::network::{CreateNetworkRequest, NetworkSummary};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use uuid::Uuid;

/// A mutating call observed by the runtime, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    Create(String),
    Start(String),
    Stop(String),
    Remove(String),
    NetworkCreate(String),
    NetworkRemove(String),
}

struct MemoryContainer {
    summary: ContainerSummary,
    request: CreateContainerRequest,
    logs: Vec<LogChunk>,
}

#[derive(Default)]
struct Faults {
    start_images: HashSet<String>,
    stop: HashSet<String>,
    remove: HashSet<String>,
    network_create: HashSet<String>,
    listing: bool,
}

#[derive(Default)]
struct State {
    containers: Vec<MemoryContainer>,
    networks: Vec<NetworkSummary>,
    faults: Faults,
    journal: Vec<RuntimeEvent>,
}

impl State {
    fn position(&self, id_or_name: &str) -> Option<usize> {
        self.containers
            .iter()
            .position(|c| c.summary.id == id_or_name || c.summary.name == id_or_name)
    }

    fn network_position(&self, id_or_name: &str) -> Option<usize> {
        self.networks
            .iter()
            .position(|n| n.id == id_or_name || n.name == id_or_name)
    }

    fn attached(&self, network: &str) -> bool {
        self.containers
            .iter()
            .any(|c| c.request.networks.iter().any(|n| n == network))
    }
}

/// In-memory runtime
#[derive(Default)]
pub struct MemoryRuntime {
    state: RwLock<State>,
    latency: Option<Duration>,
}

impl MemoryRuntime {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| {
            CorralError::runtime(
                RuntimeOp::ListContainers,
                "memory runtime",
                RuntimeErrorKind::Other,
                "state lock poisoned",
            )
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| {
            CorralError::runtime(
                RuntimeOp::CreateContainer,
                "memory runtime",
                RuntimeErrorKind::Other,
                "state lock poisoned",
            )
        })
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Make `start` fail for every container created from `image`
    pub fn fail_start_for_image(&self, image: &str) {
        if let Ok(mut state) = self.write() {
            state.faults.start_images.insert(image.to_string());
        }
    }

    /// Make `stop` fail for a container name
    pub fn fail_stop_for(&self, name: &str) {
        if let Ok(mut state) = self.write() {
            state.faults.stop.insert(name.to_string());
        }
    }

    /// Make `remove` fail for a container name
    pub fn fail_remove_for(&self, name: &str) {
        if let Ok(mut state) = self.write() {
            state.faults.remove.insert(name.to_string());
        }
    }

    /// Make network creation fail for a network name
    pub fn fail_network_create_for(&self, name: &str) {
        if let Ok(mut state) = self.write() {
            state.faults.network_create.insert(name.to_string());
        }
    }

    /// Make container listing fail
    pub fn fail_listing(&self, fail: bool) {
        if let Ok(mut state) = self.write() {
            state.faults.listing = fail;
        }
    }

    /// Append output to a container's log
    pub fn push_log(&self, id_or_name: &str, stream: OutputStream, text: &str) {
        if let Ok(mut state) = self.write() {
            if let Some(pos) = state.position(id_or_name) {
                state.containers[pos].logs.push(LogChunk::text(stream, text));
            }
        }
    }

    /// Force a container into a state, as an outside actor would
    pub fn set_state(&self, id_or_name: &str, status: ContainerStatus) {
        if let Ok(mut state) = self.write() {
            if let Some(pos) = state.position(id_or_name) {
                let summary = &mut state.containers[pos].summary;
                summary.state = status;
                summary.status = describe(status);
            }
        }
    }

    /// Remove a container behind the engine's back
    pub fn forget(&self, id_or_name: &str) {
        if let Ok(mut state) = self.write() {
            if let Some(pos) = state.position(id_or_name) {
                state.containers.remove(pos);
            }
        }
    }

    /// Add a pre-existing network
    pub fn seed_network(&self, request: &CreateNetworkRequest) {
        if let Ok(mut state) = self.write() {
            state.networks.push(NetworkSummary {
                id: new_id(),
                name: request.name.clone(),
                driver: request.driver.to_string(),
                labels: request.labels.clone(),
            });
        }
    }

    /// Mutating calls seen so far
    pub fn journal(&self) -> Vec<RuntimeEvent> {
        self.read().map(|s| s.journal.clone()).unwrap_or_default()
    }

    /// All containers in creation order
    pub fn containers(&self) -> Vec<ContainerSummary> {
        self.read()
            .map(|s| s.containers.iter().map(|c| c.summary.clone()).collect())
            .unwrap_or_default()
    }

    /// All networks in creation order
    pub fn networks(&self) -> Vec<NetworkSummary> {
        self.read().map(|s| s.networks.clone()).unwrap_or_default()
    }

    /// The request a container was created from
    pub fn request_for(&self, id_or_name: &str) -> Option<CreateContainerRequest> {
        let state = self.read().ok()?;
        let pos = state.position(id_or_name)?;
        Some(state.containers[pos].request.clone())
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn describe(status: ContainerStatus) -> String {
    match status {
        ContainerStatus::Running => "Up".to_string(),
        ContainerStatus::Exited => "Exited (0)".to_string(),
        ContainerStatus::Dead => "Dead".to_string(),
        other => {
            let text = other.to_string();
            let mut chars = text.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => text,
            }
        }
    }
}

fn not_found(op: RuntimeOp, target: &str) -> CorralError {
    CorralError::runtime(op, target, RuntimeErrorKind::NotFound, "no such object")
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ContainerSummary>> {
        self.delay().await;
        let state = self.read()?;
        if state.faults.listing {
            return Err(CorralError::runtime(
                RuntimeOp::ListContainers,
                filter.to_filter_args().join(","),
                RuntimeErrorKind::Other,
                "injected listing failure",
            ));
        }

        Ok(state
            .containers
            .iter()
            .filter(|c| filter.matches(&c.summary.labels))
            .map(|c| c.summary.clone())
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSummary> {
        self.delay().await;
        let state = self.read()?;
        state
            .position(id)
            .map(|pos| state.containers[pos].summary.clone())
            .ok_or_else(|| not_found(RuntimeOp::InspectContainer, id))
    }

    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String> {
        self.delay().await;
        let mut state = self.write()?;

        if state.position(&request.name).is_some() {
            return Err(CorralError::runtime(
                RuntimeOp::CreateContainer,
                &request.name,
                RuntimeErrorKind::Conflict,
                format!("container name {} is already in use", request.name),
            ));
        }

        if let Some(missing) = request
            .networks
            .iter()
            .find(|n| state.network_position(n).is_none())
        {
            return Err(CorralError::runtime(
                RuntimeOp::CreateContainer,
                &request.name,
                RuntimeErrorKind::NotFound,
                format!("network {} not found", missing),
            ));
        }

        let id = new_id();
        state.containers.push(MemoryContainer {
            summary: ContainerSummary {
                id: id.clone(),
                name: request.name.clone(),
                image: request.image.clone(),
                state: ContainerStatus::Created,
                status: describe(ContainerStatus::Created),
                labels: request.labels.clone(),
                created: Utc::now(),
            },
            request: request.clone(),
            logs: Vec::new(),
        });
        state.journal.push(RuntimeEvent::Create(request.name.clone()));

        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.delay().await;
        let mut state = self.write()?;
        let pos = state
            .position(id)
            .ok_or_else(|| not_found(RuntimeOp::StartContainer, id))?;

        let image = state.containers[pos].summary.image.clone();
        if state.faults.start_images.contains(&image) {
            return Err(CorralError::runtime(
                RuntimeOp::StartContainer,
                id,
                RuntimeErrorKind::Other,
                format!("injected start failure for image {}", image),
            ));
        }

        let summary = &mut state.containers[pos].summary;
        if summary.state == ContainerStatus::Running {
            return Ok(());
        }
        summary.state = ContainerStatus::Running;
        summary.status = describe(ContainerStatus::Running);
        let name = summary.name.clone();
        state.journal.push(RuntimeEvent::Start(name));

        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<()> {
        self.delay().await;
        let mut state = self.write()?;
        let pos = state
            .position(id)
            .ok_or_else(|| not_found(RuntimeOp::StopContainer, id))?;

        let name = state.containers[pos].summary.name.clone();
        if state.faults.stop.contains(&name) {
            return Err(CorralError::runtime(
                RuntimeOp::StopContainer,
                id,
                RuntimeErrorKind::Other,
                "injected stop failure",
            ));
        }

        let summary = &mut state.containers[pos].summary;
        if matches!(
            summary.state,
            ContainerStatus::Running | ContainerStatus::Paused | ContainerStatus::Restarting
        ) {
            summary.state = ContainerStatus::Exited;
            summary.status = describe(ContainerStatus::Exited);
        }
        state.journal.push(RuntimeEvent::Stop(name));

        Ok(())
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<()> {
        self.delay().await;
        let mut state = self.write()?;
        let pos = state
            .position(id)
            .ok_or_else(|| not_found(RuntimeOp::RemoveContainer, id))?;

        let name = state.containers[pos].summary.name.clone();
        if state.faults.remove.contains(&name) {
            return Err(CorralError::runtime(
                RuntimeOp::RemoveContainer,
                id,
                RuntimeErrorKind::Other,
                "injected remove failure",
            ));
        }

        if state.containers[pos].summary.state == ContainerStatus::Running && !options.force {
            return Err(CorralError::runtime(
                RuntimeOp::RemoveContainer,
                id,
                RuntimeErrorKind::Conflict,
                "cannot remove a running container",
            ));
        }

        state.containers.remove(pos);
        state.journal.push(RuntimeEvent::Remove(name));

        Ok(())
    }

    async fn create_network(&self, request: &CreateNetworkRequest) -> Result<String> {
        self.delay().await;
        let mut state = self.write()?;

        if state.faults.network_create.contains(&request.name) {
            return Err(CorralError::runtime(
                RuntimeOp::CreateNetwork,
                &request.name,
                RuntimeErrorKind::Other,
                "injected network failure",
            ));
        }

        if state.network_position(&request.name).is_some() {
            return Err(CorralError::runtime(
                RuntimeOp::CreateNetwork,
                &request.name,
                RuntimeErrorKind::Conflict,
                format!("network with name {} already exists", request.name),
            ));
        }

        let id = new_id();
        state.networks.push(NetworkSummary {
            id: id.clone(),
            name: request.name.clone(),
            driver: request.driver.to_string(),
            labels: request.labels.clone(),
        });
        state
            .journal
            .push(RuntimeEvent::NetworkCreate(request.name.clone()));

        Ok(id)
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<NetworkSummary>> {
        self.delay().await;
        let state = self.read()?;
        Ok(state
            .networks
            .iter()
            .filter(|n| filter.matches(&n.labels))
            .cloned()
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.delay().await;
        let mut state = self.write()?;
        let pos = state
            .network_position(id)
            .ok_or_else(|| not_found(RuntimeOp::RemoveNetwork, id))?;

        let name = state.networks[pos].name.clone();
        if state.attached(&name) {
            return Err(CorralError::runtime(
                RuntimeOp::RemoveNetwork,
                id,
                RuntimeErrorKind::Conflict,
                format!("network {} has active endpoints", name),
            ));
        }

        state.networks.remove(pos);
        state.journal.push(RuntimeEvent::NetworkRemove(name));

        Ok(())
    }

    async fn logs(&self, id: &str, options: &LogOptions) -> Result<LogStream> {
        self.delay().await;
        let state = self.read()?;
        let pos = state
            .position(id)
            .ok_or_else(|| not_found(RuntimeOp::Logs, id))?;

        let chunks = &state.containers[pos].logs;
        let skip = options
            .tail
            .map(|tail| chunks.len().saturating_sub(tail))
            .unwrap_or(0);
        let chunks: Vec<Result<LogChunk>> = chunks[skip..].iter().cloned().map(Ok).collect();

        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::config::labels;
    use crate::network::NetworkDriver;

    fn request(name: &str, image: &str) -> CreateContainerRequest {
        let mut request = CreateContainerRequest {
            name: name.to_string(),
            image: image.to_string(),
            ..Default::default()
        };
        request
            .labels
            .insert(labels::PROJECT.to_string(), "shop".to_string());
        request
    }

    #[tokio::test]
    async fn test_container_lifecycle() {
        let runtime = MemoryRuntime::new();
        let id = runtime
            .create_container(&request("shop_web_0", "nginx"))
            .await
            .unwrap();

        assert_eq!(
            runtime.inspect_container(&id).await.unwrap().state,
            ContainerStatus::Created
        );

        runtime.start_container(&id).await.unwrap();
        assert_eq!(
            runtime.inspect_container("shop_web_0").await.unwrap().state,
            ContainerStatus::Running
        );

        let err = runtime
            .remove_container(&id, RemoveOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        runtime
            .stop_container(&id, Duration::from_secs(30))
            .await
            .unwrap();
        runtime
            .remove_container(&id, RemoveOptions::default())
            .await
            .unwrap();
        assert!(runtime.inspect_container(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_name_conflict() {
        let runtime = MemoryRuntime::new();
        runtime
            .create_container(&request("shop_web_0", "nginx"))
            .await
            .unwrap();
        let err = runtime
            .create_container(&request("shop_web_0", "nginx"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_list_by_label() {
        let runtime = MemoryRuntime::new();
        runtime
            .create_container(&request("shop_web_0", "nginx"))
            .await
            .unwrap();
        runtime
            .create_container(&CreateContainerRequest {
                name: "stray".to_string(),
                image: "busybox".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let listed = runtime
            .list_containers(&LabelFilter::project("shop"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "shop_web_0");
    }

    #[tokio::test]
    async fn test_network_conflict_and_endpoints() {
        let runtime = MemoryRuntime::new();
        let net = CreateNetworkRequest::new("shop_back")
            .driver(NetworkDriver::Bridge)
            .label(labels::PROJECT, "shop");
        runtime.create_network(&net).await.unwrap();
        assert!(runtime.create_network(&net).await.unwrap_err().is_conflict());

        let mut attached = request("shop_web_0", "nginx");
        attached.networks.push("shop_back".to_string());
        runtime.create_container(&attached).await.unwrap();

        let err = runtime.remove_network("shop_back").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_missing_network_rejected() {
        let runtime = MemoryRuntime::new();
        let mut req = request("shop_web_0", "nginx");
        req.networks.push("shop_front".to_string());
        let err = runtime.create_container(&req).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_logs_tail() {
        let runtime = MemoryRuntime::new();
        runtime
            .create_container(&request("shop_web_0", "nginx"))
            .await
            .unwrap();
        runtime.push_log("shop_web_0", OutputStream::Stdout, "one\n");
        runtime.push_log("shop_web_0", OutputStream::Stderr, "two\n");
        runtime.push_log("shop_web_0", OutputStream::Stdout, "three\n");

        let options = LogOptions {
            tail: Some(2),
            ..Default::default()
        };
        let chunks: Vec<LogChunk> = runtime
            .logs("shop_web_0", &options)
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], LogChunk::text(OutputStream::Stderr, "two\n"));
    }
}
