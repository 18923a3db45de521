//! Docker Engine runtime
//!
//! Talks to a Docker-compatible daemon through bollard and translates between
//! the daemon's models and the engine's own.

use super::config::{
    ContainerStatus, ContainerSummary, CreateContainerRequest, LabelFilter, RemoveOptions,
};
use super::runtime::{ContainerRuntime, LogChunk, LogOptions, LogStream, OutputStream};
use crate::error::{CorralError, Result, RuntimeErrorKind, RuntimeOp};
use crate::network::{CreateNetworkRequest, NetworkSummary};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, NetworkingConfig, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{EndpointSettings, HostConfig, PortBinding as DockerPortBinding};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Client-side request timeout handed to bollard, in seconds
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Runtime backed by a Docker daemon
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's local socket
    pub fn connect_local() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| connect_error("local defaults", e))?;
        Ok(Self { docker })
    }

    /// Connect to an explicit endpoint (`unix://`, `tcp://` or `http://`)
    pub fn connect(host: &str) -> Result<Self> {
        let docker = if let Some(path) = host.strip_prefix("unix://") {
            Docker::connect_with_unix(path, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        } else {
            let addr = host.replacen("tcp://", "http://", 1);
            Docker::connect_with_http(&addr, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        }
        .map_err(|e| connect_error(host, e))?;

        Ok(Self { docker })
    }

    /// Connect to `host` if given, otherwise to local defaults
    pub fn from_host(host: Option<&str>) -> Result<Self> {
        match host {
            Some(host) => Self::connect(host),
            None => Self::connect_local(),
        }
    }

    /// Verify the daemon answers
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| map_error(RuntimeOp::ListContainers, "daemon", e))
    }
}

fn connect_error(host: &str, e: DockerError) -> CorralError {
    CorralError::runtime(
        RuntimeOp::ListContainers,
        host,
        RuntimeErrorKind::Other,
        format!("failed to connect to docker: {}", e),
    )
}

/// Classify a bollard error by HTTP status
fn map_error(op: RuntimeOp, target: &str, e: DockerError) -> CorralError {
    let kind = match &e {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeErrorKind::NotFound,
        DockerError::DockerResponseServerError {
            status_code: 409, ..
        } => RuntimeErrorKind::Conflict,
        DockerError::DockerResponseServerError { message, .. }
            if message.contains("already exists") =>
        {
            RuntimeErrorKind::Conflict
        }
        _ => RuntimeErrorKind::Other,
    };
    CorralError::runtime(op, target, kind, e.to_string())
}

fn label_filters(filter: &LabelFilter) -> HashMap<String, Vec<String>> {
    let mut filters = HashMap::new();
    let args = filter.to_filter_args();
    if !args.is_empty() {
        filters.insert("label".to_string(), args);
    }
    filters
}

fn unix_time(secs: Option<i64>) -> DateTime<Utc> {
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or_default()
}

fn create_config(request: &CreateContainerRequest) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = request
        .exposed_ports
        .iter()
        .map(|port| (port.clone(), HashMap::new()))
        .collect();

    let port_bindings: HashMap<String, Option<Vec<DockerPortBinding>>> = request
        .port_bindings
        .iter()
        .map(|(port, bindings)| {
            let bindings = bindings
                .iter()
                .map(|b| DockerPortBinding {
                    host_ip: b.host_ip.clone(),
                    host_port: b.host_port.clone(),
                })
                .collect();
            (port.clone(), Some(bindings))
        })
        .collect();

    let endpoints_config: HashMap<String, EndpointSettings> = request
        .networks
        .iter()
        .map(|n| (n.clone(), EndpointSettings::default()))
        .collect();

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(request.binds.clone()),
        ..Default::default()
    };

    Config {
        image: Some(request.image.clone()),
        cmd: request.cmd.clone(),
        env: Some(request.env.clone()),
        exposed_ports: Some(exposed_ports),
        labels: Some(request.labels.clone()),
        host_config: Some(host_config),
        networking_config: Some(NetworkingConfig { endpoints_config }),
        ..Default::default()
    }
}

fn convert_output(output: LogOutput) -> LogChunk {
    match output {
        LogOutput::StdOut { message } => LogChunk {
            stream: OutputStream::Stdout,
            data: message.to_vec(),
        },
        LogOutput::StdErr { message } => LogChunk {
            stream: OutputStream::Stderr,
            data: message.to_vec(),
        },
        LogOutput::Console { message } | LogOutput::StdIn { message } => LogChunk {
            stream: OutputStream::Console,
            data: message.to_vec(),
        },
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: label_filters(filter),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_error(RuntimeOp::ListContainers, "containers", e))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                state: ContainerStatus::parse(c.state.as_deref().unwrap_or_default()),
                status: c.status.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
                created: unix_time(c.created),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSummary> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error(RuntimeOp::InspectContainer, id, e))?;

        let state = inspect
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|s| ContainerStatus::parse(&s.to_string()))
            .unwrap_or(ContainerStatus::Unknown);
        let config = inspect.config.unwrap_or_default();

        Ok(ContainerSummary {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            name: inspect
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: config.image.unwrap_or_default(),
            state,
            status: state.to_string(),
            labels: config.labels.unwrap_or_default(),
            created: inspect
                .created
                .and_then(|c| DateTime::parse_from_rfc3339(&c).ok())
                .map(|c| c.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }

    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String> {
        debug!("Creating container {} from {}", request.name, request.image);

        let options = CreateContainerOptions {
            name: request.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), create_config(request))
            .await
            .map_err(|e| map_error(RuntimeOp::CreateContainer, &request.name, e))?;

        for warning in &response.warnings {
            tracing::warn!("Docker warning for {}: {}", request.name, warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_error(RuntimeOp::StartContainer, id, e))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error(RuntimeOp::StopContainer, id, e)),
        }
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<()> {
        let options = RemoveContainerOptions {
            force: options.force,
            v: options.volumes,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_error(RuntimeOp::RemoveContainer, id, e))
    }

    async fn create_network(&self, request: &CreateNetworkRequest) -> Result<String> {
        let options = CreateNetworkOptions {
            name: request.name.clone(),
            driver: request.driver.to_string(),
            labels: request.labels.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| map_error(RuntimeOp::CreateNetwork, &request.name, e))?;

        Ok(response.id)
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<NetworkSummary>> {
        let options = ListNetworksOptions::<String> {
            filters: label_filters(filter),
        };

        let networks = self
            .docker
            .list_networks(Some(options))
            .await
            .map_err(|e| map_error(RuntimeOp::ListNetworks, "networks", e))?;

        Ok(networks
            .into_iter()
            .map(|n| NetworkSummary {
                id: n.id.unwrap_or_default(),
                name: n.name.unwrap_or_default(),
                driver: n.driver.unwrap_or_default(),
                labels: n.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.docker
            .remove_network(id)
            .await
            .map_err(|e| map_error(RuntimeOp::RemoveNetwork, id, e))
    }

    async fn logs(&self, id: &str, options: &LogOptions) -> Result<LogStream> {
        // Fail early on unknown containers; the log stream itself only errors lazily
        self.inspect_container(id).await.map_err(|e| match e {
            CorralError::Runtime {
                kind,
                target,
                message,
                ..
            } => CorralError::runtime(RuntimeOp::Logs, target, kind, message),
            other => other,
        })?;

        let options = LogsOptions::<String> {
            follow: options.follow,
            stdout: true,
            stderr: true,
            timestamps: options.timestamps,
            tail: options
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let target = id.to_string();
        let stream = self.docker.logs(id, Some(options)).map(move |item| {
            item.map(convert_output)
                .map_err(|e| map_error(RuntimeOp::Logs, &target, e))
        });

        Ok(stream.boxed())
    }
}
