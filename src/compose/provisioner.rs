//! Container provisioning
//!
//! Turns one service declaration and a replica index into a creation request
//! and drives create + start against the runtime.

use super::config::{ProjectConfig, ServiceSpec};
use super::context::OpContext;
use super::ports::parse_port_spec;
use crate::container::{labels, ContainerRuntime, CreateContainerRequest};
use crate::error::Result;
use crate::network::manager::qualified_name;
use std::collections::HashMap;

/// Name of replica `index` of a service
pub fn container_name(project: &str, service: &str, index: u32) -> String {
    format!("{}_{}_{}", project, service, index)
}

/// A container created during an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainer {
    /// Service it realises
    pub service: String,
    /// Replica index
    pub index: u32,
    /// Runtime ID
    pub id: String,
    /// Container name
    pub name: String,
}

/// Everything an operation created, in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deployment {
    /// Qualified names of networks created
    pub networks: Vec<String>,
    /// Containers created, started or not
    pub containers: Vec<CreatedContainer>,
}

impl Deployment {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created network
    pub fn record_network(&mut self, name: &str) {
        self.networks.push(name.to_string());
    }

    /// Record a created container
    pub fn record_container(&mut self, container: CreatedContainer) {
        self.containers.push(container);
    }

    /// Append another ledger
    pub fn merge(&mut self, other: Deployment) {
        self.networks.extend(other.networks);
        self.containers.extend(other.containers);
    }

    /// Nothing was created
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty() && self.containers.is_empty()
    }
}

/// Builds and launches service replicas for one project
pub struct Provisioner<'a> {
    runtime: &'a dyn ContainerRuntime,
    project: &'a str,
    config: &'a ProjectConfig,
}

impl<'a> Provisioner<'a> {
    /// Create a provisioner
    pub fn new(runtime: &'a dyn ContainerRuntime, project: &'a str, config: &'a ProjectConfig) -> Self {
        Self {
            runtime,
            project,
            config,
        }
    }

    /// Creation request for replica `index` of `service`
    pub fn build_request(
        &self,
        service: &str,
        spec: &ServiceSpec,
        index: u32,
    ) -> Result<CreateContainerRequest> {
        let mut request = CreateContainerRequest {
            name: container_name(self.project, service, index),
            image: spec.image.clone(),
            cmd: spec.command_args()?,
            binds: spec.binds(),
            ..Default::default()
        };

        for port in spec.port_specs() {
            for mapping in parse_port_spec(&port)? {
                let key = mapping.key();
                request.exposed_ports.insert(key.clone());
                request
                    .port_bindings
                    .entry(key)
                    .or_default()
                    .push(mapping.binding);
            }
        }

        request.env = spec
            .environment_vars()
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        request.networks = self
            .config
            .managed_networks()
            .map(|(name, _)| qualified_name(self.project, name))
            .collect();

        request.labels = HashMap::from([
            (labels::PROJECT.to_string(), self.project.to_string()),
            (labels::SERVICE.to_string(), service.to_string()),
            (labels::INSTANCE.to_string(), index.to_string()),
        ]);

        Ok(request)
    }

    /// Create and start one replica, returning its ID.
    ///
    /// The container is recorded in `ledger` as soon as it exists. A failed
    /// start leaves it in place.
    pub async fn provision(
        &self,
        ctx: &OpContext,
        service: &str,
        spec: &ServiceSpec,
        index: u32,
        ledger: &mut Deployment,
    ) -> Result<String> {
        let request = self.build_request(service, spec, index)?;
        tracing::debug!("Creating container {} ({})", request.name, request.image);

        let id = ctx
            .run(&request.name, self.runtime.create_container(&request))
            .await?;
        ledger.record_container(CreatedContainer {
            service: service.to_string(),
            index,
            id: id.clone(),
            name: request.name.clone(),
        });

        if let Err(e) = ctx.run(&request.name, self.runtime.start_container(&id)).await {
            tracing::warn!(
                "Container {} ({}) was created but failed to start, leaving it in place: {}",
                request.name,
                id,
                e
            );
            return Err(e);
        }

        tracing::info!("Started container {}", request.name);
        Ok(id)
    }
}
