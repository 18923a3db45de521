//! Project network management

use super::config::CreateNetworkRequest;
use crate::compose::config::NetworkSpec;
use crate::compose::context::OpContext;
use crate::container::{labels, ContainerRuntime, LabelFilter};
use crate::error::Result;
use std::collections::BTreeMap;

/// Runtime name of a project network
pub fn qualified_name(project: &str, network: &str) -> String {
    format!("{}_{}", project, network)
}

/// Creates and removes the networks owned by one project
pub struct NetworkManager<'a> {
    runtime: &'a dyn ContainerRuntime,
    project: &'a str,
}

impl<'a> NetworkManager<'a> {
    /// Create a manager for `project`
    pub fn new(runtime: &'a dyn ContainerRuntime, project: &'a str) -> Self {
        Self { runtime, project }
    }

    fn request(&self, name: &str, spec: &NetworkSpec) -> CreateNetworkRequest {
        CreateNetworkRequest::new(&qualified_name(self.project, name))
            .driver(spec.driver())
            .label(labels::PROJECT, self.project)
            .label(labels::NETWORK, name)
    }

    /// Create every non-external network.
    ///
    /// A network that already exists counts as success. Returns the qualified
    /// names of the networks this call actually created.
    pub async fn ensure(
        &self,
        ctx: &OpContext,
        networks: &BTreeMap<String, NetworkSpec>,
    ) -> Result<Vec<String>> {
        let mut created = Vec::new();

        for (name, spec) in networks.iter().filter(|(_, n)| !n.is_external()) {
            let request = self.request(name, spec);
            match ctx
                .run(&request.name, self.runtime.create_network(&request))
                .await
            {
                Ok(id) => {
                    tracing::info!("Created network {} ({})", request.name, id);
                    created.push(request.name);
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!("Network {} already exists", request.name);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(created)
    }

    /// Remove every network labelled with the project.
    ///
    /// Individual failures are logged and skipped; only listing errors and
    /// cancellation are returned. Returns the names removed.
    pub async fn remove_all(&self, ctx: &OpContext) -> Result<Vec<String>> {
        let filter = LabelFilter::project(self.project);
        let networks = ctx
            .run("list networks", self.runtime.list_networks(&filter))
            .await?;

        let names: Vec<String> = networks.into_iter().map(|n| n.name).collect();
        self.remove(ctx, &names).await
    }

    /// Remove the named networks, best effort
    pub async fn remove(&self, ctx: &OpContext, names: &[String]) -> Result<Vec<String>> {
        let mut removed = Vec::new();

        for name in names {
            match ctx.run(name, self.runtime.remove_network(name)).await {
                Ok(()) => {
                    tracing::info!("Removed network {}", name);
                    removed.push(name.clone());
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => tracing::warn!("Failed to remove network {}: {}", name, e),
            }
        }

        Ok(removed)
    }
}
