//! Replica reconciliation for a single service

use super::config::ProjectConfig;
use super::context::OpContext;
use super::provisioner::{container_name, Deployment, Provisioner};
use crate::container::{ContainerRuntime, ContainerSummary, LabelFilter, RemoveOptions};
use crate::error::Result;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Duration;

/// Default stop grace period before a container is killed
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(30);

/// What a scale call changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaleOutcome {
    /// Names of containers created
    pub created: Vec<String>,
    /// Names of containers removed
    pub removed: Vec<String>,
}

impl ScaleOutcome {
    /// Nothing changed
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

/// Sort containers so the first ones are removed first.
///
/// Highest instance index goes first. Containers without a readable index
/// go before all indexed ones; ties break on name.
pub fn removal_order(mut containers: Vec<ContainerSummary>) -> Vec<ContainerSummary> {
    containers.sort_by(|a, b| match (a.instance_index(), b.instance_index()) {
        (None, None) => a.name.cmp(&b.name),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.name.cmp(&b.name)),
    });
    containers
}

/// `count` free instance indices, starting at `start` and skipping `used`
pub fn next_indices(used: &BTreeSet<u32>, start: u32, count: usize) -> Vec<u32> {
    (start..)
        .filter(|index| !used.contains(index))
        .take(count)
        .collect()
}

/// Stop a container, then force-remove it along with its anonymous volumes
pub async fn remove_instance(
    runtime: &dyn ContainerRuntime,
    ctx: &OpContext,
    container: &ContainerSummary,
    grace: Duration,
) -> Result<()> {
    ctx.run(&container.name, runtime.stop_container(&container.id, grace))
        .await?;
    ctx.run(
        &container.name,
        runtime.remove_container(
            &container.id,
            RemoveOptions {
                force: true,
                volumes: true,
            },
        ),
    )
    .await?;
    tracing::info!("Removed container {}", container.name);
    Ok(())
}

/// Brings one service to a desired replica count
pub struct Scaler<'a> {
    runtime: &'a dyn ContainerRuntime,
    project: &'a str,
    config: &'a ProjectConfig,
    grace: Duration,
}

impl<'a> Scaler<'a> {
    /// Create a scaler
    pub fn new(runtime: &'a dyn ContainerRuntime, project: &'a str, config: &'a ProjectConfig) -> Self {
        Self {
            runtime,
            project,
            config,
            grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Set the stop grace period
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Create or remove containers until `desired` exist.
    ///
    /// The first failure aborts; work done before it stays in place.
    pub async fn scale(
        &self,
        ctx: &OpContext,
        service: &str,
        desired: u32,
        ledger: &mut Deployment,
    ) -> Result<ScaleOutcome> {
        let spec = self.config.service(service)?;
        let filter = LabelFilter::service(self.project, service);
        let containers = ctx
            .run(service, self.runtime.list_containers(&filter))
            .await?;

        let current = containers.len();
        let desired_count = desired as usize;
        let mut outcome = ScaleOutcome::default();

        match desired_count.cmp(&current) {
            Ordering::Equal => {
                tracing::debug!("Service {} already has {} replicas", service, current);
            }
            Ordering::Greater => {
                tracing::info!("Scaling {} up from {} to {}", service, current, desired);
                let used: BTreeSet<u32> =
                    containers.iter().filter_map(|c| c.instance_index()).collect();
                let start = u32::try_from(current).unwrap_or(u32::MAX);
                let provisioner = Provisioner::new(self.runtime, self.project, self.config);

                for index in next_indices(&used, start, desired_count - current) {
                    provisioner
                        .provision(ctx, service, spec, index, ledger)
                        .await?;
                    outcome
                        .created
                        .push(container_name(self.project, service, index));
                }
            }
            Ordering::Less => {
                tracing::info!("Scaling {} down from {} to {}", service, current, desired);
                let excess = current - desired_count;
                for container in removal_order(containers).iter().take(excess) {
                    remove_instance(self.runtime, ctx, container, self.grace).await?;
                    outcome.removed.push(container.name.clone());
                }
            }
        }

        Ok(outcome)
    }
}
