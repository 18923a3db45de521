//! Compose project coordinator
//!
//! A `Project` pairs a parsed configuration with a runtime handle and the
//! project's named lock. It never caches container state: every operation
//! re-reads the runtime through the project labels.

use super::config::ProjectConfig;
use super::context::OpContext;
use super::locks::{LockRegistry, ProjectLock};
use super::logs::{combine, ContainerLogs, ProjectLogStream};
use super::provisioner::{Deployment, Provisioner};
use super::resolver::{resolve, waves};
use super::scale::{ScaleOutcome, Scaler, DEFAULT_STOP_GRACE};
use super::status::{aggregate, ProjectStatus};
use crate::container::{
    ContainerRuntime, ContainerStatus, DynRuntime, LabelFilter, LogOptions, RemoveOptions,
};
use crate::error::{CorralError, Result};
use crate::network::NetworkManager;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Tunables for project operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectOptions {
    /// Grace period given to containers before they are killed
    pub stop_grace: Duration,
    /// Provision services of one dependency wave concurrently
    pub parallel_waves: bool,
}

impl Default for ProjectOptions {
    fn default() -> Self {
        Self {
            stop_grace: DEFAULT_STOP_GRACE,
            parallel_waves: false,
        }
    }
}

/// A teardown step that failed and was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownFailure {
    /// Container or service the step was acting on
    pub target: String,
    pub error: String,
}

/// Result of a best-effort teardown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    /// Containers removed, in removal order
    pub removed: Vec<String>,
    /// Networks removed
    pub networks: Vec<String>,
    /// Steps that failed
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    /// Every step succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, target: &str, error: &CorralError) {
        tracing::warn!("Failed to tear down {}: {}", target, error);
        self.failures.push(TeardownFailure {
            target: target.to_string(),
            error: error.to_string(),
        });
    }
}

/// A named compose project bound to a runtime
pub struct Project {
    name: String,
    config: Arc<ProjectConfig>,
    runtime: DynRuntime,
    lock: ProjectLock,
    options: ProjectOptions,
}

impl Project {
    /// Create a project using the process-wide lock registry
    pub fn new(name: &str, config: ProjectConfig, runtime: DynRuntime) -> Self {
        Self::with_registry(name, config, runtime, LockRegistry::global())
    }

    /// Create a project whose lock comes from `registry`
    pub fn with_registry(
        name: &str,
        config: ProjectConfig,
        runtime: DynRuntime,
        registry: &LockRegistry,
    ) -> Self {
        Self {
            name: name.to_string(),
            config: Arc::new(config),
            runtime,
            lock: registry.lock_for(name),
            options: ProjectOptions::default(),
        }
    }

    /// Set operation options
    pub fn options(mut self, options: ProjectOptions) -> Self {
        self.options = options;
        self
    }

    /// Project name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Project configuration
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    fn lock_label(&self) -> String {
        format!("lock project {}", self.name)
    }

    /// Create networks, then every service in dependency order.
    ///
    /// Fails fast; whatever was created before the failure stays in place.
    /// Returns what this call created.
    pub async fn up(&self, ctx: &OpContext) -> Result<Deployment> {
        let _guard = ctx.wait(&self.lock_label(), self.lock.write()).await?;
        let mut ledger = Deployment::new();
        self.apply(ctx, &mut ledger).await?;
        Ok(ledger)
    }

    /// Like [`Project::up`], but removes everything this call created when
    /// it fails, then returns the original error
    pub async fn up_or_rollback(&self, ctx: &OpContext) -> Result<Deployment> {
        let _guard = ctx.wait(&self.lock_label(), self.lock.write()).await?;
        let mut ledger = Deployment::new();

        match self.apply(ctx, &mut ledger).await {
            Ok(()) => Ok(ledger),
            Err(e) => {
                tracing::warn!(
                    "Up of project {} failed, rolling back {} containers and {} networks",
                    self.name,
                    ledger.containers.len(),
                    ledger.networks.len()
                );
                self.rollback(&ctx.detached(), &ledger).await;
                Err(e)
            }
        }
    }

    async fn apply(&self, ctx: &OpContext, ledger: &mut Deployment) -> Result<()> {
        tracing::info!("Starting compose project: {}", self.name);

        // Configuration errors abort before anything touches the runtime
        let plan = self
            .plan()
            .map_err(|e| e.in_operation("up", &self.name, None))?;

        let created = NetworkManager::new(self.runtime(), &self.name)
            .ensure(ctx, &self.config.networks)
            .await
            .map_err(|e| e.in_operation("up", &self.name, None))?;
        for network in &created {
            ledger.record_network(network);
        }

        for wave in &plan {
            if let [service] = wave.as_slice() {
                self.up_service(ctx, service, ledger)
                    .await
                    .map_err(|e| e.in_operation("up", &self.name, Some(service.as_str())))?;
            } else {
                self.up_wave(ctx, wave, ledger).await?;
            }
        }

        tracing::info!("Project {} is up", self.name);
        Ok(())
    }

    fn plan(&self) -> Result<Vec<Vec<String>>> {
        self.config.check_dependencies()?;
        if self.options.parallel_waves {
            return waves(&self.config);
        }
        Ok(resolve(&self.config)
            .strict()?
            .into_iter()
            .map(|service| vec![service])
            .collect())
    }

    /// Provision one wave concurrently; the first failure cancels the rest
    async fn up_wave(&self, ctx: &OpContext, wave: &[String], ledger: &mut Deployment) -> Result<()> {
        let wave_ctx = ctx.child();
        let tasks = wave.iter().map(|service| {
            let wave_ctx = &wave_ctx;
            async move {
                let mut local = Deployment::new();
                let result = self.up_service(wave_ctx, service, &mut local).await;
                if result.is_err() {
                    wave_ctx.cancel();
                }
                (service, local, result)
            }
        });

        let mut failure: Option<CorralError> = None;
        for (service, local, result) in join_all(tasks).await {
            ledger.merge(local);
            let Err(e) = result else {
                continue;
            };
            let e = e.in_operation("up", &self.name, Some(service.as_str()));
            failure = match failure {
                Some(previous) if !(previous.is_cancellation() && !e.is_cancellation()) => {
                    Some(previous)
                }
                _ => Some(e),
            };
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Bring one service to its declared replicas, reusing existing instances
    async fn up_service(&self, ctx: &OpContext, service: &str, ledger: &mut Deployment) -> Result<()> {
        let spec = self.config.service(service)?;
        let replicas = spec.replicas();
        tracing::info!("Starting service {} with {} replicas", service, replicas);

        let existing = ctx
            .run(
                service,
                self.runtime()
                    .list_containers(&LabelFilter::service(&self.name, service)),
            )
            .await?;
        let provisioner = Provisioner::new(self.runtime(), &self.name, &self.config);

        for index in 0..replicas {
            match existing.iter().find(|c| c.instance_index() == Some(index)) {
                Some(container) if container.state == ContainerStatus::Running => {
                    tracing::debug!("Container {} is already running", container.name);
                }
                Some(container) => {
                    ctx.run(&container.name, self.runtime().start_container(&container.id))
                        .await?;
                    tracing::info!("Restarted container {}", container.name);
                }
                None => {
                    provisioner
                        .provision(ctx, service, spec, index, ledger)
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn rollback(&self, ctx: &OpContext, ledger: &Deployment) {
        for created in ledger.containers.iter().rev() {
            if let Err(e) = ctx
                .run(
                    &created.name,
                    self.runtime().stop_container(&created.id, self.options.stop_grace),
                )
                .await
            {
                tracing::debug!("Rollback stop of {} failed: {}", created.name, e);
            }
            let removal = self.runtime().remove_container(
                &created.id,
                RemoveOptions {
                    force: true,
                    volumes: true,
                },
            );
            match ctx.run(&created.name, removal).await {
                Ok(()) => tracing::info!("Rolled back container {}", created.name),
                Err(e) => tracing::warn!("Failed to roll back container {}: {}", created.name, e),
            }
        }

        let networks: Vec<String> = ledger.networks.iter().rev().cloned().collect();
        if let Err(e) = NetworkManager::new(self.runtime(), &self.name)
            .remove(ctx, &networks)
            .await
        {
            tracing::warn!("Failed to roll back networks of {}: {}", self.name, e);
        }
    }

    /// Stop and remove every service in reverse dependency order, then the
    /// project networks.
    ///
    /// Best effort: individual failures are reported, not returned. Only
    /// cancellation aborts.
    pub async fn down(&self, ctx: &OpContext) -> Result<TeardownReport> {
        let _guard = ctx.wait(&self.lock_label(), self.lock.write()).await?;
        tracing::info!("Stopping compose project: {}", self.name);

        let resolution = resolve(&self.config);
        // Nothing placed depends on a blocked service, so those go first, dependents before dependencies
        let mut order: Vec<String> = resolution.blocked().iter().rev().cloned().collect();
        if resolution.has_cycles() {
            tracing::warn!(
                "Project {} has dependency cycles; tearing down {} first",
                self.name,
                order.join(", ")
            );
        }
        order.extend(resolution.order.iter().rev().cloned());

        let mut report = TeardownReport::default();
        for service in &order {
            self.down_service(ctx, service, &mut report)
                .await
                .map_err(|e| e.in_operation("down", &self.name, Some(service.as_str())))?;
        }

        match NetworkManager::new(self.runtime(), &self.name)
            .remove_all(ctx)
            .await
        {
            Ok(removed) => report.networks = removed,
            Err(e) if e.is_cancellation() => return Err(e.in_operation("down", &self.name, None)),
            Err(e) => report.fail("networks", &e),
        }

        tracing::info!(
            "Project {} is down ({} containers removed, {} failures)",
            self.name,
            report.removed.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Only cancellation is returned as an error
    async fn down_service(&self, ctx: &OpContext, service: &str, report: &mut TeardownReport) -> Result<()> {
        let filter = LabelFilter::service(&self.name, service);
        let containers = match ctx.run(service, self.runtime().list_containers(&filter)).await {
            Ok(containers) => containers,
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                report.fail(service, &e);
                return Ok(());
            }
        };

        for container in &containers {
            let stop = self
                .runtime()
                .stop_container(&container.id, self.options.stop_grace);
            match ctx.run(&container.name, stop).await {
                Ok(()) => {}
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    report.fail(&container.name, &e);
                    continue;
                }
            }

            let removal = self.runtime().remove_container(
                &container.id,
                RemoveOptions {
                    force: true,
                    volumes: true,
                },
            );
            match ctx.run(&container.name, removal).await {
                Ok(()) => {
                    tracing::info!("Removed container {}", container.name);
                    report.removed.push(container.name.clone());
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => report.fail(&container.name, &e),
            }
        }

        Ok(())
    }

    /// Bring `service` to exactly `replicas` containers
    pub async fn scale(&self, ctx: &OpContext, service: &str, replicas: u32) -> Result<ScaleOutcome> {
        let _guard = ctx.wait(&self.lock_label(), self.lock.write()).await?;
        self.config
            .service(service)
            .map_err(|e| e.in_operation("scale", &self.name, Some(service)))?;

        let mut ledger = Deployment::new();
        Scaler::new(self.runtime(), &self.name, &self.config)
            .grace(self.options.stop_grace)
            .scale(ctx, service, replicas, &mut ledger)
            .await
            .map_err(|e| e.in_operation("scale", &self.name, Some(service)))
    }

    /// Current state of every declared service
    pub async fn status(&self, ctx: &OpContext) -> Result<ProjectStatus> {
        let _guard = ctx.wait(&self.lock_label(), self.lock.read()).await?;

        let filter = LabelFilter::project(&self.name);
        let containers = ctx
            .run(&self.name, self.runtime().list_containers(&filter))
            .await
            .map_err(|e| e.in_operation("status", &self.name, None))?;

        Ok(aggregate(&self.name, &self.config, &containers))
    }

    /// Combined logs of the project, or of one service.
    ///
    /// The read lock is held while containers are listed and their streams
    /// opened, not while the returned stream is consumed.
    pub async fn logs(
        &self,
        ctx: &OpContext,
        service: Option<&str>,
        options: LogOptions,
    ) -> Result<ProjectLogStream> {
        let _guard = ctx.wait(&self.lock_label(), self.lock.read()).await?;

        let filter = match service {
            Some(service) => {
                self.config
                    .service(service)
                    .map_err(|e| e.in_operation("logs", &self.name, Some(service)))?;
                LabelFilter::service(&self.name, service)
            }
            None => LabelFilter::project(&self.name),
        };

        let containers = ctx
            .run(&self.name, self.runtime().list_containers(&filter))
            .await
            .map_err(|e| e.in_operation("logs", &self.name, service))?;

        let mut sources = Vec::with_capacity(containers.len());
        for container in containers {
            let opened = ctx
                .run(&container.name, self.runtime().logs(&container.id, &options))
                .await;
            match opened {
                Ok(stream) => sources.push(ContainerLogs {
                    service: container.service().unwrap_or_default().to_string(),
                    container: container.name,
                    stream,
                }),
                Err(e) if e.is_cancellation() => {
                    return Err(e.in_operation("logs", &self.name, service))
                }
                Err(e) => tracing::warn!("Skipping logs of {}: {}", container.name, e),
            }
        }

        Ok(combine(sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::config::{NetworkSpec, ServiceSpec};
    use crate::compose::logs::LogEvent;
    use crate::compose::status::ProjectState;
    use crate::container::{MemoryRuntime, OutputStream, RuntimeEvent};
    use futures::StreamExt;

    fn project(config: ProjectConfig) -> (Arc<MemoryRuntime>, Project) {
        let runtime = Arc::new(MemoryRuntime::new());
        let registry = LockRegistry::new();
        let project = Project::with_registry("shop", config, runtime.clone(), &registry);
        (runtime, project)
    }

    fn example() -> ProjectConfig {
        ProjectConfig::default()
            .with_service("web", ServiceSpec::new("nginx").with_replicas(2))
            .with_service("db", ServiceSpec::new("postgres").depends_on(&["migrate"]))
            .with_service("migrate", ServiceSpec::new("migrator"))
            .with_network("back", NetworkSpec::default())
    }

    fn created(journal: &[RuntimeEvent]) -> Vec<String> {
        journal
            .iter()
            .filter_map(|event| match event {
                RuntimeEvent::Create(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn stopped(journal: &[RuntimeEvent]) -> Vec<String> {
        journal
            .iter()
            .filter_map(|event| match event {
                RuntimeEvent::Stop(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn failing_service(err: &CorralError) -> Option<&str> {
        match err {
            CorralError::Operation { service, .. } => service.as_deref(),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_up_example_project() {
        let (runtime, project) = project(example());
        let ctx = OpContext::new();

        let deployment = project.up(&ctx).await.unwrap();
        assert_eq!(deployment.networks, vec!["shop_back"]);
        assert_eq!(
            created(&runtime.journal()),
            vec!["shop_migrate_0", "shop_db_0", "shop_web_0", "shop_web_1"]
        );

        let status = project.status(&ctx).await.unwrap();
        assert_eq!(status.status, ProjectState::Running);
        assert_eq!(status.services["web"].replicas, 2);
        assert_eq!(status.services["db"].replicas, 1);
    }

    #[tokio::test]
    async fn test_down_reverses_dependency_order() {
        let config = ProjectConfig::default()
            .with_service("a", ServiceSpec::new("base"))
            .with_service("b", ServiceSpec::new("app").depends_on(&["a"]));
        let (runtime, project) = project(config);
        let ctx = OpContext::new();

        project.up(&ctx).await.unwrap();
        assert_eq!(created(&runtime.journal()), vec!["shop_a_0", "shop_b_0"]);

        let report = project.down(&ctx).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(stopped(&runtime.journal()), vec!["shop_b_0", "shop_a_0"]);
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn test_up_is_rerunnable() {
        let (runtime, project) = project(example());
        let ctx = OpContext::new();

        project.up(&ctx).await.unwrap();
        runtime.set_state("shop_db_0", ContainerStatus::Exited);

        let second = project.up(&ctx).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(runtime.containers().len(), 4);
        assert_eq!(
            project.status(&ctx).await.unwrap().status,
            ProjectState::Running
        );
    }

    #[tokio::test]
    async fn test_up_rejects_cycles() {
        let config = ProjectConfig::default()
            .with_service("a", ServiceSpec::new("x").depends_on(&["b"]))
            .with_service("b", ServiceSpec::new("x").depends_on(&["a"]))
            .with_network("back", NetworkSpec::default());
        let (runtime, project) = project(config);

        let err = project.up(&OpContext::new()).await.unwrap_err();
        assert!(matches!(err.root(), CorralError::Cycle { .. }));
        assert!(err.to_string().contains("project shop"));
        assert!(runtime.journal().is_empty());

        let parallel = project.options(ProjectOptions {
            parallel_waves: true,
            ..Default::default()
        });
        let err = parallel.up(&OpContext::new()).await.unwrap_err();
        assert!(matches!(err.root(), CorralError::Cycle { .. }));
        assert!(runtime.journal().is_empty());
    }

    #[tokio::test]
    async fn test_up_rejects_unknown_dependency() {
        let config = ProjectConfig::default()
            .with_service("web", ServiceSpec::new("nginx").depends_on(&["ghost"]))
            .with_network("back", NetworkSpec::default());
        let (runtime, project) = project(config);

        let err = project.up(&OpContext::new()).await.unwrap_err();
        assert!(matches!(
            err.root(),
            CorralError::UnknownDependency { service, dependency }
                if service == "web" && dependency == "ghost"
        ));
        assert!(err.to_string().contains("project shop"));
        assert!(runtime.journal().is_empty());
        assert!(runtime.containers().is_empty());
    }

    fn chain_with_broken_api() -> ProjectConfig {
        ProjectConfig::default()
            .with_service("db", ServiceSpec::new("postgres"))
            .with_service("api", ServiceSpec::new("broken").depends_on(&["db"]))
            .with_service("web", ServiceSpec::new("nginx").depends_on(&["api"]))
            .with_network("back", NetworkSpec::default())
    }

    #[tokio::test]
    async fn test_up_fails_fast_without_rollback() {
        let (runtime, project) = project(chain_with_broken_api());
        runtime.fail_start_for_image("broken");

        let err = project.up(&OpContext::new()).await.unwrap_err();
        assert_eq!(failing_service(&err), Some("api"));
        assert!(err.to_string().contains("shop"));

        let names: Vec<String> = runtime.containers().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["shop_db_0", "shop_api_0"]);
        assert_eq!(runtime.networks().len(), 1);
    }

    #[tokio::test]
    async fn test_up_or_rollback_cleans_up() {
        let (runtime, project) = project(chain_with_broken_api());
        runtime.fail_start_for_image("broken");

        let err = project.up_or_rollback(&OpContext::new()).await.unwrap_err();
        assert_eq!(failing_service(&err), Some("api"));
        assert!(runtime.containers().is_empty());
        assert!(runtime.networks().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_keeps_preexisting_network() {
        let (runtime, project) = project(chain_with_broken_api());
        runtime.seed_network(&crate::network::CreateNetworkRequest::new("shop_back"));
        runtime.fail_start_for_image("broken");

        project.up_or_rollback(&OpContext::new()).await.unwrap_err();
        assert_eq!(runtime.networks().len(), 1);
    }

    #[tokio::test]
    async fn test_down_is_best_effort() {
        let (runtime, project) = project(example());
        let ctx = OpContext::new();
        project.up(&ctx).await.unwrap();
        runtime.fail_stop_for("shop_web_1");

        let report = project.down(&ctx).await.unwrap();

        assert_eq!(report.removed.len(), 3);
        let targets: Vec<&str> = report.failures.iter().map(|f| f.target.as_str()).collect();
        assert!(targets.contains(&"shop_web_1"));
        // The surviving container keeps its network attached
        assert_eq!(runtime.containers().len(), 1);
        assert_eq!(runtime.networks().len(), 1);
        assert!(report.networks.is_empty());
    }

    #[tokio::test]
    async fn test_down_tears_down_cyclic_services() {
        let config = ProjectConfig::default()
            .with_service("api", ServiceSpec::new("x").depends_on(&["db"]))
            .with_service("db", ServiceSpec::new("x").depends_on(&["api"]))
            .with_service("web", ServiceSpec::new("x").depends_on(&["db"]))
            .with_service("cache", ServiceSpec::new("x"));
        let (runtime, project) = project(config);
        let ctx = OpContext::new();
        for service in ["api", "db", "web", "cache"] {
            project.scale(&ctx, service, 1).await.unwrap();
        }

        let report = project.down(&ctx).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.removed.len(), 4);
        assert_eq!(report.removed.last().map(String::as_str), Some("shop_cache_0"));

        let order = stopped(&runtime.journal());
        let at = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(at("shop_web_0") < at("shop_db_0"));
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn test_down_continues_past_remove_failure() {
        let (runtime, project) = project(example());
        let ctx = OpContext::new();
        project.up(&ctx).await.unwrap();
        runtime.fail_remove_for("shop_db_0");

        let report = project.down(&ctx).await.unwrap();

        let targets: Vec<&str> = report.failures.iter().map(|f| f.target.as_str()).collect();
        assert_eq!(targets, vec!["shop_db_0"]);
        assert_eq!(report.removed.len(), 3);
        assert!(report.removed.contains(&"shop_migrate_0".to_string()));
        // The container was stopped even though it could not be removed
        let left = runtime.containers();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].state, ContainerStatus::Exited);
        // Still attached, so the network stays
        assert!(report.networks.is_empty());
        assert_eq!(runtime.networks().len(), 1);
    }

    #[tokio::test]
    async fn test_down_reports_listing_failures() {
        let (runtime, project) = project(example());
        let ctx = OpContext::new();
        project.up(&ctx).await.unwrap();
        runtime.fail_listing(true);

        let report = project.down(&ctx).await.unwrap();
        let mut targets: Vec<&str> = report.failures.iter().map(|f| f.target.as_str()).collect();
        targets.sort();
        assert_eq!(targets, vec!["db", "migrate", "web"]);
        assert!(report.removed.is_empty());
        assert_eq!(runtime.containers().len(), 4);

        runtime.fail_listing(false);
        let retry = project.down(&ctx).await.unwrap();
        assert!(retry.is_clean());
        assert!(runtime.containers().is_empty());
        assert!(runtime.networks().is_empty());
    }

    #[tokio::test]
    async fn test_down_leaves_other_projects_alone() {
        let runtime = Arc::new(MemoryRuntime::new());
        let registry = LockRegistry::new();
        let shop = Project::with_registry("shop", example(), runtime.clone(), &registry);
        let blog = Project::with_registry("blog", example(), runtime.clone(), &registry);
        let ctx = OpContext::new();

        shop.up(&ctx).await.unwrap();
        blog.up(&ctx).await.unwrap();
        shop.down(&ctx).await.unwrap();

        assert_eq!(runtime.containers().len(), 4);
        assert_eq!(
            blog.status(&ctx).await.unwrap().status,
            ProjectState::Running
        );
    }

    #[tokio::test]
    async fn test_scale_through_project() {
        let (runtime, project) = project(example());
        let ctx = OpContext::new();
        project.up(&ctx).await.unwrap();

        let outcome = project.scale(&ctx, "web", 0).await.unwrap();
        assert_eq!(outcome.removed, vec!["shop_web_1", "shop_web_0"]);

        let outcome = project.scale(&ctx, "web", 3).await.unwrap();
        assert_eq!(outcome.created.len(), 3);
        assert_eq!(project.status(&ctx).await.unwrap().services["web"].replicas, 3);
        assert_eq!(runtime.containers().len(), 5);

        let err = project.scale(&ctx, "ghost", 1).await.unwrap_err();
        assert!(matches!(err.root(), CorralError::ServiceNotFound(_)));
        assert!(err.to_string().contains("project shop"));
    }

    #[tokio::test]
    async fn test_status_not_created() {
        let (_runtime, project) = project(example());
        let status = project.status(&OpContext::new()).await.unwrap();

        assert_eq!(status.status, ProjectState::NotCreated);
        assert_eq!(status.services.len(), 3);
        assert!(status.services.values().all(|s| s.replicas == 0));
    }

    #[tokio::test]
    async fn test_status_stopped_and_partial() {
        let (runtime, project) = project(example());
        let ctx = OpContext::new();
        project.up(&ctx).await.unwrap();

        runtime.set_state("shop_db_0", ContainerStatus::Exited);
        assert_eq!(project.status(&ctx).await.unwrap().status, ProjectState::Partial);

        for name in ["shop_web_0", "shop_web_1", "shop_migrate_0"] {
            runtime.set_state(name, ContainerStatus::Dead);
        }
        assert_eq!(project.status(&ctx).await.unwrap().status, ProjectState::Stopped);
    }

    #[tokio::test]
    async fn test_logs_sections() {
        let (runtime, project) = project(example());
        let ctx = OpContext::new();
        project.up(&ctx).await.unwrap();
        runtime.push_log("shop_web_0", OutputStream::Stdout, "GET /");
        runtime.push_log("shop_web_1", OutputStream::Stderr, "oops");

        let events: Vec<LogEvent> = project
            .logs(&ctx, Some("web"), LogOptions::default())
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[0],
            LogEvent::Section { container, .. } if container == "shop_web_0"
        ));
        assert!(matches!(&events[3], LogEvent::Output(chunk) if chunk.stream == OutputStream::Stderr));

        let err = project
            .logs(&ctx, Some("ghost"), LogOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err.root(), CorralError::ServiceNotFound(_)));
    }

    #[tokio::test]
    async fn test_parallel_waves() {
        let config = ProjectConfig::default()
            .with_service("db", ServiceSpec::new("postgres"))
            .with_service("cache", ServiceSpec::new("redis"))
            .with_service("api", ServiceSpec::new("api").depends_on(&["db", "cache"]));
        let (runtime, project) = project(config);
        let project = project.options(ProjectOptions {
            parallel_waves: true,
            ..Default::default()
        });

        project.up(&OpContext::new()).await.unwrap();
        let order = created(&runtime.journal());
        assert_eq!(order.len(), 3);
        assert_eq!(order[2], "shop_api_0");
    }

    #[tokio::test]
    async fn test_parallel_wave_failure_names_service() {
        let config = ProjectConfig::default()
            .with_service("db", ServiceSpec::new("postgres"))
            .with_service("cache", ServiceSpec::new("broken"))
            .with_service("api", ServiceSpec::new("api").depends_on(&["db", "cache"]));
        let (runtime, project) = project(config);
        let project = project.options(ProjectOptions {
            parallel_waves: true,
            ..Default::default()
        });
        runtime.fail_start_for_image("broken");

        let err = project.up(&OpContext::new()).await.unwrap_err();
        assert_eq!(failing_service(&err), Some("cache"));
        assert!(!err.is_cancellation());
        assert!(runtime.containers().iter().all(|c| c.name != "shop_api_0"));
    }

    #[tokio::test]
    async fn test_cancelled_up() {
        let (runtime, project) = project(example());
        let ctx = OpContext::new();
        ctx.cancel();

        let err = project.up(&ctx).await.unwrap_err();
        assert!(err.is_cancellation());
        assert!(runtime.journal().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_up() {
        let runtime = Arc::new(MemoryRuntime::new().with_latency(Duration::from_millis(20)));
        let registry = LockRegistry::new();
        let project = Project::with_registry("shop", example(), runtime.clone(), &registry);
        let ctx = OpContext::new();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = project.up(&ctx).await.unwrap_err();
        assert!(err.is_cancellation());
        assert!(runtime.containers().len() < 4);
    }

    #[tokio::test]
    async fn test_writers_exclude_across_instances() {
        let runtime = Arc::new(MemoryRuntime::new());
        let registry = LockRegistry::new();
        let first = Project::with_registry("shop", example(), runtime.clone(), &registry);
        let second = Project::with_registry("shop", example(), runtime.clone(), &registry);

        let _held = first.lock.write().await;
        let ctx = OpContext::new().with_timeout(Duration::from_millis(50));
        let err = second.status(&ctx).await.unwrap_err();
        assert!(matches!(err, CorralError::Timeout(_)));
    }
}
