//! Project status aggregation

use super::config::ProjectConfig;
use crate::container::{ContainerStatus, ContainerSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status string of a service with no containers
pub const NOT_CREATED: &str = "not_created";

/// One container of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    /// Runtime state
    pub state: ContainerStatus,
    /// Human-readable status
    pub status: String,
    pub created: DateTime<Utc>,
}

impl From<&ContainerSummary> for ContainerInfo {
    fn from(summary: &ContainerSummary) -> Self {
        Self {
            id: summary.id.clone(),
            name: summary.name.clone(),
            state: summary.state,
            status: summary.status.clone(),
            created: summary.created,
        }
    }
}

/// Derived view of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    /// State of the last container listed, or `not_created`
    pub status: String,
    /// Number of containers found
    pub replicas: usize,
    pub containers: Vec<ContainerInfo>,
}

impl ServiceInfo {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: NOT_CREATED.to_string(),
            replicas: 0,
            containers: Vec::new(),
        }
    }
}

/// Aggregate project state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    /// Every service is running
    Running,
    /// Every service is exited or dead
    Stopped,
    /// Any other mix
    Partial,
    /// No services are declared
    NotCreated,
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectState::Running => write!(f, "running"),
            ProjectState::Stopped => write!(f, "stopped"),
            ProjectState::Partial => write!(f, "partial"),
            ProjectState::NotCreated => write!(f, "not_created"),
        }
    }
}

/// Derived view of a whole project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub name: String,
    pub status: ProjectState,
    pub services: BTreeMap<String, ServiceInfo>,
}

fn project_state(config: &ProjectConfig, services: &BTreeMap<String, ServiceInfo>) -> ProjectState {
    let declared: Vec<&ServiceInfo> = config
        .services
        .keys()
        .filter_map(|name| services.get(name))
        .collect();

    if declared.is_empty() {
        return ProjectState::NotCreated;
    }
    if declared.iter().all(|s| s.status == NOT_CREATED) {
        return ProjectState::NotCreated;
    }

    let running = declared
        .iter()
        .filter(|s| s.status == ContainerStatus::Running.to_string())
        .count();
    let stopped = declared
        .iter()
        .filter(|s| {
            s.status == ContainerStatus::Exited.to_string()
                || s.status == ContainerStatus::Dead.to_string()
        })
        .count();

    if running == declared.len() {
        ProjectState::Running
    } else if stopped == declared.len() {
        ProjectState::Stopped
    } else {
        ProjectState::Partial
    }
}

/// Build a project status from the containers carrying its label.
///
/// Every declared service is reported, with `not_created` when it has no
/// containers. Containers of undeclared services are listed but do not count
/// towards the project state.
pub fn aggregate(project: &str, config: &ProjectConfig, containers: &[ContainerSummary]) -> ProjectStatus {
    let mut services: BTreeMap<String, ServiceInfo> = config
        .services
        .keys()
        .map(|name| (name.clone(), ServiceInfo::empty(name)))
        .collect();

    for container in containers {
        let Some(service) = container.service() else {
            continue;
        };
        let info = services
            .entry(service.to_string())
            .or_insert_with(|| ServiceInfo::empty(service));
        info.replicas += 1;
        info.status = container.state.to_string();
        info.containers.push(ContainerInfo::from(container));
    }

    let status = project_state(config, &services);
    ProjectStatus {
        name: project.to_string(),
        status,
        services,
    }
}
