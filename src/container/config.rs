//! Container model shared by every runtime backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Labels the engine stamps on everything it creates
pub mod labels {
    /// Owning project name
    pub const PROJECT: &str = "com.docker.compose.project";
    /// Owning service name
    pub const SERVICE: &str = "com.docker.compose.service";
    /// Zero-based replica index
    pub const INSTANCE: &str = "com.docker.compose.instance";
    /// Unqualified network name (networks only)
    pub const NETWORK: &str = "com.docker.compose.network";
}

/// Container state as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is created but not running
    Created,
    /// Container is running
    Running,
    /// Container is paused
    Paused,
    /// Container is restarting
    Restarting,
    /// Container is being removed
    Removing,
    /// Container has exited
    Exited,
    /// Container is in an error state
    Dead,
    /// Runtime reported something we do not recognise
    Unknown,
}

impl ContainerStatus {
    /// Parse the runtime's state string; unrecognised values map to `Unknown`
    pub fn parse(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }

    /// Exited or dead
    pub fn is_stopped(&self) -> bool {
        matches!(self, ContainerStatus::Exited | ContainerStatus::Dead)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Paused => write!(f, "paused"),
            ContainerStatus::Restarting => write!(f, "restarting"),
            ContainerStatus::Removing => write!(f, "removing"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Dead => write!(f, "dead"),
            ContainerStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One container as seen through a list or inspect call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Runtime container ID
    pub id: String,
    /// Container name without the leading slash
    pub name: String,
    /// Image reference
    pub image: String,
    /// Machine-readable state
    pub state: ContainerStatus,
    /// Human-readable status, e.g. "Up 3 minutes"
    pub status: String,
    /// Container labels
    pub labels: HashMap<String, String>,
    /// Creation time
    pub created: DateTime<Utc>,
}

impl ContainerSummary {
    /// Look up a label value
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Service this container realises, if labelled
    pub fn service(&self) -> Option<&str> {
        self.label(labels::SERVICE)
    }

    /// Replica index parsed from the instance label
    pub fn instance_index(&self) -> Option<u32> {
        self.label(labels::INSTANCE)?.parse().ok()
    }
}

/// Transport protocol of a published port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

/// Host side of a published port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host interface, all interfaces when absent
    pub host_ip: Option<String>,
    /// Host port or port range, runtime-assigned when absent
    pub host_port: Option<String>,
}

/// Everything needed to create one container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateContainerRequest {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Command override
    pub cmd: Option<Vec<String>>,
    /// Environment as `KEY=VALUE` entries
    pub env: Vec<String>,
    /// Exposed ports keyed `port/proto`
    pub exposed_ports: BTreeSet<String>,
    /// Port bindings keyed `port/proto`
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
    /// Bind mounts in `source:target[:mode]` form
    pub binds: Vec<String>,
    /// Container labels
    pub labels: HashMap<String, String>,
    /// Networks to attach at creation time
    pub networks: Vec<String>,
}

/// Options for container removal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Kill the container if it is still running
    pub force: bool,
    /// Remove anonymous volumes along with the container
    pub volumes: bool,
}

/// Label selector used to discover containers and networks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    selectors: Vec<(String, Option<String>)>,
}

impl LabelFilter {
    /// Empty filter, matches everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything belonging to a project
    pub fn project(project: &str) -> Self {
        Self::new().with(labels::PROJECT, project)
    }

    /// Everything belonging to one service of a project
    pub fn service(project: &str, service: &str) -> Self {
        Self::project(project).with(labels::SERVICE, service)
    }

    /// Require `key=value`
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.selectors.push((key.to_string(), Some(value.to_string())));
        self
    }

    /// Require the label to be present with any value
    pub fn has(mut self, key: &str) -> Self {
        self.selectors.push((key.to_string(), None));
        self
    }

    /// Check a label set against every selector
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.selectors.iter().all(|(key, value)| match value {
            Some(value) => labels.get(key) == Some(value),
            None => labels.contains_key(key),
        })
    }

    /// Selectors in the runtime's `key=value` / `key` filter syntax
    pub fn to_filter_args(&self) -> Vec<String> {
        self.selectors
            .iter()
            .map(|(key, value)| match value {
                Some(value) => format!("{}={}", key, value),
                None => key.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(ContainerStatus::parse("running"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::parse("Exited"), ContainerStatus::Exited);
        assert_eq!(ContainerStatus::parse("weird"), ContainerStatus::Unknown);
        assert!(ContainerStatus::Dead.is_stopped());
        assert!(!ContainerStatus::Created.is_stopped());
    }

    #[test]
    fn test_label_filter_matches() {
        let filter = LabelFilter::service("shop", "web");
        let ok = labelled(&[(labels::PROJECT, "shop"), (labels::SERVICE, "web")]);
        let other = labelled(&[(labels::PROJECT, "shop"), (labels::SERVICE, "db")]);
        let bare = labelled(&[]);

        assert!(filter.matches(&ok));
        assert!(!filter.matches(&other));
        assert!(!filter.matches(&bare));
        assert!(LabelFilter::new().has(labels::PROJECT).matches(&ok));
    }

    #[test]
    fn test_filter_args() {
        let args = LabelFilter::project("shop").has(labels::SERVICE).to_filter_args();
        assert_eq!(
            args,
            vec![
                "com.docker.compose.project=shop".to_string(),
                "com.docker.compose.service".to_string()
            ]
        );
    }

    #[test]
    fn test_instance_index() {
        let summary = ContainerSummary {
            id: "abc".to_string(),
            name: "shop_web_2".to_string(),
            image: "nginx".to_string(),
            state: ContainerStatus::Running,
            status: "Up".to_string(),
            labels: labelled(&[(labels::SERVICE, "web"), (labels::INSTANCE, "2")]),
            created: Utc::now(),
        };
        assert_eq!(summary.instance_index(), Some(2));
        assert_eq!(summary.service(), Some("web"));
    }
}
