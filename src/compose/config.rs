//! Compose project model
//!
//! The parsed, immutable description of a project's services, networks and
//! volumes. Maps are ordered so every iteration over a project is
//! lexicographic.

use crate::error::{CorralError, Result};
use crate::network::NetworkDriver;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Compose file contents for one project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Compose file version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Optional top-level project name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Services
    #[serde(default, deserialize_with = "nullable_entries")]
    pub services: BTreeMap<String, ServiceSpec>,
    /// Networks
    #[serde(default, deserialize_with = "nullable_entries")]
    pub networks: BTreeMap<String, NetworkSpec>,
    /// Volumes
    #[serde(default, deserialize_with = "nullable_entries")]
    pub volumes: BTreeMap<String, VolumeSpec>,
}

impl ProjectConfig {
    /// Parse compose YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| CorralError::ComposeParse(format!("Failed to parse YAML: {}", e)))
    }

    /// Look up a service by name
    pub fn service(&self, name: &str) -> Result<&ServiceSpec> {
        self.services
            .get(name)
            .ok_or_else(|| CorralError::ServiceNotFound(name.to_string()))
    }

    /// Fail on the first dependency that names no declared service
    pub fn check_dependencies(&self) -> Result<()> {
        for (name, service) in &self.services {
            if let Some(dependency) = service
                .dependencies()
                .into_iter()
                .find(|dep| !self.services.contains_key(dep))
            {
                return Err(CorralError::UnknownDependency {
                    service: name.clone(),
                    dependency,
                });
            }
        }
        Ok(())
    }

    /// Networks the engine creates and removes itself
    pub fn managed_networks(&self) -> impl Iterator<Item = (&String, &NetworkSpec)> {
        self.networks.iter().filter(|(_, n)| !n.is_external())
    }

    /// Add a service
    pub fn with_service(mut self, name: &str, spec: ServiceSpec) -> Self {
        self.services.insert(name.to_string(), spec);
        self
    }

    /// Add a network
    pub fn with_network(mut self, name: &str, spec: NetworkSpec) -> Self {
        self.networks.insert(name.to_string(), spec);
        self
    }
}

/// Map whose values may be written as bare keys (`front:`)
fn nullable_entries<'de, D, T>(deserializer: D) -> std::result::Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let raw = Option::<BTreeMap<String, Option<T>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| (name, value.unwrap_or_default()))
        .collect())
}

/// One service declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Image reference
    #[serde(default)]
    pub image: String,
    /// Command override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    /// Published ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortConfig>,
    /// Bind mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeMount>,
    /// Services that must be up first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOn>,
    /// Deploy directive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeploySpec>,
}

impl ServiceSpec {
    /// Service running `image`
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
            ..Self::default()
        }
    }

    /// Set dependencies
    pub fn depends_on(mut self, services: &[&str]) -> Self {
        self.depends_on = Some(DependsOn::List(
            services.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Set the desired replica count
    pub fn with_replicas(mut self, replicas: i64) -> Self {
        self.deploy = Some(DeploySpec {
            replicas: Some(replicas),
        });
        self
    }

    /// Publish a port
    pub fn port(mut self, spec: &str) -> Self {
        self.ports.push(PortConfig::Short(spec.to_string()));
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        let mut vars = self.environment_vars();
        vars.insert(key.to_string(), value.to_string());
        self.environment = Some(Environment::Map(
            vars.into_iter()
                .map(|(k, v)| (k, Some(serde_yaml::Value::String(v))))
                .collect(),
        ));
        self
    }

    /// Desired replica count, at least one
    pub fn replicas(&self) -> u32 {
        match self.deploy.as_ref().and_then(|d| d.replicas) {
            Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
            _ => 1,
        }
    }

    /// Declared dependencies, sorted
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps = match &self.depends_on {
            Some(DependsOn::List(list)) => list.clone(),
            Some(DependsOn::Map(map)) => map.keys().cloned().collect(),
            None => Vec::new(),
        };
        deps.sort();
        deps.dedup();
        deps
    }

    /// Command override as argv.
    ///
    /// A string command is split with shell quoting rules; an unclosed quote
    /// is a configuration error.
    pub fn command_args(&self) -> Result<Option<Vec<String>>> {
        match &self.command {
            Some(Command::Shell(line)) => shlex::split(line).map(Some).ok_or_else(|| {
                CorralError::InvalidConfig(format!("unclosed quote in command '{}'", line))
            }),
            Some(Command::Exec(args)) => Ok(Some(args.clone())),
            None => Ok(None),
        }
    }

    /// Environment as an ordered map
    pub fn environment_vars(&self) -> BTreeMap<String, String> {
        match &self.environment {
            Some(Environment::Map(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.as_ref().map(scalar_to_string).unwrap_or_default()))
                .collect(),
            Some(Environment::List(list)) => list
                .iter()
                .map(|entry| match entry.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (entry.clone(), String::new()),
                })
                .collect(),
            None => BTreeMap::new(),
        }
    }

    /// Port publish strings in short syntax
    pub fn port_specs(&self) -> Vec<String> {
        self.ports.iter().map(PortConfig::to_short).collect()
    }

    /// Bind mounts in `source:target[:mode]` form
    pub fn binds(&self) -> Vec<String> {
        self.volumes.iter().filter_map(VolumeMount::to_bind).collect()
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Command configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

/// Environment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    /// Array of KEY=value strings
    List(Vec<String>),
    /// Map of key to value
    Map(BTreeMap<String, Option<serde_yaml::Value>>),
}

/// Depends on configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    /// Array of service names
    List(Vec<String>),
    /// Map of service to condition, conditions are not enforced
    Map(BTreeMap<String, DependsOnCondition>),
}

/// Depends on condition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependsOnCondition {
    /// Condition to wait for
    #[serde(default)]
    pub condition: Option<String>,
}

/// Port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortConfig {
    /// Bare container port: `80`
    Number(u32),
    /// Short syntax: "8080:80"
    Short(String),
    /// Long syntax
    Long(PortConfigLong),
}

impl PortConfig {
    /// Render in short syntax
    pub fn to_short(&self) -> String {
        match self {
            PortConfig::Number(port) => port.to_string(),
            PortConfig::Short(spec) => spec.clone(),
            PortConfig::Long(long) => {
                let mut spec = String::new();
                if let Some(ip) = &long.host_ip {
                    spec.push_str(ip);
                    spec.push(':');
                }
                if let Some(published) = &long.published {
                    spec.push_str(&scalar_to_string(published));
                    spec.push(':');
                }
                spec.push_str(&long.target.to_string());
                if let Some(protocol) = &long.protocol {
                    spec.push('/');
                    spec.push_str(protocol);
                }
                spec
            }
        }
    }
}

/// Long port configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortConfigLong {
    /// Target port in container
    pub target: u32,
    /// Published port on host
    #[serde(default)]
    pub published: Option<serde_yaml::Value>,
    /// Host IP to bind to
    #[serde(default)]
    pub host_ip: Option<String>,
    /// Protocol (tcp/udp)
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Volume mount configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeMount {
    /// Short syntax: "host:container:mode"
    Short(String),
    /// Long syntax
    Long(VolumeMountLong),
}

impl VolumeMount {
    /// Render as a bind string; long mounts without a source are anonymous
    pub fn to_bind(&self) -> Option<String> {
        match self {
            VolumeMount::Short(spec) => Some(spec.clone()),
            VolumeMount::Long(long) => {
                let source = long.source.as_ref()?;
                let mut bind = format!("{}:{}", source, long.target);
                if long.read_only.unwrap_or(false) {
                    bind.push_str(":ro");
                }
                Some(bind)
            }
        }
    }

    /// Named volume referenced by this mount, if any
    pub fn volume_name(&self) -> Option<&str> {
        let source = match self {
            VolumeMount::Short(spec) => spec.split(':').next()?,
            VolumeMount::Long(long) => long.source.as_deref()?,
        };
        let is_path = source.starts_with('/')
            || source.starts_with('.')
            || source.starts_with('~')
            || source.contains('/');
        if source.is_empty() || is_path {
            None
        } else {
            Some(source)
        }
    }
}

/// Long volume mount configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMountLong {
    /// Mount type (volume, bind)
    #[serde(rename = "type", default)]
    pub mount_type: Option<String>,
    /// Source path or volume name
    #[serde(default)]
    pub source: Option<String>,
    /// Target path in container
    pub target: String,
    /// Read only
    #[serde(default)]
    pub read_only: Option<bool>,
}

/// Deploy configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploySpec {
    /// Number of replicas, non-positive means one
    #[serde(default)]
    pub replicas: Option<i64>,
}

/// Network declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Driver, bridge when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// External network, never created or removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalConfig>,
}

impl NetworkSpec {
    /// Externally managed network
    pub fn external() -> Self {
        Self {
            external: Some(ExternalConfig::Bool(true)),
            ..Self::default()
        }
    }

    /// Whether the network is managed outside the project
    pub fn is_external(&self) -> bool {
        self.external.as_ref().is_some_and(ExternalConfig::is_external)
    }

    /// Network driver
    pub fn driver(&self) -> NetworkDriver {
        self.driver
            .as_deref()
            .map(NetworkDriver::parse)
            .unwrap_or_default()
    }
}

/// Volume declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// External volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalConfig>,
}

impl VolumeSpec {
    /// Whether the volume is managed outside the project
    pub fn is_external(&self) -> bool {
        self.external.as_ref().is_some_and(ExternalConfig::is_external)
    }
}

/// External resource configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalConfig {
    /// Boolean
    Bool(bool),
    /// With name
    Named { name: String },
}

impl ExternalConfig {
    /// `external: true` or a named external resource
    pub fn is_external(&self) -> bool {
        match self {
            ExternalConfig::Bool(b) => *b,
            ExternalConfig::Named { .. } => true,
        }
    }
}
