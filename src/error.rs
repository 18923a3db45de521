//! Error types for Corral

use thiserror::Error;

/// Result type for Corral operations
pub type Result<T> = std::result::Result<T, CorralError>;

/// Container runtime call that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeOp {
    ListContainers,
    InspectContainer,
    CreateContainer,
    StartContainer,
    StopContainer,
    RemoveContainer,
    CreateNetwork,
    ListNetworks,
    RemoveNetwork,
    Logs,
}

impl std::fmt::Display for RuntimeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeOp::ListContainers => write!(f, "list containers"),
            RuntimeOp::InspectContainer => write!(f, "inspect container"),
            RuntimeOp::CreateContainer => write!(f, "create container"),
            RuntimeOp::StartContainer => write!(f, "start container"),
            RuntimeOp::StopContainer => write!(f, "stop container"),
            RuntimeOp::RemoveContainer => write!(f, "remove container"),
            RuntimeOp::CreateNetwork => write!(f, "create network"),
            RuntimeOp::ListNetworks => write!(f, "list networks"),
            RuntimeOp::RemoveNetwork => write!(f, "remove network"),
            RuntimeOp::Logs => write!(f, "stream logs"),
        }
    }
}

/// Classification of a runtime failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// Target does not exist
    NotFound,
    /// Target already exists or is in a conflicting state
    Conflict,
    /// Anything else the runtime reported
    Other,
}

/// Corral error types
#[derive(Error, Debug)]
pub enum CorralError {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Invalid port mapping '{spec}': {reason}")]
    PortParse { spec: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Compose file parse error: {0}")]
    ComposeParse(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Circular dependency between services: {}", .services.join(" -> "))]
    Cycle { services: Vec<String> },

    #[error("Runtime failed to {op} {target}: {message}")]
    Runtime {
        op: RuntimeOp,
        target: String,
        kind: RuntimeErrorKind,
        message: String,
    },

    #[error("{op} failed for project {project}{}: {source}", .service.as_ref().map(|s| format!(" service {}", s)).unwrap_or_default())]
    Operation {
        project: String,
        service: Option<String>,
        op: &'static str,
        #[source]
        source: Box<CorralError>,
    },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CorralError {
    /// Build a runtime error
    pub fn runtime(
        op: RuntimeOp,
        target: impl Into<String>,
        kind: RuntimeErrorKind,
        message: impl Into<String>,
    ) -> Self {
        CorralError::Runtime {
            op,
            target: target.into(),
            kind,
            message: message.into(),
        }
    }

    /// Wrap an error with the project/service and engine operation it came from
    pub fn in_operation(self, op: &'static str, project: &str, service: Option<&str>) -> Self {
        CorralError::Operation {
            project: project.to_string(),
            service: service.map(str::to_string),
            op,
            source: Box::new(self),
        }
    }

    /// The innermost error, past any operation context
    pub fn root(&self) -> &CorralError {
        match self {
            CorralError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Runtime error classification, looking through operation context
    pub fn runtime_kind(&self) -> Option<RuntimeErrorKind> {
        match self {
            CorralError::Runtime { kind, .. } => Some(*kind),
            CorralError::Operation { source, .. } => source.runtime_kind(),
            _ => None,
        }
    }

    /// True when the runtime reported the target already exists
    pub fn is_conflict(&self) -> bool {
        self.runtime_kind() == Some(RuntimeErrorKind::Conflict)
    }

    /// True when the runtime reported the target is missing
    pub fn is_not_found(&self) -> bool {
        self.runtime_kind() == Some(RuntimeErrorKind::NotFound)
    }

    /// True when the error came from cancellation or an elapsed deadline
    pub fn is_cancellation(&self) -> bool {
        match self {
            CorralError::Cancelled(_) | CorralError::Timeout(_) => true,
            CorralError::Operation { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}
