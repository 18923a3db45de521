//! Engine settings
//!
//! Read from `<config dir>/corral/config.yaml` or an explicit path, then
//! overridden by environment variables and finally by CLI flags.

use crate::compose::{OpContext, ProjectOptions};
use crate::error::{CorralError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides the compose root directory
pub const ENV_COMPOSE_ROOT: &str = "CORRAL_COMPOSE_ROOT";
/// Overrides the runtime endpoint
pub const ENV_DOCKER_HOST: &str = "DOCKER_HOST";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Runtime endpoint; local socket defaults when unset
    pub docker_host: Option<String>,
    /// Directory holding `<project>/docker-compose.yml`
    pub compose_root: PathBuf,
    pub stop_grace_secs: u64,
    /// Timeout for each runtime call
    pub container_timeout_secs: u64,
    /// Overall deadline of one operation
    pub operation_timeout_secs: u64,
    pub parallel_waves: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_host: None,
            compose_root: PathBuf::from("./compose"),
            stop_grace_secs: 30,
            container_timeout_secs: 30,
            operation_timeout_secs: 300,
            parallel_waves: false,
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("corral").join("config.yaml"))
    }

    /// Load from `path`, or from the default location.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    /// Environment overrides are applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        Ok(settings.with_env(|key| std::env::var(key).ok()))
    }

    /// Parse a settings file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CorralError::Settings(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
            .map_err(|e| CorralError::Settings(format!("{}: {}", path.display(), e)))
    }

    /// Parse settings YAML; absent keys take their defaults
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply environment overrides read through `lookup`
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_COMPOSE_ROOT).filter(|v| !v.is_empty()) {
            self.compose_root = PathBuf::from(root);
        }
        if let Some(host) = lookup(ENV_DOCKER_HOST).filter(|v| !v.is_empty()) {
            self.docker_host = Some(host);
        }
        self
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.container_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Options for projects built from these settings
    pub fn project_options(&self) -> ProjectOptions {
        ProjectOptions {
            stop_grace: self.stop_grace(),
            parallel_waves: self.parallel_waves,
        }
    }

    /// Operation context carrying the configured timeouts.
    ///
    /// Zero disables a timeout.
    pub fn op_context(&self) -> OpContext {
        let mut ctx = OpContext::new();
        if self.operation_timeout_secs > 0 {
            ctx = ctx.with_timeout(self.operation_timeout());
        }
        if self.container_timeout_secs > 0 {
            ctx = ctx.with_call_timeout(self.container_timeout());
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.compose_root, PathBuf::from("./compose"));
        assert_eq!(settings.stop_grace(), Duration::from_secs(30));
        assert_eq!(settings.operation_timeout(), Duration::from_secs(300));
        assert!(!settings.parallel_waves);
        assert!(settings.docker_host.is_none());
    }

    #[test]
    fn test_partial_yaml() {
        let settings = Settings::from_yaml("stop_grace_secs: 5\nparallel_waves: true\n").unwrap();
        assert_eq!(settings.stop_grace_secs, 5);
        assert!(settings.parallel_waves);
        assert_eq!(settings.container_timeout_secs, 30);

        assert_eq!(Settings::from_yaml("").unwrap(), Settings::default());
        assert!(Settings::from_yaml("stop_grace_secs: soon\n").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "compose_root: /srv/compose\ndocker_host: tcp://10.0.0.5:2375\n").unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.compose_root, PathBuf::from("/srv/compose"));
        assert_eq!(settings.docker_host.as_deref(), Some("tcp://10.0.0.5:2375"));

        let missing = Settings::from_file(&dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(CorralError::Settings(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            (ENV_COMPOSE_ROOT, "/data/projects".to_string()),
            (ENV_DOCKER_HOST, "unix:///run/user/1000/docker.sock".to_string()),
        ]);
        let settings = Settings::default().with_env(|key| env.get(key).cloned());
        assert_eq!(settings.compose_root, PathBuf::from("/data/projects"));
        assert_eq!(
            settings.docker_host.as_deref(),
            Some("unix:///run/user/1000/docker.sock")
        );

        let untouched = Settings::default().with_env(|_| Some(String::new()));
        assert_eq!(untouched, Settings::default());
    }

    #[test]
    fn test_project_options() {
        let settings = Settings {
            stop_grace_secs: 3,
            parallel_waves: true,
            ..Settings::default()
        };
        let options = settings.project_options();
        assert_eq!(options.stop_grace, Duration::from_secs(3));
        assert!(options.parallel_waves);
    }

    #[test]
    fn test_op_context_deadline() {
        let with_deadline = Settings::default().op_context();
        assert!(with_deadline.deadline().is_some());

        let unbounded = Settings {
            operation_timeout_secs: 0,
            ..Settings::default()
        };
        assert!(unbounded.op_context().deadline().is_none());
    }
}
