//! Compose file discovery, parsing and validation

use super::config::ProjectConfig;
use super::ports::parse_port_spec;
use crate::error::{CorralError, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Compose file names, in lookup order
pub const DEFAULT_COMPOSE_FILES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yaml",
    "compose.yml",
];

/// Loads project configurations from `<root>/<project>/<compose file>`
#[derive(Debug, Clone)]
pub struct ProjectLoader {
    root: PathBuf,
    env: HashMap<String, String>,
}

impl ProjectLoader {
    /// Loader over `root`, interpolating from the process environment
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            env: std::env::vars().collect(),
        }
    }

    /// Replace the interpolation environment
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Directory holding the projects
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find compose file in directory
    pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
        DEFAULT_COMPOSE_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    fn project_dir(&self, project: &str) -> Result<PathBuf> {
        let invalid = project.is_empty()
            || project.contains('/')
            || project.contains('\\')
            || project.contains("..");
        if invalid {
            return Err(CorralError::InvalidConfig(format!(
                "invalid project name '{}'",
                project
            )));
        }
        Ok(self.root.join(project))
    }

    /// Compose file of a project
    pub fn compose_file(&self, project: &str) -> Result<PathBuf> {
        let dir = self.project_dir(project)?;
        Self::find_compose_file(&dir).ok_or_else(|| CorralError::ProjectNotFound(project.to_string()))
    }

    /// Load and parse a project's compose file
    pub fn load(&self, project: &str) -> Result<ProjectConfig> {
        let path = self.compose_file(project)?;
        tracing::debug!("Loading project {} from {}", project, path.display());

        let content = std::fs::read_to_string(&path)
            .map_err(|e| CorralError::ComposeParse(format!("Failed to read {}: {}", path.display(), e)))?;
        parse_str(&content, &self.env)
    }

    /// Names of every directory under the root holding a compose file, sorted
    pub fn list_projects(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut projects = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_dir() {
                continue;
            }
            if Self::find_compose_file(entry.path()).is_some() {
                projects.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        Ok(projects)
    }
}

/// Parse compose YAML after interpolating `${VAR}` references
pub fn parse_str(content: &str, env: &HashMap<String, String>) -> Result<ProjectConfig> {
    ProjectConfig::from_yaml(&interpolate(content, env))
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\$\$|\$\{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)(?:(?P<op>:?-)(?P<default>[^}]*))?\}|\$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)",
        )
        .expect("variable pattern is valid")
    })
}

/// Substitute `$VAR`, `${VAR}`, `${VAR-default}` and `${VAR:-default}`;
/// `$$` is a literal dollar. Unset variables become empty.
pub fn interpolate(content: &str, env: &HashMap<String, String>) -> String {
    variable_pattern()
        .replace_all(content, |caps: &Captures| {
            if let Some(name) = caps.name("bare") {
                return env.get(name.as_str()).cloned().unwrap_or_default();
            }
            let Some(name) = caps.name("braced") else {
                return "$".to_string();
            };
            let value = env.get(name.as_str());
            let default = caps.name("default").map(|d| d.as_str()).unwrap_or_default();
            match (value, caps.name("op").map(|op| op.as_str())) {
                (Some(v), Some(":-")) if v.is_empty() => default.to_string(),
                (Some(v), _) => v.clone(),
                (None, Some(_)) => default.to_string(),
                (None, None) => String::new(),
            }
        })
        .into_owned()
}

/// Check a configuration before it reaches the runtime.
///
/// Missing images, unknown dependencies and malformed ports are errors.
/// Returns warnings for problems the runtime will tolerate.
pub fn validate(config: &ProjectConfig) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    config.check_dependencies()?;

    for (name, service) in &config.services {
        if service.image.trim().is_empty() {
            return Err(CorralError::InvalidConfig(format!(
                "Service '{}' must have an 'image' specified",
                name
            )));
        }

        service.command_args()?;

        for port in service.port_specs() {
            parse_port_spec(&port)?;
        }

        for volume in service.volumes.iter().filter_map(|v| v.volume_name()) {
            if !config.volumes.contains_key(volume) {
                warnings.push(format!(
                    "Service '{}' references undefined volume '{}'",
                    name, volume
                ));
            }
        }
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_project(root: &Path, name: &str, file: &str, content: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn test_load_project() {
        let root = tempdir().unwrap();
        write_project(
            root.path(),
            "shop",
            "docker-compose.yml",
            "services:\n  web:\n    image: nginx:${TAG:-latest}\n",
        );

        let loader = ProjectLoader::new(root.path()).with_env(HashMap::new());
        let config = loader.load("shop").unwrap();
        assert_eq!(config.service("web").unwrap().image, "nginx:latest");
    }

    #[test]
    fn test_compose_file_precedence() {
        let root = tempdir().unwrap();
        write_project(root.path(), "shop", "compose.yml", "services: {}\n");
        write_project(root.path(), "shop", "docker-compose.yaml", "services: {}\n");

        let loader = ProjectLoader::new(root.path());
        let file = loader.compose_file("shop").unwrap();
        assert!(file.ends_with("docker-compose.yaml"));
    }

    #[test]
    fn test_missing_project() {
        let root = tempdir().unwrap();
        let loader = ProjectLoader::new(root.path());
        assert!(matches!(
            loader.load("ghost"),
            Err(CorralError::ProjectNotFound(_))
        ));
        assert!(matches!(
            loader.load("../etc"),
            Err(CorralError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bad_yaml() {
        let root = tempdir().unwrap();
        write_project(root.path(), "shop", "compose.yaml", "services: [oops\n");
        let loader = ProjectLoader::new(root.path());
        assert!(matches!(loader.load("shop"), Err(CorralError::ComposeParse(_))));
    }

    #[test]
    fn test_list_projects() {
        let root = tempdir().unwrap();
        write_project(root.path(), "shop", "compose.yaml", "services: {}\n");
        write_project(root.path(), "blog", "docker-compose.yml", "services: {}\n");
        write_project(root.path(), "notes", "README.md", "nothing here");
        std::fs::write(root.path().join("stray.yml"), "services: {}\n").unwrap();

        let loader = ProjectLoader::new(root.path());
        assert_eq!(loader.list_projects().unwrap(), vec!["blog", "shop"]);

        let missing = ProjectLoader::new(root.path().join("nope"));
        assert!(missing.list_projects().unwrap().is_empty());
    }

    #[test]
    fn test_interpolate() {
        let env = HashMap::from([
            ("TAG".to_string(), "1.0.0".to_string()),
            ("EMPTY".to_string(), String::new()),
        ]);

        assert_eq!(interpolate("nginx:${TAG}", &env), "nginx:1.0.0");
        assert_eq!(interpolate("nginx:$TAG", &env), "nginx:1.0.0");
        assert_eq!(interpolate("${MISSING:-fallback}", &env), "fallback");
        assert_eq!(interpolate("${EMPTY:-fallback}", &env), "fallback");
        assert_eq!(interpolate("${EMPTY-fallback}", &env), "");
        assert_eq!(interpolate("${MISSING}", &env), "");
        assert_eq!(interpolate("cost $$5", &env), "cost $5");
    }

    #[test]
    fn test_validate() {
        let ok = parse_str(
            "services:\n  web:\n    image: nginx\n    volumes: [\"data:/srv\"]\n    depends_on: [db]\n  db:\n    image: postgres\n",
            &HashMap::new(),
        )
        .unwrap();
        let warnings = validate(&ok).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("data"));

        let unknown = parse_str(
            "services:\n  web:\n    image: nginx\n    depends_on: [ghost]\n",
            &HashMap::new(),
        )
        .unwrap();
        assert!(matches!(
            validate(&unknown),
            Err(CorralError::UnknownDependency { .. })
        ));

        let no_image = parse_str("services:\n  web:\n    ports: [\"80\"]\n", &HashMap::new()).unwrap();
        assert!(matches!(validate(&no_image), Err(CorralError::InvalidConfig(_))));

        let bad_port = parse_str(
            "services:\n  web:\n    image: nginx\n    ports: [\"80:http\"]\n",
            &HashMap::new(),
        )
        .unwrap();
        assert!(matches!(validate(&bad_port), Err(CorralError::PortParse { .. })));
    }
}
