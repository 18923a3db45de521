//! Dependency ordering of services
//!
//! Depth-first traversal with three-colour marking. Roots and dependency
//! lists are visited in lexicographic order so the result is reproducible.
//! A cycle does not stop the traversal: it is recorded, the services on it
//! and everything depending on them are left out of the order, and the
//! remaining roots are still processed.

use super::config::ProjectConfig;
use crate::error::{CorralError, Result};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
    /// On a cycle or downstream of one
    Blocked,
}

/// Outcome of ordering a project's services
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Services in dependency order
    pub order: Vec<String>,
    /// Each detected cycle as a path that starts and ends on the same service
    pub cycles: Vec<Vec<String>>,
    /// Unplaceable services in post-order
    blocked: Vec<String>,
}

impl Resolution {
    /// Whether any cycle was found
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Services missing from `order` because of a cycle.
    ///
    /// Each service comes after the blocked services it depends on, except
    /// along the edge that closes a cycle.
    pub fn blocked(&self) -> &[String] {
        &self.blocked
    }

    /// The order, or a cycle error naming the first cycle
    pub fn strict(&self) -> Result<Vec<String>> {
        match self.cycles.first() {
            Some(cycle) => Err(CorralError::Cycle {
                services: cycle.clone(),
            }),
            None => Ok(self.order.clone()),
        }
    }
}

struct Walker<'a> {
    graph: &'a BTreeMap<String, Vec<String>>,
    marks: HashMap<&'a str, Mark>,
    stack: Vec<&'a str>,
    resolution: Resolution,
}

impl<'a> Walker<'a> {
    fn mark(&self, service: &str) -> Mark {
        self.marks.get(service).copied().unwrap_or(Mark::Unvisited)
    }

    /// Returns false when `service` cannot be placed
    fn visit(&mut self, service: &'a str) -> bool {
        match self.mark(service) {
            Mark::Done => return true,
            Mark::Blocked => return false,
            Mark::InProgress => {
                let start = self
                    .stack
                    .iter()
                    .position(|s| *s == service)
                    .unwrap_or_default();
                let mut cycle: Vec<String> =
                    self.stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(service.to_string());
                tracing::warn!("Dependency cycle detected: {}", cycle.join(" -> "));
                self.resolution.cycles.push(cycle);
                return false;
            }
            Mark::Unvisited => {}
        }

        self.marks.insert(service, Mark::InProgress);
        self.stack.push(service);

        let graph = self.graph;
        let mut placeable = true;
        if let Some(deps) = graph.get(service) {
            for dep in deps {
                // Unknown dependencies are a validation error, not an ordering concern
                if !graph.contains_key(dep.as_str()) {
                    continue;
                }
                if !self.visit(dep) {
                    placeable = false;
                }
            }
        }

        self.stack.pop();
        if placeable {
            self.marks.insert(service, Mark::Done);
            self.resolution.order.push(service.to_string());
        } else {
            self.marks.insert(service, Mark::Blocked);
            self.resolution.blocked.push(service.to_string());
        }
        placeable
    }
}

fn dependency_graph(config: &ProjectConfig) -> BTreeMap<String, Vec<String>> {
    config
        .services
        .iter()
        .map(|(name, spec)| (name.clone(), spec.dependencies()))
        .collect()
}

/// Order services so every service follows its dependencies
pub fn resolve(config: &ProjectConfig) -> Resolution {
    let graph = dependency_graph(config);
    let mut walker = Walker {
        graph: &graph,
        marks: HashMap::new(),
        stack: Vec::new(),
        resolution: Resolution::default(),
    };

    for service in graph.keys() {
        walker.visit(service);
    }

    walker.resolution
}

/// Group services into waves by dependency depth.
///
/// Wave `k` only depends on services in earlier waves; names within a wave
/// are sorted. Fails on the first cycle.
pub fn waves(config: &ProjectConfig) -> Result<Vec<Vec<String>>> {
    let order = resolve(config).strict()?;
    let graph = dependency_graph(config);

    let mut depth: HashMap<&str, usize> = HashMap::new();
    for service in &order {
        let level = graph
            .get(service)
            .into_iter()
            .flatten()
            .filter_map(|dep| depth.get(dep.as_str()))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        depth.insert(service, level);
    }

    let mut waves: Vec<Vec<String>> = Vec::new();
    for service in &order {
        let level = depth[service.as_str()];
        if waves.len() <= level {
            waves.resize_with(level + 1, Vec::new);
        }
        waves[level].push(service.clone());
    }
    for wave in &mut waves {
        wave.sort();
    }

    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::config::ServiceSpec;

    fn project(edges: &[(&str, &[&str])]) -> ProjectConfig {
        edges.iter().fold(ProjectConfig::default(), |config, (name, deps)| {
            config.with_service(name, ServiceSpec::new("img").depends_on(deps))
        })
    }

    fn position(order: &[String], service: &str) -> usize {
        order.iter().position(|s| s == service).unwrap()
    }

    #[test]
    fn test_readme_example_order() {
        let config = project(&[("web", &[]), ("db", &["migrate"]), ("migrate", &[])]);
        let resolution = resolve(&config);
        assert!(!resolution.has_cycles());
        assert_eq!(resolution.order, vec!["migrate", "db", "web"]);
    }

    #[test]
    fn test_acyclic_orders_every_service_once() {
        let config = project(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a", "b"]),
            ("d", &["c"]),
            ("e", &["b", "d"]),
            ("f", &[]),
        ]);
        let resolution = resolve(&config);
        assert_eq!(resolution.order.len(), 6);

        for (name, spec) in &config.services {
            for dep in spec.dependencies() {
                assert!(position(&resolution.order, &dep) < position(&resolution.order, name));
            }
        }
    }

    #[test]
    fn test_self_dependency() {
        let config = project(&[("a", &["a"]), ("b", &[])]);
        let resolution = resolve(&config);

        assert_eq!(resolution.cycles, vec![vec!["a".to_string(), "a".to_string()]]);
        assert_eq!(resolution.order, vec!["b".to_string()]);
        assert_eq!(resolution.blocked(), &["a".to_string()]);
    }

    #[test]
    fn test_mutual_pair_and_dependents() {
        let config = project(&[("a", &["b"]), ("b", &["a"]), ("c", &["a"]), ("d", &[])]);
        let resolution = resolve(&config);

        assert_eq!(resolution.cycles.len(), 1);
        assert_eq!(resolution.cycles[0], vec!["a", "b", "a"]);
        assert_eq!(resolution.order, vec!["d".to_string()]);
        assert_eq!(resolution.blocked(), &["b", "a", "c"]);

        let err = resolution.strict().unwrap_err();
        assert!(matches!(err, CorralError::Cycle { .. }));
    }

    #[test]
    fn test_blocked_keeps_dependencies_first() {
        // web only depends on the cycle, so its edge to db still orders it
        let config = project(&[("api", &["db"]), ("db", &["api"]), ("web", &["db"])]);
        let resolution = resolve(&config);
        let blocked = resolution.blocked();

        assert!(resolution.order.is_empty());
        assert_eq!(blocked.len(), 3);
        assert!(position(blocked, "db") < position(blocked, "web"));
    }

    #[test]
    fn test_unknown_dependency_is_ignored() {
        let config = project(&[("a", &["ghost"])]);
        assert_eq!(resolve(&config).order, vec!["a".to_string()]);
    }

    #[test]
    fn test_waves() {
        let config = project(&[
            ("web", &["api"]),
            ("api", &["db", "cache"]),
            ("db", &[]),
            ("cache", &[]),
            ("worker", &["db"]),
        ]);
        let waves = waves(&config).unwrap();
        assert_eq!(
            waves,
            vec![
                vec!["cache".to_string(), "db".to_string()],
                vec!["api".to_string(), "worker".to_string()],
                vec!["web".to_string()],
            ]
        );
    }

    #[test]
    fn test_waves_reject_cycles() {
        let config = project(&[("a", &["b"]), ("b", &["a"])]);
        assert!(waves(&config).is_err());
    }
}
