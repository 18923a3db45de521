//! Per-project reader/writer locks, acquired by project name

use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

/// Lock handle shared by every `Project` with the same name
pub type ProjectLock = Arc<RwLock<()>>;

/// Registry of project locks keyed by name
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<String, ProjectLock>,
}

impl LockRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> &'static LockRegistry {
        static GLOBAL: OnceLock<LockRegistry> = OnceLock::new();
        GLOBAL.get_or_init(LockRegistry::new)
    }

    /// Lock handle for a project, created on first use.
    ///
    /// Handles no project holds anymore are dropped first, so the registry
    /// stays bounded by the number of live projects.
    pub fn lock_for(&self, project: &str) -> ProjectLock {
        self.prune();
        self.locks.entry(project.to_string()).or_default().clone()
    }

    /// Drop handles no project holds anymore
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of known projects
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock was handed out
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
