use crate::memory::config::{DaemonConfig, load_config};
use crate::memory::paths::{MemoryPaths, resolve_paths};
use crate::memory::registry::{Registry, load_registry};
use crate::memory::state::StateStore;
use anyhow::Result;

/// Everything a command needs, resolved once per invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub paths: MemoryPaths,
    pub config: DaemonConfig,
    pub registry: Registry,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let paths = resolve_paths()?;
        let config = load_config(&paths.daemon_config_file)?;
        let registry = load_registry(&paths.registry_file);
        Ok(Self {
            paths,
            config,
            registry,
        })
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::new(
            self.paths.state_file.clone(),
            self.config.daemon.default_interval_hours,
        )
    }
}
