use anyhow::Result;
use std::env;
use std::path::PathBuf;

pub const MEMORY_DIR_NAME: &str = "memory";

#[derive(Debug, Clone)]
pub struct MemoryPaths {
    pub home: PathBuf,
    pub projects_dir: PathBuf,
    pub documents_dir: PathBuf,
    pub memory_file: PathBuf,
    pub registry_file: PathBuf,
    pub daemon_config_file: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub hook_state_file: PathBuf,
    pub briefing_output: PathBuf,
    pub home_is_explicit: bool,
}

impl MemoryPaths {
    /// Lays out every daemon file underneath `home`, with no env overrides.
    pub fn under(home: PathBuf) -> Self {
        Self {
            projects_dir: home.join("projects"),
            documents_dir: home.join("documents"),
            memory_file: home.join("MEMORY.md"),
            registry_file: home.join("config.json"),
            daemon_config_file: home.join("daemon.toml"),
            pid_file: home.join(".daemon.pid"),
            log_file: home.join(".daemon.log"),
            state_file: home.join(".daemon-state.json"),
            lock_file: home.join(".daemon.lock"),
            hook_state_file: home.join(".hook-state.json"),
            briefing_output: home.join(".briefing.txt"),
            home,
            home_is_explicit: false,
        }
    }

    /// Directories whose markdown files count as "new material".
    pub fn material_dirs(&self) -> [PathBuf; 2] {
        [self.projects_dir.clone(), self.documents_dir.clone()]
    }

    pub fn project_memory_dir(&self, project: &str) -> PathBuf {
        self.projects_dir.join(project).join(MEMORY_DIR_NAME)
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

fn memory_home_from_inputs(user_home: PathBuf, home_env: Option<&str>) -> (PathBuf, bool) {
    match home_env {
        Some(v) if !v.trim().is_empty() => (PathBuf::from(v.trim()), true),
        _ => (user_home.join("cursormemory"), false),
    }
}

pub fn resolve_paths() -> Result<MemoryPaths> {
    let user_home = required_home_dir()?;
    let home_env = env::var("CURSORMEMORY_HOME").ok();
    let (home, is_explicit) = memory_home_from_inputs(user_home, home_env.as_deref());

    let mut paths = MemoryPaths::under(home);
    paths.home_is_explicit = is_explicit;
    paths.pid_file = env_or_default_path("CURSORMEMORY_PID_FILE", paths.pid_file);
    paths.log_file = env_or_default_path("CURSORMEMORY_LOG_FILE", paths.log_file);
    paths.state_file = env_or_default_path("CURSORMEMORY_STATE_FILE", paths.state_file);
    paths.hook_state_file =
        env_or_default_path("CURSORMEMORY_HOOK_STATE_FILE", paths.hook_state_file);
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::{MemoryPaths, memory_home_from_inputs};
    use std::path::PathBuf;

    #[test]
    fn default_home_is_cursormemory_under_user_home() {
        let (home, is_explicit) = memory_home_from_inputs(PathBuf::from("/home/alice"), None);
        assert_eq!(home, PathBuf::from("/home/alice/cursormemory"));
        assert!(!is_explicit);
    }

    #[test]
    fn explicit_home_is_preserved() {
        let (home, is_explicit) =
            memory_home_from_inputs(PathBuf::from("/home/alice"), Some("/workspace/mem"));
        assert_eq!(home, PathBuf::from("/workspace/mem"));
        assert!(is_explicit);
    }

    #[test]
    fn blank_home_falls_back_to_default() {
        let (home, is_explicit) = memory_home_from_inputs(PathBuf::from("/home/alice"), Some("  "));
        assert_eq!(home, PathBuf::from("/home/alice/cursormemory"));
        assert!(!is_explicit);
    }

    #[test]
    fn project_memory_dir_nests_under_projects() {
        let paths = MemoryPaths::under(PathBuf::from("/m"));
        assert_eq!(
            paths.project_memory_dir("alpha"),
            PathBuf::from("/m/projects/alpha/memory")
        );
    }
}
