//! Builds invocations of the coding-agent CLI for the two scheduled jobs.

use crate::error::CmError;
use crate::memory::runner::CommandSpec;
use crate::memory::settings::Settings;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DISTILL_PROMPT: &str = "You maintain a developer's long-term memory.

1. Read the recent daily notes under projects/*/memory/, the project summaries in projects/*/MEMORY.md and the reference notes under documents/.
2. Pick out decisions, lessons and facts worth keeping beyond this week.
3. Fold them into MEMORY.md, keeping it concise and organised by topic.
4. Drop entries from MEMORY.md that are stale or superseded.

Daily files are raw notes. MEMORY.md is the curated version.

Memory directory: ";

const BRIEFING_PROMPT: &str = "Write a short morning briefing for the developer who owns this memory.

1. Read MEMORY.md and the most recent daily notes.
2. Lead with anything overdue or blocked, then the top priorities for today, then work in progress worth watching.
3. Reference concrete tasks, names and dates. Skip sections with nothing to say.
4. Use plain text only (no HTML or markdown), friendly and direct, under 3500 characters.

Save the briefing to this file: ";

fn ensure_executable_path(path: &Path) -> Result<()> {
    let meta = fs::metadata(path)
        .with_context(|| format!("agent binary path does not exist: {}", path.display()))?;
    if !meta.is_file() {
        anyhow::bail!("agent binary path is not a file: {}", path.display());
    }
    Ok(())
}

/// A configured value containing a path separator must point at a file;
/// a bare name is looked up on `PATH`.
pub fn resolve_agent_bin(configured: &str) -> Result<PathBuf> {
    let trimmed = configured.trim();
    if trimmed.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(trimmed);
        return ensure_executable_path(&path)
            .map(|_| path)
            .map_err(|err| CmError::AgentUnavailable(format!("{err:#}")).into());
    }

    which::which(trimmed).map_err(|_| {
        CmError::AgentUnavailable(format!(
            "`{trimmed}` not found on PATH; install the Cursor agent CLI or set CURSORMEMORY_AGENT_BIN"
        ))
        .into()
    })
}

#[derive(Debug, Clone)]
pub struct AgentTarget {
    pub bin: PathBuf,
    pub model: String,
    pub api_key: Option<String>,
    pub home: PathBuf,
}

impl AgentTarget {
    pub fn resolve(settings: &Settings) -> Result<Self> {
        Ok(Self {
            bin: resolve_agent_bin(&settings.config.agent.bin)?,
            model: settings.config.agent.model.clone(),
            api_key: settings.registry.api_key(),
            home: settings.paths.home.clone(),
        })
    }

    pub fn invocation(&self, label: &str, prompt: String, timeout: Option<Duration>) -> CommandSpec {
        let mut envs = Vec::new();
        if let Some(key) = &self.api_key {
            envs.push(("CURSOR_API_KEY".to_string(), key.clone()));
        }
        CommandSpec {
            label: label.to_string(),
            program: self.bin.clone(),
            args: vec![
                "-p".to_string(),
                prompt,
                "--model".to_string(),
                self.model.clone(),
            ],
            working_dir: self.home.clone(),
            envs,
            timeout,
        }
    }

    pub fn distill_invocation(&self, timeout: Option<Duration>) -> CommandSpec {
        let prompt = format!("{DISTILL_PROMPT}{}", self.home.display());
        self.invocation("distill agent", prompt, timeout)
    }

    pub fn briefing_invocation(&self, output: &Path, timeout: Option<Duration>) -> CommandSpec {
        let prompt = format!("{BRIEFING_PROMPT}{}", output.display());
        self.invocation("briefing agent", prompt, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::{AgentTarget, resolve_agent_bin};
    use crate::error::CmError;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    fn target(api_key: Option<&str>) -> AgentTarget {
        AgentTarget {
            bin: PathBuf::from("/usr/local/bin/agent"),
            model: "claude-4-opus".to_string(),
            api_key: api_key.map(ToOwned::to_owned),
            home: PathBuf::from("/home/alice/cursormemory"),
        }
    }

    #[test]
    fn distill_invocation_runs_in_memory_home() {
        let spec = target(Some("k-123")).distill_invocation(Some(Duration::from_secs(600)));
        assert_eq!(spec.args[0], "-p");
        assert!(spec.args[1].ends_with("/home/alice/cursormemory"));
        assert_eq!(&spec.args[2..], ["--model", "claude-4-opus"]);
        assert_eq!(spec.working_dir, PathBuf::from("/home/alice/cursormemory"));
        assert_eq!(
            spec.envs,
            vec![("CURSOR_API_KEY".to_string(), "k-123".to_string())]
        );
        assert_eq!(spec.timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn briefing_prompt_names_output_file() {
        let spec = target(None).briefing_invocation(
            &PathBuf::from("/home/alice/cursormemory/.briefing.txt"),
            None,
        );
        assert!(spec.args[1].ends_with(".briefing.txt"));
        assert!(spec.envs.is_empty());
    }

    #[test]
    fn missing_explicit_path_is_agent_unavailable() {
        let tmp = tempdir().expect("tempdir");
        let missing = tmp.path().join("agent");
        let err = resolve_agent_bin(&missing.display().to_string()).expect_err("missing");
        assert!(matches!(
            err.downcast_ref::<CmError>(),
            Some(CmError::AgentUnavailable(_))
        ));
    }

    #[test]
    fn unknown_name_is_agent_unavailable() {
        let err = resolve_agent_bin("cursormemory-no-such-agent-bin").expect_err("missing");
        assert!(format!("{err}").contains("not found on PATH"));
    }

    #[test]
    fn explicit_file_path_is_accepted() {
        let tmp = tempdir().expect("tempdir");
        let bin = tmp.path().join("agent");
        std::fs::write(&bin, "#!/bin/sh\n").expect("write");
        assert_eq!(resolve_agent_bin(&bin.display().to_string()).expect("ok"), bin);
    }
}
