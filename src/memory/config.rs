use crate::error::CmError;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonLoopConfig {
    pub tick_secs: u64,
    pub default_interval_hours: f64,
}

impl Default for DaemonLoopConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            default_interval_hours: 6.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistillConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10 * 60,
            max_retries: 2,
            retry_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BriefingConfig {
    pub timeout_secs: u64,
}

impl Default for BriefingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub bin: String,
    pub model: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bin: "agent".to_string(),
            model: "claude-4-opus".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemon: DaemonLoopConfig,
    pub distill: DistillConfig,
    pub briefing: BriefingConfig,
    pub agent: AgentConfig,
}

impl DaemonConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.daemon.tick_secs)
    }

    pub fn distill_timeout(&self) -> Duration {
        Duration::from_secs(self.distill.timeout_secs)
    }

    pub fn distill_retry_delay(&self) -> Duration {
        Duration::from_secs(self.distill.retry_delay_secs)
    }

    pub fn briefing_timeout(&self) -> Duration {
        Duration::from_secs(self.briefing.timeout_secs)
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn invalid(msg: &str) -> anyhow::Error {
    CmError::InvalidConfig(msg.to_string()).into()
}

pub fn validate(cfg: &DaemonConfig) -> Result<()> {
    if cfg.daemon.tick_secs == 0 {
        return Err(invalid("daemon.tick_secs must be >= 1"));
    }
    let hours = cfg.daemon.default_interval_hours;
    if !(hours.is_finite() && hours > 0.0) {
        return Err(invalid("daemon.default_interval_hours must be > 0"));
    }
    if cfg.distill.timeout_secs == 0 {
        return Err(invalid("distill.timeout_secs must be >= 1"));
    }
    if cfg.briefing.timeout_secs == 0 {
        return Err(invalid("briefing.timeout_secs must be >= 1"));
    }
    if cfg.agent.bin.trim().is_empty() {
        return Err(invalid("agent.bin cannot be empty"));
    }
    if cfg.agent.model.trim().is_empty() {
        return Err(invalid("agent.model cannot be empty"));
    }
    Ok(())
}

fn merge_file_config(path: &Path) -> Result<DaemonConfig> {
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let raw = fs::read_to_string(path)?;
    toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse daemon config {}: {err}", path.display()))
}

/// Defaults, then `daemon.toml`, then environment overrides.
pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    let mut cfg = merge_file_config(path)?;

    cfg.daemon.tick_secs = env_or_u64("CURSORMEMORY_TICK_SECS", cfg.daemon.tick_secs);
    cfg.daemon.default_interval_hours = env_or_f64(
        "CURSORMEMORY_DEFAULT_INTERVAL_HOURS",
        cfg.daemon.default_interval_hours,
    );
    cfg.distill.timeout_secs =
        env_or_u64("CURSORMEMORY_DISTILL_TIMEOUT_SECS", cfg.distill.timeout_secs);
    cfg.distill.max_retries =
        env_or_u32("CURSORMEMORY_DISTILL_MAX_RETRIES", cfg.distill.max_retries);
    cfg.distill.retry_delay_secs = env_or_u64(
        "CURSORMEMORY_DISTILL_RETRY_DELAY_SECS",
        cfg.distill.retry_delay_secs,
    );
    cfg.briefing.timeout_secs =
        env_or_u64("CURSORMEMORY_BRIEFING_TIMEOUT_SECS", cfg.briefing.timeout_secs);
    cfg.agent.bin = env_or_string("CURSORMEMORY_AGENT_BIN", &cfg.agent.bin);
    cfg.agent.model = env_or_string("CURSORMEMORY_AGENT_MODEL", &cfg.agent.model);

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::{DaemonConfig, validate};

    #[test]
    fn defaults_match_documented_policy() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.daemon.tick_secs, 60);
        assert_eq!(cfg.distill.timeout_secs, 600);
        assert_eq!(cfg.distill.max_retries, 2);
        assert_eq!(cfg.distill.retry_delay_secs, 30);
        assert_eq!(cfg.briefing.timeout_secs, 300);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: DaemonConfig = toml::from_str(
            r#"
[distill]
max_retries = 5

[agent]
model = "gpt-5"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.distill.max_retries, 5);
        assert_eq!(cfg.distill.retry_delay_secs, 30);
        assert_eq!(cfg.agent.model, "gpt-5");
        assert_eq!(cfg.agent.bin, "agent");
    }

    #[test]
    fn rejects_non_positive_interval() {
        let mut cfg = DaemonConfig::default();
        cfg.daemon.default_interval_hours = 0.0;
        let err = validate(&cfg).expect_err("should reject");
        assert!(format!("{err}").contains("default_interval_hours"));
    }

    #[test]
    fn rejects_zero_tick() {
        let mut cfg = DaemonConfig::default();
        cfg.daemon.tick_secs = 0;
        assert!(validate(&cfg).is_err());
    }
}
