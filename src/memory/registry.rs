//! Read-only view of `config.json`, the project registry and notification
//! target maintained by the rest of the CLI.

use crate::memory::warn::{self, WarnEvent};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProjectEntry {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TelegramTarget {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    pub socks_proxy: Option<String>,
    pub briefing_time: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    pub cursor_api_key: Option<String>,
    pub telegram: Option<TelegramTarget>,
}

/// When and in which calendar a daily briefing is due.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BriefingSchedule {
    pub at: NaiveTime,
    pub tz: Tz,
}

impl TelegramTarget {
    pub fn is_deliverable(&self) -> bool {
        !self.bot_token.trim().is_empty() && !self.chat_id.trim().is_empty()
    }
}

impl Registry {
    pub fn project_for_root(&self, root: &Path) -> Option<&ProjectEntry> {
        self.projects
            .iter()
            .find(|p| Path::new(p.path.trim_end_matches('/')) == root)
    }

    pub fn api_key(&self) -> Option<String> {
        match env::var("CURSOR_API_KEY") {
            Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
            _ => self
                .cursor_api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(ToOwned::to_owned),
        }
    }

    pub fn notification_target(&self) -> Option<&TelegramTarget> {
        self.telegram.as_ref().filter(|t| t.is_deliverable())
    }

    /// `None` unless a deliverable target has both a valid `HH:MM` time and
    /// an IANA timezone.
    pub fn briefing_schedule(&self) -> Option<BriefingSchedule> {
        let target = self.notification_target()?;
        let at = NaiveTime::parse_from_str(target.briefing_time.as_deref()?.trim(), "%H:%M").ok()?;
        let tz = target.timezone.as_deref()?.trim().parse::<Tz>().ok()?;
        Some(BriefingSchedule { at, tz })
    }
}

pub fn parse_registry(raw: &str) -> Result<Registry, json5::Error> {
    json5::from_str(raw)
}

pub fn load_registry(path: &Path) -> Registry {
    let Ok(raw) = fs::read_to_string(path) else {
        return Registry::default();
    };
    match parse_registry(&raw) {
        Ok(registry) => registry,
        Err(err) => {
            warn::emit(WarnEvent {
                code: "REGISTRY_UNREADABLE",
                stage: "startup",
                action: "load-registry",
                path: &path.display().to_string(),
                retry: "using-empty-registry",
                reason: "json-parse-failed",
                err: &format!("{err}"),
            });
            Registry::default()
        }
    }
}
