use crate::memory::util::now_epoch_secs;
use crate::memory::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonState {
    pub interval_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_distill_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_distill_succeeded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_briefing_date: Option<String>,
}

impl DaemonState {
    pub fn with_interval(interval_hours: f64) -> Self {
        Self {
            interval_hours,
            last_distill_at: None,
            last_distill_succeeded: None,
            last_briefing_date: None,
        }
    }

    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.interval_hours * 3_600_000.0) as i64)
    }
}

/// On-disk home of [`DaemonState`]. Every mutation is load-modify-save so a
/// CLI write (for example a new interval) is never clobbered by the daemon.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    default_interval_hours: f64,
}

// Accepts the older `lastDistill`/`success` keys.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawState {
    interval_hours: Option<f64>,
    #[serde(default, alias = "lastDistill")]
    last_distill_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "success")]
    last_distill_succeeded: Option<bool>,
    #[serde(default)]
    last_briefing_date: Option<String>,
}

impl StateStore {
    pub fn new(path: PathBuf, default_interval_hours: f64) -> Self {
        Self {
            path,
            default_interval_hours,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<DaemonState> {
        if !self.path.exists() {
            return Ok(DaemonState::with_interval(self.default_interval_hours));
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;

        let parsed: RawState = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                let timestamp = now_epoch_secs().unwrap_or(0);
                let backup_path = self
                    .path
                    .with_extension(format!("json.corrupt.{timestamp}"));
                let _ = fs::write(&backup_path, &raw);

                warn::emit(WarnEvent {
                    code: "STATE_CORRUPT",
                    stage: "state",
                    action: "load-state",
                    path: &self.path.display().to_string(),
                    retry: "started-fresh",
                    reason: "json-parse-failed",
                    err: &format!("{err:#}"),
                });
                return Ok(DaemonState::with_interval(self.default_interval_hours));
            }
        };

        let interval_hours = match parsed.interval_hours {
            Some(h) if h.is_finite() && h > 0.0 => h,
            Some(bad) => {
                warn::emit(WarnEvent {
                    code: "STATE_INTERVAL_INVALID",
                    stage: "state",
                    action: "load-state",
                    path: &self.path.display().to_string(),
                    retry: "using-default-interval",
                    reason: "interval-not-positive",
                    err: &bad.to_string(),
                });
                self.default_interval_hours
            }
            None => self.default_interval_hours,
        };

        Ok(DaemonState {
            interval_hours,
            last_distill_at: parsed.last_distill_at,
            last_distill_succeeded: parsed.last_distill_succeeded,
            last_briefing_date: parsed.last_briefing_date,
        })
    }

    pub fn save(&self, state: &DaemonState) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;

        let mut temp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut temp, state)?;
        temp.write_all(b"\n")?;
        temp.flush()?;
        temp.persist(&self.path).map_err(|e| {
            anyhow::anyhow!(
                "failed to persist state {}: {}",
                self.path.display(),
                e.error
            )
        })?;
        Ok(())
    }

    pub fn update<F>(&self, mutate: F) -> Result<DaemonState>
    where
        F: FnOnce(&mut DaemonState),
    {
        let mut state = self.load()?;
        mutate(&mut state);
        self.save(&state)?;
        Ok(state)
    }

    pub fn record_distill(&self, at: DateTime<Utc>, succeeded: bool) -> Result<DaemonState> {
        self.update(|s| {
            s.last_distill_at = Some(at);
            s.last_distill_succeeded = Some(succeeded);
        })
    }

    pub fn record_briefing(&self, date: &str) -> Result<DaemonState> {
        self.update(|s| s.last_briefing_date = Some(date.to_string()))
    }

    pub fn set_interval(&self, hours: f64) -> Result<DaemonState> {
        self.update(|s| s.interval_hours = hours)
    }
}

#[cfg(test)]
mod tests {
    use super::{DaemonState, StateStore};
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempdir().expect("tempdir");
        let store = StateStore::new(tmp.path().join("state.json"), 6.0);
        let state = store.load().expect("load");
        assert_eq!(state, DaemonState::with_interval(6.0));
    }

    #[test]
    fn reads_legacy_field_names() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("state.json");
        fs::write(
            &path,
            r#"{"lastDistill":"2026-01-02T03:04:05.678Z","success":false,"intervalHours":2}"#,
        )
        .expect("write");
        let state = StateStore::new(path, 6.0).load().expect("load");
        assert_eq!(state.interval_hours, 2.0);
        assert_eq!(state.last_distill_succeeded, Some(false));
        assert_eq!(
            state.last_distill_at.map(|t| t.timestamp()),
            Some(
                Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
                    .single()
                    .expect("ts")
                    .timestamp()
            )
        );
    }

    #[test]
    fn corrupt_file_is_backed_up_and_reset() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("state.json");
        fs::write(&path, "{not json").expect("write");
        let state = StateStore::new(path, 3.0).load().expect("load");
        assert_eq!(state, DaemonState::with_interval(3.0));
        let backups = fs::read_dir(tmp.path())
            .expect("read_dir")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains("corrupt"))
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn non_positive_interval_falls_back_to_default() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("state.json");
        fs::write(&path, r#"{"intervalHours":-1}"#).expect("write");
        let state = StateStore::new(path, 6.0).load().expect("load");
        assert_eq!(state.interval_hours, 6.0);
    }

    #[test]
    fn updates_merge_with_existing_fields() {
        let tmp = tempdir().expect("tempdir");
        let store = StateStore::new(tmp.path().join("nested").join("state.json"), 6.0);
        store.set_interval(0.5).expect("interval");
        let at = Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).single().expect("ts");
        store.record_distill(at, true).expect("distill");
        store.record_briefing("2026-05-06").expect("briefing");

        let state = store.load().expect("load");
        assert_eq!(state.interval_hours, 0.5);
        assert_eq!(state.last_distill_at, Some(at));
        assert_eq!(state.last_distill_succeeded, Some(true));
        assert_eq!(state.last_briefing_date.as_deref(), Some("2026-05-06"));

        let raw = fs::read_to_string(store.path()).expect("raw");
        assert!(raw.contains("\"lastDistillSucceeded\": true"));
    }

    #[test]
    fn interval_converts_fractional_hours() {
        let state = DaemonState::with_interval(0.01);
        assert_eq!(state.interval().num_seconds(), 36);
    }
}
