//! Per-turn capture of new transcript lines into the daily notes file.

use crate::memory::paths::MemoryPaths;
use crate::memory::registry::Registry;
use crate::memory::transcript::{daily_header, format_turn, parse_turn};
use crate::memory::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;

pub const STDIN_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_TRACKED_TRANSCRIPTS: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub workspace_roots: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    NoInput,
    NoTranscript,
    NoNewLines,
    NoTurn,
    NoDestination,
    Appended(PathBuf),
}

/// Reads `reader` to EOF on a helper thread, returning whatever arrived
/// before `timeout`. A writer that never closes its end cannot hang us.
pub fn read_input_with_timeout<R>(mut reader: R, timeout: Duration) -> String
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let deadline = std::time::Instant::now() + timeout;
    let mut received = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(chunk) => received.extend_from_slice(&chunk),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&received).into_owned()
}

/// Per-transcript count of non-blank lines already consumed.
#[derive(Debug, Default)]
pub struct OffsetTable {
    entries: BTreeMap<String, usize>,
}

impl OffsetTable {
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<BTreeMap<String, usize>>(&raw) {
            Ok(entries) => Self { entries },
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "HOOK_STATE_CORRUPT",
                    stage: "hook",
                    action: "load-offsets",
                    path: &path.display().to_string(),
                    retry: "started-fresh",
                    reason: "json-parse-failed",
                    err: &format!("{err}"),
                });
                Self::default()
            }
        }
    }

    pub fn get(&self, transcript: &str) -> usize {
        self.entries.get(transcript).copied().unwrap_or(0)
    }

    /// Offsets never move backwards.
    pub fn advance(&mut self, transcript: &str, consumed: usize) {
        let entry = self.entries.entry(transcript.to_string()).or_insert(0);
        *entry = (*entry).max(consumed);
    }

    /// Drops entries for transcripts that no longer exist once the table
    /// grows past `MAX_TRACKED_TRANSCRIPTS`.
    pub fn prune_missing(&mut self) {
        if self.entries.len() <= MAX_TRACKED_TRANSCRIPTS {
            return;
        }
        self.entries.retain(|path, _| Path::new(path).exists());
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        let mut temp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer(&mut temp, &self.entries)?;
        temp.flush()?;
        temp.persist(path)
            .map_err(|e| anyhow::anyhow!("failed to persist {}: {}", path.display(), e.error))?;
        Ok(())
    }
}

/// Tracked project name for the first root the registry knows, else the
/// basename of the first usable root.
pub fn resolve_destination(roots: &[String], registry: &Registry) -> Option<String> {
    let roots: Vec<&str> = roots
        .iter()
        .map(|r| r.trim().trim_end_matches('/'))
        .filter(|r| !r.is_empty())
        .collect();

    if let Some(project) = roots
        .iter()
        .find_map(|root| registry.project_for_root(Path::new(root)))
    {
        return Some(project.name.clone());
    }

    roots.iter().find_map(|root| {
        Path::new(root)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
    })
}

fn append_to_daily_file(file: &Path, date: &str, section: &str) -> Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let is_new = !file.exists();
    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)
        .with_context(|| format!("failed to open {}", file.display()))?;

    let mut content = String::new();
    if is_new {
        content.push_str(&daily_header(date));
    }
    content.push_str(section);
    out.write_all(content.as_bytes())
        .with_context(|| format!("failed to append to {}", file.display()))?;
    Ok(())
}

/// Consumes the transcript lines added since the last invocation and
/// appends the resulting turn, if any, to today's notes.
pub fn save_turn(
    raw_input: &str,
    paths: &MemoryPaths,
    registry: &Registry,
    now: DateTime<Local>,
) -> Result<HookOutcome> {
    if raw_input.trim().is_empty() {
        return Ok(HookOutcome::NoInput);
    }
    let Ok(input) = serde_json::from_str::<HookInput>(raw_input) else {
        return Ok(HookOutcome::NoInput);
    };
    let Some(transcript) = input
        .transcript_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
    else {
        return Ok(HookOutcome::NoTranscript);
    };
    let Ok(raw_transcript) = fs::read_to_string(transcript) else {
        return Ok(HookOutcome::NoTranscript);
    };

    let lines: Vec<&str> = raw_transcript
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();

    let mut offsets = OffsetTable::load(&paths.hook_state_file);
    let offset = offsets.get(transcript);
    if offset >= lines.len() {
        return Ok(HookOutcome::NoNewLines);
    }

    // Persist before parsing so a crash below can never replay these lines.
    offsets.advance(transcript, lines.len());
    offsets.prune_missing();
    offsets.save(&paths.hook_state_file)?;

    let Some(turn) = parse_turn(lines[offset..].iter().copied()) else {
        return Ok(HookOutcome::NoTurn);
    };
    let Some(identity) = resolve_destination(&input.workspace_roots, registry) else {
        return Ok(HookOutcome::NoDestination);
    };

    let date = now.format("%Y-%m-%d").to_string();
    let file = paths
        .project_memory_dir(&identity)
        .join(format!("{date}.md"));
    let section = format_turn(&turn, &now.format("%H:%M").to_string());
    append_to_daily_file(&file, &date, &section)?;
    Ok(HookOutcome::Appended(file))
}

#[cfg(test)]
mod tests {
    use super::{
        HookOutcome, MAX_TRACKED_TRANSCRIPTS, OffsetTable, read_input_with_timeout,
        resolve_destination, save_turn,
    };
    use crate::memory::paths::MemoryPaths;
    use crate::memory::registry::{ProjectEntry, Registry};
    use chrono::{Local, TimeZone};
    use std::fs;
    use std::io::{Cursor, Read};
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    const USER: &str = r#"{"role":"user","message":{"content":[{"type":"text","text":"<user_query>add caching</user_query>"}]}}"#;
    const ASSISTANT: &str = r#"{"role":"assistant","message":{"content":[{"type":"text","text":"Done."},{"type":"tool_use","name":"Write","input":{"path":"/w/app/src/cache.rs"}}]}}"#;

    struct NeverEnds;

    impl Read for NeverEnds {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_secs(60));
            Ok(0)
        }
    }

    fn now() -> chrono::DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 4, 9, 14, 30, 0)
            .single()
            .expect("local time")
    }

    fn input_for(transcript: &Path, root: &str) -> String {
        serde_json::json!({
            "transcript_path": transcript.display().to_string(),
            "workspace_roots": [root],
        })
        .to_string()
    }

    #[test]
    fn stdin_reader_returns_on_eof() {
        let got = read_input_with_timeout(Cursor::new(b"{\"a\":1}".to_vec()), Duration::from_secs(5));
        assert_eq!(got, "{\"a\":1}");
    }

    #[test]
    fn stdin_reader_gives_up_after_timeout() {
        let started = Instant::now();
        let got = read_input_with_timeout(NeverEnds, Duration::from_millis(100));
        assert!(got.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn appends_turn_then_ignores_replay() {
        let tmp = tempdir().expect("tempdir");
        let paths = MemoryPaths::under(tmp.path().join("home"));
        let transcript = tmp.path().join("t.jsonl");
        fs::write(&transcript, format!("{USER}\n\n{ASSISTANT}\n")).expect("write");
        let raw = input_for(&transcript, "/w/app");

        let outcome = save_turn(&raw, &paths, &Registry::default(), now()).expect("save");
        let file = paths.project_memory_dir("app").join("2026-04-09.md");
        assert_eq!(outcome, HookOutcome::Appended(file.clone()));
        let written = fs::read_to_string(&file).expect("daily");
        assert!(written.starts_with("# 2026-04-09 Daily Notes\n\n### 14:30 Conversation"));
        assert!(written.contains("**Query:** add caching"));
        assert!(written.contains("**Files touched:** `cache.rs`"));

        let again = save_turn(&raw, &paths, &Registry::default(), now()).expect("save");
        assert_eq!(again, HookOutcome::NoNewLines);
        assert_eq!(fs::read_to_string(&file).expect("daily"), written);
    }

    #[test]
    fn only_new_lines_are_parsed_and_header_written_once() {
        let tmp = tempdir().expect("tempdir");
        let paths = MemoryPaths::under(tmp.path().join("home"));
        let transcript = tmp.path().join("t.jsonl");
        fs::write(&transcript, format!("{USER}\n{ASSISTANT}\n")).expect("write");
        let raw = input_for(&transcript, "/w/app");
        save_turn(&raw, &paths, &Registry::default(), now()).expect("first");

        let second = r#"{"role":"user","message":{"content":[{"type":"text","text":"now add tests"}]}}"#;
        fs::write(&transcript, format!("{USER}\n{ASSISTANT}\n{second}\n")).expect("append");
        save_turn(&raw, &paths, &Registry::default(), now()).expect("second");

        let file = paths.project_memory_dir("app").join("2026-04-09.md");
        let written = fs::read_to_string(file).expect("daily");
        assert_eq!(written.matches("Daily Notes").count(), 1);
        assert_eq!(written.matches("**Query:** add caching").count(), 1);
        assert!(written.contains("**Query:** now add tests"));
    }

    #[test]
    fn unparseable_batch_still_advances_offset() {
        let tmp = tempdir().expect("tempdir");
        let paths = MemoryPaths::under(tmp.path().join("home"));
        let transcript = tmp.path().join("t.jsonl");
        fs::write(&transcript, "garbage\n{\"role\":\"assistant\"}\n").expect("write");
        let raw = input_for(&transcript, "/w/app");

        let outcome = save_turn(&raw, &paths, &Registry::default(), now()).expect("save");
        assert_eq!(outcome, HookOutcome::NoTurn);
        let offsets = OffsetTable::load(&paths.hook_state_file);
        assert_eq!(offsets.get(&transcript.display().to_string()), 2);
        assert!(!paths.projects_dir.exists());
    }

    #[test]
    fn empty_or_invalid_input_is_noop() {
        let tmp = tempdir().expect("tempdir");
        let paths = MemoryPaths::under(tmp.path().join("home"));
        let registry = Registry::default();
        assert_eq!(save_turn("  ", &paths, &registry, now()).expect("ok"), HookOutcome::NoInput);
        assert_eq!(save_turn("{oops", &paths, &registry, now()).expect("ok"), HookOutcome::NoInput);
        assert_eq!(
            save_turn(r#"{"transcript_path":"/nope/t.jsonl"}"#, &paths, &registry, now())
                .expect("ok"),
            HookOutcome::NoTranscript
        );
        assert!(!paths.hook_state_file.exists());
    }

    #[test]
    fn missing_roots_drop_the_turn() {
        let tmp = tempdir().expect("tempdir");
        let paths = MemoryPaths::under(tmp.path().join("home"));
        let transcript = tmp.path().join("t.jsonl");
        fs::write(&transcript, format!("{USER}\n")).expect("write");
        let raw = serde_json::json!({"transcript_path": transcript.display().to_string()}).to_string();
        assert_eq!(
            save_turn(&raw, &paths, &Registry::default(), now()).expect("ok"),
            HookOutcome::NoDestination
        );
    }

    #[test]
    fn registry_name_wins_over_basename() {
        let registry = Registry {
            projects: vec![ProjectEntry {
                name: "billing".to_string(),
                path: "/w/svc-billing".to_string(),
            }],
            ..Registry::default()
        };
        let roots = vec!["/w/other".to_string(), "/w/svc-billing/".to_string()];
        assert_eq!(resolve_destination(&roots, &registry).as_deref(), Some("billing"));
        assert_eq!(
            resolve_destination(&roots, &Registry::default()).as_deref(),
            Some("other")
        );
        assert_eq!(resolve_destination(&[], &registry), None);
    }

    #[test]
    fn offsets_only_move_forward_and_prune_missing() {
        let mut table = OffsetTable::default();
        table.advance("/t/a", 10);
        table.advance("/t/a", 4);
        assert_eq!(table.get("/t/a"), 10);

        for i in 0..=MAX_TRACKED_TRANSCRIPTS {
            table.advance(&format!("/nonexistent/{i}.jsonl"), 1);
        }
        assert!(table.entries.len() > MAX_TRACKED_TRANSCRIPTS);
        table.prune_missing();
        assert_eq!(table.entries.len(), 0);
    }
}
