use crate::memory::paths::MemoryPaths;
use crate::memory::util::now_epoch_secs;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};

pub const BUILD_ID: &str = env!("CURSORMEMORY_BUILD_ID");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonLockPayload {
    pub pid: u32,
    #[serde(default)]
    pub started_at_epoch_secs: u64,
    #[serde(default)]
    pub build_id: String,
    #[serde(default)]
    pub home: String,
}

pub fn parse_daemon_lock_payload(raw: &str) -> Option<DaemonLockPayload> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(payload) = serde_json::from_str::<DaemonLockPayload>(trimmed) {
        return Some(payload);
    }

    // A bare pid line is accepted too.
    let pid = trimmed.lines().next()?.trim().parse::<u32>().ok()?;
    Some(DaemonLockPayload {
        pid,
        started_at_epoch_secs: 0,
        build_id: String::new(),
        home: String::new(),
    })
}

pub fn read_daemon_lock_payload(paths: &MemoryPaths) -> Result<Option<DaemonLockPayload>> {
    if !paths.lock_file.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(&paths.lock_file)
        .with_context(|| format!("failed to read daemon lock {}", paths.lock_file.display()))?;
    Ok(parse_daemon_lock_payload(&raw))
}

/// Whether some process holds the scheduler lock right now. The probe lock is
/// dropped before returning.
pub fn daemon_lock_held(paths: &MemoryPaths) -> Result<bool> {
    let lock_path = &paths.lock_file;
    let probe = match OpenOptions::new().read(true).write(true).open(lock_path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to open daemon lock {}", lock_path.display()));
        }
    };

    match probe.try_lock_exclusive() {
        Ok(()) => Ok(false),
        Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(true),
        Err(err) => {
            Err(err).with_context(|| format!("failed to probe daemon lock {}", lock_path.display()))
        }
    }
}

/// Takes the exclusive scheduler lock for this memory home. The returned
/// handle must be held for the lifetime of the scheduler.
pub fn acquire_daemon_lock(paths: &MemoryPaths) -> Result<File> {
    let lock_path = &paths.lock_file;
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("failed to open daemon lock {}", lock_path.display()))?;

    match lock_file.try_lock_exclusive() {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::WouldBlock => {
            anyhow::bail!(
                "cursormemory scheduler already running (lock: {})",
                lock_path.display()
            );
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to lock daemon file {}", lock_path.display()));
        }
    }

    let payload = DaemonLockPayload {
        pid: std::process::id(),
        started_at_epoch_secs: now_epoch_secs().unwrap_or(0),
        build_id: BUILD_ID.to_string(),
        home: paths.home.display().to_string(),
    };
    lock_file
        .set_len(0)
        .with_context(|| format!("failed to truncate daemon lock {}", lock_path.display()))?;
    writeln!(&mut lock_file, "{}", serde_json::to_string(&payload)?)
        .with_context(|| format!("failed to write daemon lock {}", lock_path.display()))?;

    Ok(lock_file)
}
