//! PID-file bookkeeping and detached launch of the scheduler process.

use crate::memory::daemon_lock::{daemon_lock_held, read_daemon_lock_payload};
use crate::memory::paths::MemoryPaths;
use crate::memory::util::{pid_alive, send_signal};
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

pub fn read_pid(pid_file: &Path) -> Option<u32> {
    let raw = fs::read_to_string(pid_file).ok()?;
    raw.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}

pub fn write_pid(pid_file: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = pid_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(pid_file, format!("{pid}\n"))
        .with_context(|| format!("failed to write pid file {}", pid_file.display()))
}

/// Returns whether a file was actually removed.
pub fn remove_pid_file(pid_file: &Path) -> Result<bool> {
    match fs::remove_file(pid_file) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err)
            .with_context(|| format!("failed to remove pid file {}", pid_file.display())),
    }
}

/// Removes the pid file only while it still names `pid`, so an exiting
/// scheduler never deletes the record of its replacement.
pub fn release_pid_file(pid_file: &Path, pid: u32) -> Result<bool> {
    match read_pid(pid_file) {
        Some(recorded) if recorded == pid => remove_pid_file(pid_file),
        _ => Ok(false),
    }
}

/// The recorded pid, if that process is still alive.
pub fn running_pid(paths: &MemoryPaths) -> Option<u32> {
    read_pid(&paths.pid_file).filter(|pid| pid_alive(*pid))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning(u32),
    /// A stopped scheduler still holds the lock while it finishes its
    /// in-flight run; the pid comes from the lock payload when readable.
    PreviousStillExiting(Option<u32>),
    Started(u32),
}

/// Launches `exe daemon run` in its own process group with output appended
/// to the daemon log, then records its pid.
pub fn start(paths: &MemoryPaths, exe: &Path) -> Result<StartOutcome> {
    if let Some(pid) = running_pid(paths) {
        return Ok(StartOutcome::AlreadyRunning(pid));
    }
    if daemon_lock_held(paths)? {
        let holder = read_daemon_lock_payload(paths)
            .ok()
            .flatten()
            .map(|payload| payload.pid);
        return Ok(StartOutcome::PreviousStillExiting(holder));
    }

    fs::create_dir_all(&paths.home)
        .with_context(|| format!("failed to create {}", paths.home.display()))?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_file)
        .with_context(|| format!("failed to open daemon log {}", paths.log_file.display()))?;
    let log_err = log
        .try_clone()
        .context("failed to clone daemon log handle")?;

    let mut cmd = Command::new(exe);
    cmd.args(["daemon", "run"])
        .current_dir(&paths.home)
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err)
        .process_group(0);

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn scheduler {}", exe.display()))?;
    let pid = child.id();
    write_pid(&paths.pid_file, pid)?;
    Ok(StartOutcome::Started(pid))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning { stale_pid_removed: bool },
    Stopped(u32),
}

/// Sends SIGTERM and forgets the pid without waiting; the scheduler
/// finishes its current tick on its own.
pub fn stop(paths: &MemoryPaths) -> Result<StopOutcome> {
    let Some(pid) = read_pid(&paths.pid_file) else {
        let stale = remove_pid_file(&paths.pid_file)?;
        return Ok(StopOutcome::NotRunning {
            stale_pid_removed: stale,
        });
    };

    if !pid_alive(pid) {
        remove_pid_file(&paths.pid_file)?;
        return Ok(StopOutcome::NotRunning {
            stale_pid_removed: true,
        });
    }

    match send_signal(pid, libc::SIGTERM) {
        Ok(()) => {}
        Err(err) if err.raw_os_error() == Some(libc::ESRCH) => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to send SIGTERM to {pid}"));
        }
    }
    remove_pid_file(&paths.pid_file)?;
    Ok(StopOutcome::Stopped(pid))
}

/// Compact age: `42s`, `5m`, `3h`, `2d`, each unit truncated.
pub fn format_age(secs: i64) -> String {
    let secs = secs.max(0);
    if secs < 60 {
        return format!("{secs}s");
    }
    let minutes = secs / 60;
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h");
    }
    format!("{}d", hours / 24)
}
