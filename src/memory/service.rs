//! Login-time autostart descriptors: a launchd agent on macOS, a systemd
//! user service plus timer on Linux. Both re-run `daemon start` every
//! interval, which is a no-op while the scheduler is alive.

use crate::memory::paths::MemoryPaths;
use crate::memory::util::run_command_with_timeout;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const LAUNCHD_LABEL: &str = "com.cursormemory.daemon";
const SYSTEMD_UNIT: &str = "cursormemory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Launchd,
    Systemd,
}

impl ServiceKind {
    pub fn detect() -> Result<Self> {
        if cfg!(target_os = "macos") {
            Ok(Self::Launchd)
        } else if cfg!(target_os = "linux") {
            Ok(Self::Systemd)
        } else {
            anyhow::bail!("autostart is only supported on macOS (launchd) and Linux (systemd)")
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Launchd => "launchd",
            Self::Systemd => "systemd",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFile {
    pub path: PathBuf,
    pub contents: String,
}

fn interval_secs(interval_hours: f64) -> u64 {
    ((interval_hours * 3600.0).round() as u64).max(60)
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn launchd_plist(paths: &MemoryPaths, exe: &Path, interval_hours: f64) -> String {
    let exe = xml_escape(&exe.display().to_string());
    let home = xml_escape(&paths.home.display().to_string());
    let log = xml_escape(&paths.log_file.display().to_string());
    let secs = interval_secs(interval_hours);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{LAUNCHD_LABEL}</string>
  <key>ProgramArguments</key>
  <array>
    <string>{exe}</string>
    <string>daemon</string>
    <string>start</string>
  </array>
  <key>EnvironmentVariables</key>
  <dict>
    <key>CURSORMEMORY_HOME</key>
    <string>{home}</string>
  </dict>
  <key>RunAtLoad</key>
  <true/>
  <key>StartInterval</key>
  <integer>{secs}</integer>
  <key>StandardOutPath</key>
  <string>{log}</string>
  <key>StandardErrorPath</key>
  <string>{log}</string>
</dict>
</plist>
"#
    )
}

pub fn systemd_service(paths: &MemoryPaths, exe: &Path) -> String {
    format!(
        "[Unit]
Description=cursormemory scheduler

[Service]
Type=forking
PIDFile={pid}
Environment=CURSORMEMORY_HOME={home}
ExecStart={exe} daemon start
",
        pid = paths.pid_file.display(),
        home = paths.home.display(),
        exe = exe.display(),
    )
}

pub fn systemd_timer(interval_hours: f64) -> String {
    format!(
        "[Unit]
Description=Keep the cursormemory scheduler running

[Timer]
OnBootSec=1min
OnUnitActiveSec={secs}s
Unit={SYSTEMD_UNIT}.service

[Install]
WantedBy=timers.target
",
        secs = interval_secs(interval_hours),
    )
}

fn launch_agents_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|h| h.join("Library").join("LaunchAgents"))
        .context("HOME directory could not be resolved")
}

fn systemd_user_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|c| c.join("systemd").join("user"))
        .context("config directory could not be resolved")
}

pub fn descriptor_paths(kind: ServiceKind) -> Result<Vec<PathBuf>> {
    Ok(match kind {
        ServiceKind::Launchd => vec![launch_agents_dir()?.join(format!("{LAUNCHD_LABEL}.plist"))],
        ServiceKind::Systemd => {
            let dir = systemd_user_dir()?;
            vec![
                dir.join(format!("{SYSTEMD_UNIT}.service")),
                dir.join(format!("{SYSTEMD_UNIT}.timer")),
            ]
        }
    })
}

pub fn descriptor_files(
    kind: ServiceKind,
    paths: &MemoryPaths,
    exe: &Path,
    interval_hours: f64,
) -> Result<Vec<ServiceFile>> {
    let locations = descriptor_paths(kind)?;
    let contents = match kind {
        ServiceKind::Launchd => vec![launchd_plist(paths, exe, interval_hours)],
        ServiceKind::Systemd => vec![systemd_service(paths, exe), systemd_timer(interval_hours)],
    };
    Ok(locations
        .into_iter()
        .zip(contents)
        .map(|(path, contents)| ServiceFile { path, contents })
        .collect())
}

fn run_tool(program: &str, args: &[&str]) -> Result<()> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    let out = run_command_with_timeout(&mut cmd)
        .with_context(|| format!("failed to run `{program} {}`", args.join(" ")))?;
    if !out.status.success() {
        anyhow::bail!(
            "`{program} {}` failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(())
}

/// Writes the descriptors and activates them. Returns the written paths.
pub fn install(
    kind: ServiceKind,
    paths: &MemoryPaths,
    exe: &Path,
    interval_hours: f64,
) -> Result<Vec<PathBuf>> {
    let files = descriptor_files(kind, paths, exe, interval_hours)?;
    for file in &files {
        if let Some(parent) = file.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&file.path, &file.contents)
            .with_context(|| format!("failed to write {}", file.path.display()))?;
    }

    match kind {
        ServiceKind::Launchd => {
            let plist = files[0].path.display().to_string();
            // Reload picks up a changed interval.
            let _ = run_tool("launchctl", &["unload", &plist]);
            run_tool("launchctl", &["load", "-w", &plist])?;
        }
        ServiceKind::Systemd => {
            run_tool("systemctl", &["--user", "daemon-reload"])?;
            run_tool(
                "systemctl",
                &["--user", "enable", "--now", &format!("{SYSTEMD_UNIT}.timer")],
            )?;
        }
    }

    Ok(files.into_iter().map(|f| f.path).collect())
}

/// Deactivates and deletes the descriptors. An empty result means nothing
/// was installed.
pub fn uninstall(kind: ServiceKind) -> Result<Vec<PathBuf>> {
    let present: Vec<PathBuf> = descriptor_paths(kind)?
        .into_iter()
        .filter(|p| p.exists())
        .collect();
    if present.is_empty() {
        return Ok(present);
    }

    match kind {
        ServiceKind::Launchd => {
            let plist = present[0].display().to_string();
            let _ = run_tool("launchctl", &["unload", "-w", &plist]);
        }
        ServiceKind::Systemd => {
            let _ = run_tool(
                "systemctl",
                &["--user", "disable", "--now", &format!("{SYSTEMD_UNIT}.timer")],
            );
        }
    }

    for path in &present {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    if kind == ServiceKind::Systemd {
        let _ = run_tool("systemctl", &["--user", "daemon-reload"]);
    }
    Ok(present)
}
