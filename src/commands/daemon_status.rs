use anyhow::Result;
use chrono::Utc;

use crate::commands::CommandReport;
use crate::memory::daemon_lock::{BUILD_ID, daemon_lock_held, read_daemon_lock_payload};
use crate::memory::settings::Settings;
use crate::memory::supervisor::{format_age, running_pid};

pub fn run(settings: &Settings) -> Result<CommandReport> {
    let paths = &settings.paths;
    let mut report = CommandReport::new("daemon-status");
    if paths.home_is_explicit {
        report.detail(format!("home={} (CURSORMEMORY_HOME)", paths.home.display()));
    } else {
        report.detail(format!("home={}", paths.home.display()));
    }

    let pid = running_pid(paths);
    match pid {
        Some(pid) => report.detail(format!("status=running pid={pid}")),
        None if daemon_lock_held(paths).unwrap_or(false) => {
            report.detail("status=stopping (finishing its current run)")
        }
        None => report.detail("status=stopped"),
    }

    let state = settings.state_store().load()?;
    report.detail(format!("interval_hours={}", state.interval_hours));
    match state.last_distill_at {
        Some(at) => {
            let result = match state.last_distill_succeeded {
                Some(true) => "success",
                Some(false) => "failed",
                None => "unknown",
            };
            let age = format_age(Utc::now().signed_duration_since(at).num_seconds());
            report.detail(format!("last_distill={age} ago ({result})"));
        }
        None => report.detail("last_distill=never"),
    }
    report.detail(format!(
        "last_briefing={}",
        state.last_briefing_date.as_deref().unwrap_or("never")
    ));

    match settings.registry.briefing_schedule() {
        Some(schedule) => report.detail(format!(
            "briefing_at={} {}",
            schedule.at.format("%H:%M"),
            schedule.tz
        )),
        None => report.detail("briefing=disabled"),
    }

    if pid.is_some()
        && let Ok(Some(lock)) = read_daemon_lock_payload(paths)
    {
        report.detail(format!("lock_pid={}", lock.pid));
        if !lock.build_id.is_empty() && lock.build_id != BUILD_ID {
            report.detail("build=stale (restart the daemon to run the installed binary)");
        }
    }

    if paths.log_file.exists() {
        report.detail(format!("log_file={}", paths.log_file.display()));
    }
    if paths.state_file.exists() {
        report.detail(format!("state_file={}", paths.state_file.display()));
    }

    Ok(report)
}
