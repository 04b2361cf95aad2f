use anyhow::Result;

use crate::commands::CommandReport;
use crate::memory::settings::Settings;
use crate::memory::supervisor::{self, StopOutcome};

pub fn run(settings: &Settings) -> Result<CommandReport> {
    let mut report = CommandReport::new("daemon-stop");
    report.detail(format!("pid_file={}", settings.paths.pid_file.display()));

    match supervisor::stop(&settings.paths)? {
        StopOutcome::NotRunning { stale_pid_removed } => {
            report.detail("daemon not running");
            if stale_pid_removed {
                report.detail("removed stale pid file");
            }
        }
        StopOutcome::Stopped(pid) => {
            report.detail(format!("sent SIGTERM to daemon (pid {pid})"));
            report.detail("the scheduler exits once its current tick finishes");
        }
    }

    Ok(report)
}
