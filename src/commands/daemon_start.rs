use anyhow::{Context, Result};

use crate::commands::CommandReport;
use crate::error::CmError;
use crate::memory::agent::AgentTarget;
use crate::memory::settings::Settings;
use crate::memory::supervisor::{self, StartOutcome};

#[derive(Debug, Clone, Default)]
pub struct DaemonStartOptions {
    pub interval_hours: Option<f64>,
}

pub fn run(settings: &Settings, opts: &DaemonStartOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("daemon-start");

    if let Some(hours) = opts.interval_hours {
        if !(hours.is_finite() && hours > 0.0) {
            return Err(CmError::InvalidInterval(hours).into());
        }
        let state = settings.state_store().set_interval(hours)?;
        report.detail(format!("interval_hours={}", state.interval_hours));
    }

    if let Err(err) = AgentTarget::resolve(settings) {
        report.issue(format!("{err:#}"));
        return Ok(report);
    }

    let exe = std::env::current_exe().context("failed to resolve cursormemory executable")?;
    match supervisor::start(&settings.paths, &exe)? {
        StartOutcome::AlreadyRunning(pid) => {
            report.detail(format!("daemon already running (pid {pid})"));
            if opts.interval_hours.is_some() {
                report.detail("new interval applies from the next tick");
            }
        }
        StartOutcome::PreviousStillExiting(pid) => {
            let who = match pid {
                Some(pid) => format!("a previous scheduler (pid {pid})"),
                None => "a previous scheduler".to_string(),
            };
            report.issue(format!(
                "{who} still holds {} while it finishes its current run; start again once it exits",
                settings.paths.lock_file.display()
            ));
        }
        StartOutcome::Started(pid) => {
            report.detail(format!("daemon started (pid {pid})"));
            report.detail(format!("log_file={}", settings.paths.log_file.display()));
        }
    }

    Ok(report)
}
