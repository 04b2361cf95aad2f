use anyhow::{Context, Result};

use crate::commands::CommandReport;
use crate::memory::service::{self, ServiceKind};
use crate::memory::settings::Settings;

pub fn install(settings: &Settings) -> Result<CommandReport> {
    let mut report = CommandReport::new("daemon-install");
    let kind = ServiceKind::detect()?;
    let exe = std::env::current_exe().context("failed to resolve cursormemory executable")?;
    let state = settings.state_store().load()?;

    report.detail(format!("service={}", kind.as_str()));
    report.detail(format!("interval_hours={}", state.interval_hours));
    match service::install(kind, &settings.paths, &exe, state.interval_hours) {
        Ok(files) => {
            for file in files {
                report.detail(format!("installed {}", file.display()));
            }
        }
        Err(err) => report.issue(format!("{err:#}")),
    }
    Ok(report)
}

pub fn uninstall() -> Result<CommandReport> {
    let mut report = CommandReport::new("daemon-uninstall");
    let kind = ServiceKind::detect()?;
    report.detail(format!("service={}", kind.as_str()));

    let removed = service::uninstall(kind)?;
    if removed.is_empty() {
        report.detail("autostart not installed");
    }
    for file in removed {
        report.detail(format!("removed {}", file.display()));
    }
    Ok(report)
}
