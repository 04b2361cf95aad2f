use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::commands::CommandReport;
use crate::logging;
use crate::memory::agent::AgentTarget;
use crate::memory::daemon_lock::acquire_daemon_lock;
use crate::memory::runner::ProcessRunner;
use crate::memory::scheduler::{Scheduler, SystemClock};
use crate::memory::settings::Settings;
use crate::memory::supervisor::release_pid_file;
use crate::memory::telegram::{Notifier, TelegramNotifier};

/// The scheduler process body. Blocks until SIGTERM or SIGINT.
pub fn run(settings: &Settings) -> Result<CommandReport> {
    let mut report = CommandReport::new("daemon-run");
    let paths = &settings.paths;
    let pid = std::process::id();

    let _lock = acquire_daemon_lock(paths)?;

    let agent = match AgentTarget::resolve(settings) {
        Ok(agent) => agent,
        Err(err) => {
            logging::log(&format!("Fatal: {err:#}. Exiting."));
            let _ = release_pid_file(&paths.pid_file, pid);
            return Err(err);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("failed to install shutdown signal handler")?;
    }

    let state = settings.state_store().load()?;
    logging::log(&format!(
        "Daemon started (pid {pid}, interval {}h, tick {}s, agent {})",
        state.interval_hours,
        settings.config.daemon.tick_secs,
        agent.bin.display()
    ));

    let notifier = settings
        .registry
        .notification_target()
        .cloned()
        .map(TelegramNotifier::new);
    if settings.registry.briefing_schedule().is_none() {
        logging::log(
            "Daily briefing disabled: notification target, briefingTime or timezone not configured",
        );
    }

    let runner = ProcessRunner::default();
    let clock = SystemClock;
    let scheduler = Scheduler::new(
        settings,
        agent,
        &runner,
        notifier.as_ref().map(|n| n as &dyn Notifier),
        &clock,
    );
    scheduler.run_until(&shutdown);

    logging::log("Received shutdown signal, exiting");
    release_pid_file(&paths.pid_file, pid)?;
    report.detail("scheduler stopped");
    Ok(report)
}
