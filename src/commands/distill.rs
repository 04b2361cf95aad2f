use anyhow::Result;

use crate::commands::CommandReport;
use crate::memory::agent::AgentTarget;
use crate::memory::runner::{CommandRunner, ProcessRunner};
use crate::memory::settings::Settings;

/// A single manual distill attempt. Scheduler state is left untouched.
pub fn run(settings: &Settings) -> Result<CommandReport> {
    let mut report = CommandReport::new("distill");

    let agent = match AgentTarget::resolve(settings) {
        Ok(agent) => agent,
        Err(err) => {
            report.issue(format!("{err:#}"));
            return Ok(report);
        }
    };

    let outcome = ProcessRunner::default()
        .run(&agent.distill_invocation(Some(settings.config.distill_timeout())));
    if outcome.succeeded() {
        report.detail(format!(
            "distill completed; see {}",
            settings.paths.memory_file.display()
        ));
    } else {
        report.issue(format!(
            "distill failed ({}): {}",
            outcome.failure_reason(),
            outcome.output_tail(200)
        ));
    }
    Ok(report)
}
