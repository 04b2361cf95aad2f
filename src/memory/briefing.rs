use crate::memory::agent::AgentTarget;
use crate::memory::registry::BriefingSchedule;
use crate::memory::runner::CommandRunner;
use crate::memory::util::truncate_chars;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

pub const MAX_BRIEFING_CHARS: usize = 4000;
const TRUNCATED_CHARS: usize = 3950;
const TRUNCATION_MARKER: &str = "\n\n... (truncated)";

/// Returns today's date in the schedule's timezone when a briefing is owed:
/// the configured local time has passed and none was sent today.
pub fn due_briefing_date(
    now: DateTime<Utc>,
    schedule: &BriefingSchedule,
    last_briefing_date: Option<&str>,
) -> Option<String> {
    let local = now.with_timezone(&schedule.tz);
    if local.time() < schedule.at {
        return None;
    }
    let today = local.format("%Y-%m-%d").to_string();
    if last_briefing_date == Some(today.as_str()) {
        return None;
    }
    Some(today)
}

pub fn clamp_briefing(text: &str) -> String {
    if text.chars().count() <= MAX_BRIEFING_CHARS {
        return text.to_string();
    }
    truncate_chars(text, TRUNCATED_CHARS, TRUNCATION_MARKER)
}

/// Has the agent write a briefing into `output` and returns its trimmed,
/// length-capped text.
pub fn generate_briefing(
    runner: &dyn CommandRunner,
    agent: &AgentTarget,
    output: &Path,
    timeout: Duration,
) -> Result<String> {
    match fs::remove_file(output) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to clear stale briefing {}", output.display()));
        }
    }

    let outcome = runner.run(&agent.briefing_invocation(output, Some(timeout)));
    if !outcome.succeeded() {
        anyhow::bail!(
            "briefing agent failed ({}): {}",
            outcome.failure_reason(),
            outcome.output_tail(200)
        );
    }

    let raw = fs::read_to_string(output).with_context(|| {
        format!(
            "briefing agent exited cleanly but did not write {}",
            output.display()
        )
    })?;
    let text = raw.trim();
    if text.is_empty() {
        anyhow::bail!("briefing agent wrote an empty {}", output.display());
    }
    Ok(clamp_briefing(text))
}
