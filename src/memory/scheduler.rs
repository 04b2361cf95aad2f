//! The daemon's periodic decision loop: briefing first, then distill.

use crate::logging;
use crate::memory::agent::AgentTarget;
use crate::memory::briefing::{due_briefing_date, generate_briefing};
use crate::memory::runner::{CommandRunner, RunOutcome};
use crate::memory::settings::Settings;
use crate::memory::state::{DaemonState, StateStore};
use crate::memory::telegram::Notifier;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const SHUTDOWN_POLL: Duration = Duration::from_secs(1);
const OUTPUT_TAIL_CHARS: usize = 200;

/// Wall-clock and sleeping, injectable so tests can run without waiting.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn pause(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

pub fn is_distill_due(state: &DaemonState, now: DateTime<Utc>) -> bool {
    match state.last_distill_at {
        None => true,
        Some(last) => now.signed_duration_since(last) >= state.interval(),
    }
}

fn newest_markdown_after(dir: &Path, after: DateTime<Utc>) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if newest_markdown_after(&path, after) {
                return true;
            }
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        if let Ok(modified) = entry.metadata().and_then(|m| m.modified())
            && DateTime::<Utc>::from(modified) > after
        {
            return true;
        }
    }
    false
}

/// Any markdown file under `dirs` modified after the last distill. Always
/// true before the first distill.
pub fn has_new_material(state: &DaemonState, dirs: &[PathBuf]) -> bool {
    let Some(last) = state.last_distill_at else {
        return true;
    };
    dirs.iter().any(|dir| newest_markdown_after(dir, last))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.config.distill.max_retries + 1,
            backoff: settings.config.distill_retry_delay(),
            timeout: settings.config.distill_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStep {
    Done,
    RetryAfter(Duration),
    GiveUp,
}

/// Attempt counter for one distill cycle.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn next_step(&self, outcome: &RunOutcome) -> AttemptStep {
        if outcome.succeeded() {
            AttemptStep::Done
        } else if self.attempt < self.policy.max_attempts {
            AttemptStep::RetryAfter(self.policy.backoff)
        } else {
            AttemptStep::GiveUp
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistillOutcome {
    Succeeded { attempts: u32 },
    GaveUp { attempts: u32 },
    NoNewMaterial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BriefingOutcome {
    Sent { date: String },
    Failed { reason: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub briefing: Option<BriefingOutcome>,
    pub distill: Option<DistillOutcome>,
}

pub struct Scheduler<'a> {
    settings: &'a Settings,
    store: StateStore,
    agent: AgentTarget,
    runner: &'a dyn CommandRunner,
    notifier: Option<&'a dyn Notifier>,
    clock: &'a dyn Clock,
    idle_logged: Cell<bool>,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        settings: &'a Settings,
        agent: AgentTarget,
        runner: &'a dyn CommandRunner,
        notifier: Option<&'a dyn Notifier>,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            settings,
            store: settings.state_store(),
            agent,
            runner,
            notifier,
            clock,
            idle_logged: Cell::new(false),
        }
    }

    /// One pass of the decision procedure. Errors are state-file I/O only;
    /// agent and delivery failures are reported in the returned value.
    pub fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        let state = self.store.load()?;
        if let Some(schedule) = self.settings.registry.briefing_schedule()
            && let Some(today) = due_briefing_date(
                self.clock.now(),
                &schedule,
                state.last_briefing_date.as_deref(),
            )
        {
            report.briefing = Some(self.run_briefing(&today)?);
        }

        let state = self.store.load()?;
        if is_distill_due(&state, self.clock.now()) {
            if has_new_material(&state, &self.settings.paths.material_dirs()) {
                self.idle_logged.set(false);
                report.distill = Some(self.run_distill()?);
            } else {
                if !self.idle_logged.replace(true) {
                    logging::log("No new material since last distill, skipping");
                }
                report.distill = Some(DistillOutcome::NoNewMaterial);
            }
        }

        Ok(report)
    }

    fn run_distill(&self) -> Result<DistillOutcome> {
        let policy = RetryPolicy::from_settings(self.settings);
        let mut retry = RetryState::new(policy);

        loop {
            let attempt = retry.begin_attempt();
            logging::log(&format!(
                "Starting distill (attempt {attempt}/{})...",
                policy.max_attempts
            ));
            let outcome = self
                .runner
                .run(&self.agent.distill_invocation(Some(policy.timeout)));

            let step = retry.next_step(&outcome);
            if step == AttemptStep::Done {
                self.store.record_distill(self.clock.now(), true)?;
                logging::log("Distill completed successfully");
                return Ok(DistillOutcome::Succeeded {
                    attempts: retry.attempts(),
                });
            }

            logging::log(&format!(
                "Distill attempt {attempt} failed ({}): {}",
                outcome.failure_reason(),
                outcome.output_tail(OUTPUT_TAIL_CHARS)
            ));
            match step {
                AttemptStep::RetryAfter(delay) => {
                    logging::log(&format!("Retrying in {}s...", delay.as_secs()));
                    self.clock.pause(delay);
                }
                _ => {
                    // Record the failed cycle so the next try waits a full interval.
                    self.store.record_distill(self.clock.now(), false)?;
                    logging::log(&format!(
                        "Distill failed after {} attempts; next try in {}h",
                        retry.attempts(),
                        self.store.load()?.interval_hours
                    ));
                    return Ok(DistillOutcome::GaveUp {
                        attempts: retry.attempts(),
                    });
                }
            }
        }
    }

    fn run_briefing(&self, today: &str) -> Result<BriefingOutcome> {
        let Some(notifier) = self.notifier else {
            return Ok(BriefingOutcome::Failed {
                reason: "no notification target configured".to_string(),
            });
        };

        logging::log("Generating daily briefing...");
        let text = match generate_briefing(
            self.runner,
            &self.agent,
            &self.settings.paths.briefing_output,
            self.settings.config.briefing_timeout(),
        ) {
            Ok(text) => text,
            Err(err) => {
                let reason = format!("{err:#}");
                logging::log(&format!("Briefing failed: {reason}"));
                return Ok(BriefingOutcome::Failed { reason });
            }
        };

        let sent = notifier.send(&text);
        if !sent.ok {
            let reason = sent
                .description
                .unwrap_or_else(|| "notification rejected".to_string());
            logging::log(&format!("Briefing delivery failed: {reason}"));
            return Ok(BriefingOutcome::Failed { reason });
        }

        self.store.record_briefing(today)?;
        logging::log(&format!("Briefing sent for {today}"));
        Ok(BriefingOutcome::Sent {
            date: today.to_string(),
        })
    }

    /// Ticks until `shutdown` is raised. The flag is checked between ticks
    /// and while idling, so an in-flight tick always finishes.
    pub fn run_until(&self, shutdown: &AtomicBool) {
        let period = self.settings.config.tick();
        while !shutdown.load(Ordering::SeqCst) {
            if let Err(err) = self.tick() {
                logging::log(&format!("Tick failed: {err:#}"));
            }

            let mut idle = Duration::ZERO;
            while idle < period {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                let step = SHUTDOWN_POLL.min(period - idle);
                self.clock.pause(step);
                idle += step;
            }
        }
    }
}
