use anyhow::Result;

use crate::commands::CommandReport;
use crate::memory::agent::AgentTarget;
use crate::memory::briefing::generate_briefing;
use crate::memory::runner::ProcessRunner;
use crate::memory::settings::Settings;
use crate::memory::telegram::{Notifier, TelegramNotifier};

fn notifier(settings: &Settings, report: &mut CommandReport) -> Option<TelegramNotifier> {
    match settings.registry.notification_target() {
        Some(target) => Some(TelegramNotifier::new(target.clone())),
        None => {
            report.issue(format!(
                "no telegram botToken/chatId configured in {}",
                settings.paths.registry_file.display()
            ));
            None
        }
    }
}

fn deliver(notifier: &dyn Notifier, text: &str, report: &mut CommandReport) {
    let sent = notifier.send(text);
    if sent.ok {
        report.detail(format!("sent {} characters", text.chars().count()));
    } else {
        report.issue(format!(
            "send failed: {}",
            sent.description.as_deref().unwrap_or("unknown error")
        ));
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotifySendOptions {
    pub text: String,
    pub parse_mode: Option<String>,
}

pub fn send(settings: &Settings, opts: &NotifySendOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("notify-send");
    if opts.text.trim().is_empty() {
        report.issue("message text is empty");
        return Ok(report);
    }
    let Some(mut notifier) = notifier(settings, &mut report) else {
        return Ok(report);
    };
    if let Some(mode) = &opts.parse_mode {
        notifier = notifier.with_parse_mode(mode.clone());
    }
    deliver(&notifier, &opts.text, &mut report);
    Ok(report)
}

/// Generates and sends a briefing right now, outside the daily schedule.
pub fn briefing(settings: &Settings) -> Result<CommandReport> {
    let mut report = CommandReport::new("notify-briefing");
    let Some(notifier) = notifier(settings, &mut report) else {
        return Ok(report);
    };
    let agent = match AgentTarget::resolve(settings) {
        Ok(agent) => agent,
        Err(err) => {
            report.issue(format!("{err:#}"));
            return Ok(report);
        }
    };

    match generate_briefing(
        &ProcessRunner::default(),
        &agent,
        &settings.paths.briefing_output,
        settings.config.briefing_timeout(),
    ) {
        Ok(text) => deliver(&notifier, &text, &mut report),
        Err(err) => report.issue(format!("{err:#}")),
    }
    Ok(report)
}
