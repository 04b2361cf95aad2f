use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands;
use crate::memory::settings::Settings;

#[derive(Debug, Parser)]
#[command(name = "cursormemory")]
#[command(about = "Background distillation and daily briefings for cursormemory")]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(subcommand)]
    Daemon(DaemonCommand),
    /// Run one distill pass now.
    Distill,
    #[command(subcommand)]
    Notify(NotifyCommand),
    #[command(name = "_hook-save-memory", hide = true)]
    HookSaveMemory,
}

#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    Start(DaemonStartArgs),
    Stop,
    Status,
    #[command(hide = true)]
    Run,
    /// Register a login-time autostart service.
    Install,
    Uninstall,
}

#[derive(Debug, Args, Default)]
pub struct DaemonStartArgs {
    /// Hours between distill runs; persisted for later starts.
    #[arg(long)]
    pub interval: Option<f64>,
}

#[derive(Debug, Subcommand)]
pub enum NotifyCommand {
    /// Generate and send a briefing immediately.
    Briefing,
    Send(NotifySendArgs),
}

#[derive(Debug, Args)]
pub struct NotifySendArgs {
    pub text: String,
    #[arg(long)]
    pub parse_mode: Option<String>,
}

fn print_report(report: &commands::CommandReport, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("command: {}", report.command);
    println!("ok: {}", report.ok);
    if !report.details.is_empty() {
        println!("details:");
        for detail in &report.details {
            println!("- {detail}");
        }
    }
    if !report.issues.is_empty() {
        println!("issues:");
        for issue in &report.issues {
            println!("- {issue}");
        }
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Command::HookSaveMemory = cli.command {
        commands::hook_save_memory::run();
        return Ok(());
    }

    crate::env_loader::load_dotenv();
    let settings = Settings::load()?;

    let report = match &cli.command {
        Command::Daemon(DaemonCommand::Start(args)) => commands::daemon_start::run(
            &settings,
            &commands::daemon_start::DaemonStartOptions {
                interval_hours: args.interval,
            },
        )?,
        Command::Daemon(DaemonCommand::Stop) => commands::daemon_stop::run(&settings)?,
        Command::Daemon(DaemonCommand::Status) => commands::daemon_status::run(&settings)?,
        Command::Daemon(DaemonCommand::Run) => commands::daemon_run::run(&settings)?,
        Command::Daemon(DaemonCommand::Install) => commands::daemon_install::install(&settings)?,
        Command::Daemon(DaemonCommand::Uninstall) => commands::daemon_install::uninstall()?,
        Command::Distill => commands::distill::run(&settings)?,
        Command::Notify(NotifyCommand::Briefing) => commands::notify::briefing(&settings)?,
        Command::Notify(NotifyCommand::Send(args)) => commands::notify::send(
            &settings,
            &commands::notify::NotifySendOptions {
                text: args.text.clone(),
                parse_mode: args.parse_mode.clone(),
            },
        )?,
        Command::HookSaveMemory => return Ok(()),
    };

    print_report(&report, cli.json)?;

    if report.ok {
        Ok(())
    } else {
        std::process::exit(2);
    }
}
