//! Configuration-driven frontend for borg backup.
//!
//! Reads `<confdir>/config.yaml`, runs the selected tasks and prints a
//! summary on stderr. `sya list` prints archive names on stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use sya::core::outcome::RunOutcome;
use sya::exit_codes;
use sya::io::config::{DEFAULT_CONFDIR, load_config};
use sya::io::hooks::{HookRunner, ShellHookRunner};
use sya::io::process::CancelToken;
use sya::io::runner::{BorgRunner, CommandRunner, DryRunRunner};
use sya::logging;
use sya::model::Config;
use sya::orchestrate::{Orchestrator, RunEvent};
use sya::settings::RunSettings;

#[derive(Parser)]
#[command(name = "sya", version, about = "Run borg backup tasks from a configuration directory")]
struct Cli {
    /// Configuration directory holding config.yaml.
    #[arg(short = 'd', long, global = true, default_value = DEFAULT_CONFDIR)]
    confdir: PathBuf,

    /// Log what would run without running borg or hooks.
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    /// More output; repeat for debug.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Less output; once for errors only, twice for critical only.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    quiet: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Back up, then prune, the given tasks (all when none are named).
    Create {
        /// Show borg progress.
        #[arg(short, long)]
        progress: bool,
        tasks: Vec<String>,
    },
    /// Apply retention policies without backing up.
    Prune { tasks: Vec<String> },
    /// Check the repositories used by the given tasks.
    Check {
        /// Show borg progress.
        #[arg(short, long)]
        progress: bool,
        /// Treat ITEMS as repository names instead of task names.
        #[arg(short, long)]
        repositories: bool,
        items: Vec<String>,
    },
    /// Print the archives created by the given tasks.
    List { tasks: Vec<String> },
}

impl Command {
    fn progress(&self) -> bool {
        match self {
            Command::Create { progress, .. } | Command::Check { progress, .. } => *progress,
            Command::Prune { .. } | Command::List { .. } => false,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let config = load_config(&cli.confdir)?;
    let settings = RunSettings::from_config(&config, cli.verbose, cli.quiet, cli.dry_run)
        .with_progress(cli.command.progress());
    logging::init(settings.verbosity);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install Ctrl-C handler")?;

    let hooks = ShellHookRunner {
        workdir: settings.workdir.clone(),
        timeout: settings.hook_timeout,
        dry_run: settings.dry_run,
        cancel: cancel.clone(),
    };
    let outcome = if settings.dry_run {
        dispatch(&cli.command, &config, &settings, &DryRunRunner, &hooks, cancel)?
    } else {
        let runner = BorgRunner::new(cancel.clone());
        dispatch(&cli.command, &config, &settings, &runner, &hooks, cancel)?
    };

    for line in outcome.summary_lines() {
        eprintln!("{line}");
    }
    Ok(outcome.exit_code())
}

fn dispatch<R: CommandRunner, H: HookRunner>(
    command: &Command,
    config: &Config,
    settings: &RunSettings,
    runner: &R,
    hooks: &H,
    cancel: CancelToken,
) -> Result<RunOutcome> {
    let orchestrator = Orchestrator::new(config, settings, runner, hooks, cancel);
    let outcome = match command {
        Command::Create { tasks, .. } => orchestrator.run_create(tasks, |_| {})?,
        Command::Prune { tasks } => orchestrator.run_prune(tasks, |_| {})?,
        Command::Check {
            repositories,
            items,
            ..
        } => orchestrator.run_check(items, *repositories, |_| {})?,
        Command::List { tasks } => orchestrator.run_list(tasks, print_archive)?,
    };
    Ok(outcome)
}

fn print_archive(event: &RunEvent<'_>) {
    if let RunEvent::ArchiveListed { archive, .. } = event {
        println!("{archive}");
    }
}
