mod catalog;
mod cli;
mod collab;
mod commands;
mod config;
mod paths;
mod progress;
mod runner;
mod ui;
mod units;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use phased::PhaseError;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .parse_default_env()
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    if let Err(err) = dispatch(&ctx, cli.command) {
        report(&err);
        std::process::exit(exit_code(&err));
    }
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Install(args) => commands::install::run(ctx, args),
        Command::Status(args) => commands::status::run(ctx, &args.target),
        Command::Reset { unit, target } => commands::reset::run(ctx, &unit, &target.target),
        Command::Features => commands::listing::features(),
        Command::Units => commands::listing::units(),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "rigger", &mut io::stdout());
            Ok(())
        }
    }
}

/// The engine error behind `err`, if any
fn phase_error(err: &anyhow::Error) -> Option<&PhaseError> {
    err.chain().find_map(|cause| cause.downcast_ref::<PhaseError>())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    phase_error(err).map_or(1, PhaseError::exit_code)
}

/// The failure line, and for engine errors what re-running will do
fn describe_failure(err: &anyhow::Error) -> (String, Option<String>) {
    match phase_error(err) {
        Some(phase) => (phase.to_string(), Some(phase.resume_hint())),
        None => (format!("{err:#}"), None),
    }
}

/// Printed even under `-q`
fn report(err: &anyhow::Error) {
    let (message, hint) = describe_failure(err);
    ui::error(&message);
    if let Some(hint) = hint {
        ui::hint(&hint);
    }
}
