//! `rigger install`
//!
//! 1. Switch to the service identity (creating it on first use)
//! 2. Capture the config and exclusion list into a snapshot, or reuse the
//!    recorded one with `--resume`
//! 3. Run every unit in order; completed units are skipped, an interrupted
//!    unit resumes at its first unfinished step

use anyhow::{Context as _, Result};
use phased::{
    ExclusionResolver, ExclusionSet, Orchestrator, PhaseError, RunFailure, RunLock, RunOptions,
    StateStore, UnitState, UnitStatus,
};
use std::path::Path;
use std::rc::Rc;

use crate::Context;
use crate::catalog;
use crate::cli::InstallArgs;
use crate::collab::Toolkit;
use crate::commands;
use crate::config::{self, InstallConfig, Snapshot};
use crate::paths;
use crate::progress::UiObserver;
use crate::ui;
use crate::units::{self, Env};

pub fn run(ctx: &Context, args: InstallArgs) -> Result<()> {
    // Bad input should surface before an account is created
    if !args.resume {
        read_inputs(&args)?;
    }

    let manager = commands::privilege_manager();
    let (identity, store) = commands::enter_service_context(&manager, &args.target.target)?;
    let operator = manager.operator().map_err(PhaseError::from)?;

    // One hold from snapshot capture to the last unit
    let lock = store.lock()?;
    let snapshot = if args.resume {
        resume_snapshot(&store, &lock, &args)?
    } else {
        capture_snapshot(&store, &lock, &args)?
    };

    let resolver = Rc::new(ExclusionResolver::new(
        snapshot.exclusions.clone(),
        catalog::registry(),
    ));
    let env = Rc::new(Env {
        tools: Toolkit::system(&snapshot.config),
        config: snapshot.config,
        resolver: Rc::clone(&resolver),
        service_user: identity.username,
        operator: operator.username,
    });
    let plan = units::plan(&env);

    if !ctx.quiet {
        ui::header(&format!("Installing target '{}'", args.target.target));
        ui::kv("Run records", &store.root().display().to_string());
        ui::kv("Operator", &env.operator);
        println!();
    }

    let options = RunOptions {
        only_unit: args.unit,
        excluded_policy: args.excluded_state.into(),
    };
    let mut observer = UiObserver::new(plan.len(), ctx.quiet);
    let outcome = Orchestrator::new(&store, &resolver, &manager)
        .with_options(options)
        .with_lock(&lock)
        .run_observed(&plan, &mut observer);

    match outcome {
        Ok(result) => {
            if !ctx.quiet {
                summary(&result.states);
                println!();
                ui::success(&format!(
                    "{} completed, {} skipped",
                    result.count(UnitStatus::Completed),
                    result.count(UnitStatus::Skipped)
                ));
            }
            Ok(())
        }
        Err(failure) => {
            if !ctx.quiet {
                summary(&failure.states);
                resume_point(&failure);
            }
            Err(failure.into())
        }
    }
}

/// Config plus the union of the exclusion file and `--exclude` flags
fn read_inputs(args: &InstallArgs) -> Result<(InstallConfig, ExclusionSet)> {
    let (config, source) = InstallConfig::resolve(args.config.as_deref())?;
    if let Some(source) = source {
        log::debug!("Loaded config from {}", source.display());
    }

    let file_set = match &args.exclude_file {
        Some(path) => config::load_exclusions(path)?,
        None => {
            let default = paths::default_exclusion_file()?;
            if default.exists() {
                config::load_exclusions(&default)?
            } else {
                ExclusionSet::default()
            }
        }
    };
    let flag_set = ExclusionSet::from_tokens(args.exclude.iter().cloned());
    Ok((config, file_set.merge(flag_set)))
}

fn capture_snapshot(store: &StateStore, _held: &RunLock, args: &InstallArgs) -> Result<Snapshot> {
    let (config, exclusions) = read_inputs(args)?;
    let snapshot = Snapshot::capture(config, exclusions)?;

    store
        .save_snapshot(&snapshot)
        .context("Could not record the run snapshot")?;
    log::info!("Captured run snapshot {}", &snapshot.digest[..12]);
    Ok(snapshot)
}

fn resume_snapshot(store: &StateStore, _held: &RunLock, args: &InstallArgs) -> Result<Snapshot> {
    let Some(snapshot) = store.load_snapshot::<Snapshot>()? else {
        return Err(PhaseError::PreconditionFailed {
            unit: "run".to_string(),
            condition: format!(
                "no snapshot at {}; start a fresh run without --resume",
                store.snapshot_path().display()
            ),
        }
        .into());
    };

    if !args.exclude.is_empty() || args.exclude_file.is_some() {
        ui::warn("Ignoring exclusion flags: --resume keeps the recorded exclusions");
    }
    warn_on_drift(&snapshot, args.config.as_deref());
    Ok(snapshot)
}

/// The on-disk config changing under a resumed run is reported, never applied
fn warn_on_drift(snapshot: &Snapshot, config: Option<&Path>) {
    match InstallConfig::resolve(config).and_then(|(current, _)| snapshot.drifted_from(&current))
    {
        Ok(true) => ui::warn(&format!(
            "Config changed since this run started ({}); continuing with the recorded one",
            snapshot.captured_at.format("%Y-%m-%d %H:%M UTC")
        )),
        Ok(false) => {}
        Err(e) => log::debug!("Could not compare config for drift: {e:#}"),
    }
}

fn summary(states: &[UnitState]) {
    if states.is_empty() {
        return;
    }
    ui::section("Summary");
    for state in states {
        println!(
            "  {} {} {}",
            ui::status_label(state.status),
            state.unit_id,
            if state.completed_steps.is_empty() {
                String::new()
            } else {
                format!("({} step(s))", state.completed_steps.len())
            }
        );
    }
}

/// What to do next is reported by `main` for every failure
fn resume_point(failure: &RunFailure) {
    if let Some(step) = failure.states.last().and_then(|s| s.last_step.as_deref()) {
        println!();
        ui::kv("Stopped at", step);
    }
}
