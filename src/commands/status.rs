use anyhow::Result;
use colored::Colorize;
use phased::{RunState, StateStore, UnitStatus};

use crate::Context;
use crate::commands;
use crate::config::Snapshot;
use crate::ui;
use crate::units::{DECLARED, is_declared};

pub fn run(ctx: &Context, target: &str) -> Result<()> {
    let manager = commands::privilege_manager();
    let (_, store) = commands::enter_service_context(&manager, target)?;
    let run = store.load_run::<Snapshot>()?;

    ui::header(&format!("Target '{target}'"));
    ui::kv("Run records", &store.root().display().to_string());
    show_snapshot(&run);
    show_units(ctx, &store, &run);
    Ok(())
}

fn show_snapshot(run: &RunState<Snapshot>) {
    let Some(snapshot) = &run.snapshot else {
        ui::kv("Snapshot", &"none (no run started)".dimmed().to_string());
        return;
    };
    ui::kv(
        "Captured",
        &snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    ui::kv("Config digest", &snapshot.digest[..12]);
    let tokens = snapshot.exclusions.tokens();
    if tokens.is_empty() {
        ui::kv("Exclusions", "none");
    } else {
        let joined: Vec<String> = tokens.iter().map(ToString::to_string).collect();
        ui::kv("Exclusions", &joined.join(", "));
    }
}

fn show_units(ctx: &Context, store: &StateStore, run: &RunState<Snapshot>) {
    ui::section("Units");

    for declared in &DECLARED {
        let id = declared.descriptor.id;
        let Some(state) = run.unit(id) else {
            println!("  {} {id}", ui::status_label(UnitStatus::NotStarted));
            continue;
        };

        let mut detail = String::new();
        if !state.completed_steps.is_empty() {
            detail = format!("{} step(s) done", state.completed_steps.len());
        }
        if state.status.is_resumable()
            && let Some(step) = &state.last_step
        {
            detail = format!("{detail}, last step {step}");
        }
        println!(
            "  {} {id} {}",
            ui::status_label(state.status),
            detail.dimmed()
        );

        if let Some(error) = &state.error {
            ui::dim(&format!("  error: {}", ui::truncate(&error.message, 100)));
            if ctx.verbose > 0 {
                ui::dim(&format!("  next: {}", error.resume));
            }
        }
    }

    for id in run.units.keys().filter(|id| !is_declared(id)) {
        let path = store
            .unit_path(id)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| id.clone());
        ui::warn(&format!("Stale record for unknown unit '{id}' at {path}"));
    }
}
