use anyhow::Result;
use phased::PhaseError;

use crate::Context;
use crate::commands;
use crate::ui;
use crate::units;

/// `rigger reset <unit>`: the next run restarts the unit from its first step
pub fn run(ctx: &Context, unit: &str, target: &str) -> Result<()> {
    if !units::is_declared(unit) {
        return Err(PhaseError::UnknownUnit { id: unit.to_string() }.into());
    }

    let manager = commands::privilege_manager();
    let (_, store) = commands::enter_service_context(&manager, target)?;
    let _lock = store.lock()?;

    if store.remove(unit)? {
        if !ctx.quiet {
            ui::success(&format!("Removed the record for {unit}; it restarts on the next run"));
        }
    } else if !ctx.quiet {
        ui::info(&format!("{unit} has no record in target '{target}'"));
    }
    Ok(())
}
