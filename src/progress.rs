//! Terminal rendering of run events
//!
//! Every event is also forwarded to [`LogObserver`] so `-v` runs carry the
//! structured `key=value` trail alongside the human output.

use indicatif::{ProgressBar, ProgressStyle};
use phased::{LogObserver, PhaseError, RunObserver, SkipReason, StepEvent, UnitDescriptor, UnitState};
use std::time::Duration;

use crate::ui;

/// Renders unit headers and a spinner for the step in flight
pub struct UiObserver {
    total: usize,
    quiet: bool,
    spinner: Option<ProgressBar>,
    log: LogObserver,
}

impl UiObserver {
    pub fn new(total: usize, quiet: bool) -> Self {
        Self {
            total,
            quiet,
            spinner: None,
            log: LogObserver,
        }
    }

    fn spinner(&mut self, unit: &UnitDescriptor) -> Option<&ProgressBar> {
        if self.quiet {
            return None;
        }
        let name = unit.name;
        Some(self.spinner.get_or_insert_with(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("  {spinner:.green} {prefix:.dim} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_prefix(name);
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        }))
    }

    fn clear(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }
}

impl RunObserver for UiObserver {
    fn on_unit_start(&mut self, unit: &UnitDescriptor, resumed_steps: usize) {
        self.log.on_unit_start(unit, resumed_steps);
        if self.quiet {
            return;
        }
        if resumed_steps > 0 {
            ui::step(
                unit.ordinal,
                self.total,
                &format!("{} (resuming after {resumed_steps} step(s))", unit.name),
            );
        } else {
            ui::step(unit.ordinal, self.total, unit.name);
        }
    }

    fn on_unit_skipped(&mut self, unit: &UnitDescriptor, reason: &SkipReason) {
        self.log.on_unit_skipped(unit, reason);
        if self.quiet {
            return;
        }
        match reason {
            SkipReason::AlreadyCompleted => {
                ui::dim(&format!("{}: already completed", unit.name));
            }
            SkipReason::Excluded { feature } => {
                ui::dim(&format!("{}: skipped, feature '{feature}' excluded", unit.name));
            }
        }
    }

    fn on_step(&mut self, unit: &UnitDescriptor, step: &str, event: StepEvent) {
        self.log.on_step(unit, step, event);
        match event {
            StepEvent::Started => {
                if let Some(pb) = self.spinner(unit) {
                    pb.set_message(step.to_string());
                }
            }
            StepEvent::AlreadyDone => {
                if let Some(pb) = self.spinner(unit) {
                    pb.println(format!("  {step} already done"));
                }
            }
            StepEvent::Completed => {}
        }
    }

    fn on_unit_complete(&mut self, unit: &UnitDescriptor, state: &UnitState) {
        self.log.on_unit_complete(unit, state);
        self.clear();
        if !self.quiet {
            ui::success(&format!("{} completed", unit.name));
        }
    }

    fn on_unit_failed(&mut self, unit: &UnitDescriptor, error: &PhaseError) {
        self.log.on_unit_failed(unit, error);
        self.clear();
        ui::error(&format!("{}: {error}", unit.name));
    }
}
