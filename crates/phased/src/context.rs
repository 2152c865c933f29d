//! Provider traits for the orchestrator
//!
//! These traits keep the engine free of any particular account backend or
//! terminal UI.

use crate::error::{PhaseError, Result};
use crate::types::{UnitDescriptor, UnitState};

/// Guarantees the run executes under the service identity
///
/// Called once before any state is touched. Implementations either confirm
/// the current process already runs as the service identity, refuse outright
/// (superuser), or replace the process and never return on success.
pub trait PrivilegeGate {
    fn enter_service_context(&self) -> Result<()>;
}

/// Why a unit did not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A previous run completed it
    AlreadyCompleted,
    /// Its governing feature is excluded
    Excluded { feature: String },
}

/// Step-level progress inside a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    Started,
    Completed,
    /// Checkpointed by an earlier attempt, not re-executed
    AlreadyDone,
}

/// Receives unit and step events during a run
pub trait RunObserver {
    /// Called when a unit starts (or resumes) its run
    fn on_unit_start(&mut self, unit: &UnitDescriptor, resumed_steps: usize);

    /// Called when a unit is skipped without running
    fn on_unit_skipped(&mut self, unit: &UnitDescriptor, reason: &SkipReason);

    /// Called for every step transition
    fn on_step(&mut self, unit: &UnitDescriptor, step: &str, event: StepEvent);

    /// Called when a unit reaches `completed`
    fn on_unit_complete(&mut self, unit: &UnitDescriptor, state: &UnitState);

    /// Called when a unit aborts the run
    fn on_unit_failed(&mut self, unit: &UnitDescriptor, error: &PhaseError);
}

/// No-op observer
pub struct NoObserver;

impl RunObserver for NoObserver {
    fn on_unit_start(&mut self, _unit: &UnitDescriptor, _resumed_steps: usize) {}
    fn on_unit_skipped(&mut self, _unit: &UnitDescriptor, _reason: &SkipReason) {}
    fn on_step(&mut self, _unit: &UnitDescriptor, _step: &str, _event: StepEvent) {}
    fn on_unit_complete(&mut self, _unit: &UnitDescriptor, _state: &UnitState) {}
    fn on_unit_failed(&mut self, _unit: &UnitDescriptor, _error: &PhaseError) {}
}

/// Observer that writes `key=value` events to the `log` facade
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn on_unit_start(&mut self, unit: &UnitDescriptor, resumed_steps: usize) {
        log::info!(
            target: "phased::events",
            "event=unit_start unit={} ordinal={} resumed_steps={resumed_steps}",
            unit.id,
            unit.ordinal
        );
    }

    fn on_unit_skipped(&mut self, unit: &UnitDescriptor, reason: &SkipReason) {
        let reason = match reason {
            SkipReason::AlreadyCompleted => "already_completed".to_string(),
            SkipReason::Excluded { feature } => format!("excluded feature={feature}"),
        };
        log::info!(target: "phased::events", "event=unit_skipped unit={} reason={reason}", unit.id);
    }

    fn on_step(&mut self, unit: &UnitDescriptor, step: &str, event: StepEvent) {
        log::debug!(
            target: "phased::events",
            "event=step unit={} step={step} state={event:?}",
            unit.id
        );
    }

    fn on_unit_complete(&mut self, unit: &UnitDescriptor, state: &UnitState) {
        log::info!(
            target: "phased::events",
            "event=unit_complete unit={} steps={}",
            unit.id,
            state.completed_steps.len()
        );
    }

    fn on_unit_failed(&mut self, unit: &UnitDescriptor, error: &PhaseError) {
        log::error!(target: "phased::events", "event=unit_failed unit={} error={error}", unit.id);
    }
}
