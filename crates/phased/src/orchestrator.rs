//! Orchestrator - runs units in declared order with run-level resume
//!
//! For each unit:
//! 1. Load its record; `completed` units are skipped entirely
//! 2. Excluded units are recorded as `skipped` with no side effects
//! 3. `check_requirements()`; failure aborts without marking the unit failed
//! 4. `run()`; success marks `completed`, failure marks `failed` and aborts

use crate::context::{NoObserver, PrivilegeGate, RunObserver, SkipReason};
use crate::error::{PhaseError, Result};
use crate::features::ExclusionResolver;
use crate::store::{RunLock, StateStore};
use crate::types::{RunResult, UnitError, UnitState, UnitStatus};
use crate::unit::{Steps, Unit};
use chrono::Utc;
use std::collections::HashSet;
use thiserror::Error;

/// What to do with a completed record of a unit that is now excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExcludedUnitPolicy {
    /// Keep the `completed` record; the unit stays completed
    #[default]
    Preserve,
    /// Supersede it with a `skipped` record
    Reset,
}

/// Options for a run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run only this unit (isolated debugging)
    pub only_unit: Option<String>,
    pub excluded_policy: ExcludedUnitPolicy,
}

/// An aborted run: the states reached so far and the error that stopped it
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    pub states: Vec<UnitState>,
    #[source]
    pub error: PhaseError,
}

impl RunFailure {
    fn before_units(error: PhaseError) -> Self {
        Self {
            states: Vec::new(),
            error,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

/// Unit-level abort with the record that was last committed, if any
struct UnitAbort {
    state: Option<UnitState>,
    error: PhaseError,
}

impl From<PhaseError> for UnitAbort {
    fn from(error: PhaseError) -> Self {
        Self { state: None, error }
    }
}

/// Sequential unit runner
pub struct Orchestrator<'a> {
    store: &'a StateStore,
    resolver: &'a ExclusionResolver,
    gate: &'a dyn PrivilegeGate,
    options: RunOptions,
    held_lock: Option<&'a RunLock>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a StateStore,
        resolver: &'a ExclusionResolver,
        gate: &'a dyn PrivilegeGate,
    ) -> Self {
        Self {
            store,
            resolver,
            gate,
            options: RunOptions::default(),
            held_lock: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Run under a lock the caller already holds on this store
    pub fn with_lock(mut self, lock: &'a RunLock) -> Self {
        self.held_lock = Some(lock);
        self
    }

    /// Run without an observer
    pub fn run(&self, units: &[Box<dyn Unit>]) -> std::result::Result<RunResult, RunFailure> {
        self.run_observed(units, &mut NoObserver)
    }

    /// Run every unit in declared order, reporting events to `observer`
    pub fn run_observed(
        &self,
        units: &[Box<dyn Unit>],
        observer: &mut dyn RunObserver,
    ) -> std::result::Result<RunResult, RunFailure> {
        self.gate
            .enter_service_context()
            .map_err(RunFailure::before_units)?;

        validate_plan(units).map_err(RunFailure::before_units)?;
        let selected = self.select(units).map_err(RunFailure::before_units)?;

        let _own_lock = match self.held_lock {
            Some(lock) if lock.path().starts_with(self.store.root()) => None,
            _ => Some(self.store.lock().map_err(RunFailure::before_units)?),
        };
        log::info!(
            "Running {} unit(s) against {}",
            selected.len(),
            self.store.root().display()
        );

        let mut states = Vec::with_capacity(selected.len());
        for unit in selected {
            match self.run_unit(unit, observer) {
                Ok(state) => states.push(state),
                Err(abort) => {
                    if let Some(state) = abort.state {
                        states.push(state);
                    }
                    return Err(RunFailure {
                        states,
                        error: abort.error,
                    });
                }
            }
        }

        Ok(RunResult { states })
    }

    fn select<'u>(&self, units: &'u [Box<dyn Unit>]) -> Result<Vec<&'u dyn Unit>> {
        let Some(only) = &self.options.only_unit else {
            return Ok(units.iter().map(AsRef::as_ref).collect());
        };
        units
            .iter()
            .find(|u| u.descriptor().id == only)
            .map(|u| vec![u.as_ref()])
            .ok_or_else(|| PhaseError::UnknownUnit { id: only.clone() })
    }

    fn run_unit(
        &self,
        unit: &dyn Unit,
        observer: &mut dyn RunObserver,
    ) -> std::result::Result<UnitState, UnitAbort> {
        let desc = *unit.descriptor();
        let prior = self.store.load(desc.id)?;
        let excluded = unit
            .feature()
            .filter(|f| self.resolver.is_excluded(f))
            .map(ToString::to_string);

        if let Some(prior) = &prior
            && prior.status == UnitStatus::Completed
            && (excluded.is_none() || self.options.excluded_policy == ExcludedUnitPolicy::Preserve)
        {
            observer.on_unit_skipped(&desc, &SkipReason::AlreadyCompleted);
            return Ok(prior.clone());
        }

        if let Some(feature) = excluded {
            let state = UnitState::skipped(desc.id);
            self.store.save(&state)?;
            observer.on_unit_skipped(&desc, &SkipReason::Excluded { feature });
            return Ok(state);
        }

        unit.check_requirements()
            .map_err(|unmet| PhaseError::PreconditionFailed {
                unit: desc.id.to_string(),
                condition: unmet.condition,
            })
            .inspect_err(|e| observer.on_unit_failed(&desc, e))?;

        let mut state = prior.map_or_else(|| UnitState::new(desc.id), |p| p.superseded());
        state.begin();
        self.store.save(&state)?;
        observer.on_unit_start(&desc, state.completed_steps.len());

        let outcome = {
            let mut steps = Steps::new(self.store, &mut state, &desc, observer);
            unit.run(&mut steps)
        };

        match outcome {
            Ok(()) => {
                state.complete();
                self.store.save(&state).map_err(|error| UnitAbort {
                    state: Some(state.clone()),
                    error,
                })?;
                observer.on_unit_complete(&desc, &state);
                Ok(state)
            }
            Err(failure) => {
                let message = format!("{:#}", failure.source);
                let mut error = PhaseError::StepFailed {
                    unit: desc.id.to_string(),
                    step: failure.step.clone(),
                    message: message.clone(),
                };
                state.fail(UnitError {
                    step: Some(failure.step),
                    message,
                    resume: error.resume_hint(),
                    occurred_at: Utc::now(),
                });
                // The step checkpoints already on disk still resume correctly
                if let Err(save_error) = self.store.save(&state) {
                    log::error!("Could not record failure of {}: {save_error}", desc.id);
                    if let PhaseError::StepFailed { message, .. } = &mut error {
                        message.push_str(&format!(
                            " (the failure itself could not be recorded: {save_error})"
                        ));
                    }
                }
                observer.on_unit_failed(&desc, &error);
                Err(UnitAbort {
                    state: Some(state),
                    error,
                })
            }
        }
    }
}

/// Unit ids must be unique and ordinals strictly increasing
fn validate_plan(units: &[Box<dyn Unit>]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut last_ordinal = None;
    for unit in units {
        let desc = unit.descriptor();
        if !seen.insert(desc.id) {
            return Err(PhaseError::InvalidPlan {
                message: format!("duplicate unit id '{}'", desc.id),
            });
        }
        if last_ordinal.is_some_and(|last| desc.ordinal <= last) {
            return Err(PhaseError::InvalidPlan {
                message: format!(
                    "unit '{}' has ordinal {} which does not follow its predecessor",
                    desc.id, desc.ordinal
                ),
            });
        }
        last_ordinal = Some(desc.ordinal);
    }
    Ok(())
}
