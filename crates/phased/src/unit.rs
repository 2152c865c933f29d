//! The unit trait and its step-level checkpointing runner.
//!
//! A unit splits its work into named steps and runs each through
//! [`Steps::step`]. The runner records the step as `last_step` before it
//! starts and appends it to `completed_steps` once it succeeds, persisting
//! the record each time. A resumed unit therefore skips every step it
//! already finished and loses at most the step that was in flight.

use crate::context::{RunObserver, StepEvent};
use crate::store::StateStore;
use crate::types::{UnitDescriptor, UnitState};
use anyhow::anyhow;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

/// An unmet precondition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unmet {
    pub condition: String,
}

impl Unmet {
    pub fn new(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
        }
    }
}

impl fmt::Display for Unmet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.condition)
    }
}

/// A step raised, or its checkpoint could not be written
#[derive(Debug)]
pub struct StepFailure {
    pub step: String,
    pub source: anyhow::Error,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step '{}': {:#}", self.step, self.source)
    }
}

/// One ordered, checkpointable installation step
pub trait Unit {
    fn descriptor(&self) -> &UnitDescriptor;

    /// Feature whose exclusion turns this unit into a no-op
    fn feature(&self) -> Option<&str> {
        None
    }

    /// Validate preconditions without side effects
    fn check_requirements(&self) -> Result<(), Unmet> {
        Ok(())
    }

    /// Do the work, one [`Steps::step`] call per named step
    fn run(&self, steps: &mut Steps<'_>) -> Result<(), StepFailure>;
}

/// Step runner handed to [`Unit::run`]
pub struct Steps<'a> {
    store: &'a StateStore,
    state: &'a mut UnitState,
    unit: &'a UnitDescriptor,
    observer: &'a mut dyn RunObserver,
}

impl<'a> Steps<'a> {
    pub fn new(
        store: &'a StateStore,
        state: &'a mut UnitState,
        unit: &'a UnitDescriptor,
        observer: &'a mut dyn RunObserver,
    ) -> Self {
        Self {
            store,
            state,
            unit,
            observer,
        }
    }

    /// Run `f` as step `id` unless an earlier attempt already completed it
    pub fn step<F>(&mut self, id: &str, f: F) -> Result<(), StepFailure>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        if self.state.is_step_done(id) {
            log::debug!("{}: step {id} already done", self.unit.id);
            self.observer.on_step(self.unit, id, StepEvent::AlreadyDone);
            return Ok(());
        }

        self.state.last_step = Some(id.to_string());
        self.checkpoint(id)?;
        self.observer.on_step(self.unit, id, StepEvent::Started);

        f().map_err(|source| StepFailure {
            step: id.to_string(),
            source,
        })?;

        self.state.record_step(id);
        self.checkpoint(id)?;
        self.observer.on_step(self.unit, id, StepEvent::Completed);
        Ok(())
    }

    pub fn is_done(&self, id: &str) -> bool {
        self.state.is_step_done(id)
    }

    pub fn completed(&self) -> &[String] {
        &self.state.completed_steps
    }

    fn checkpoint(&self, id: &str) -> Result<(), StepFailure> {
        self.store.save(&*self.state).map_err(|e| StepFailure {
            step: id.to_string(),
            source: anyhow::Error::new(e).context("failed to checkpoint"),
        })
    }
}

/// Poll `is_ready` every `interval` until it reports ready or `timeout` elapses.
///
/// Check errors count as "not ready"; the last one is included when the
/// deadline expires. A timeout past what `Instant` can represent never expires.
pub fn wait_until<F>(timeout: Duration, interval: Duration, mut is_ready: F) -> anyhow::Result<()>
where
    F: FnMut() -> anyhow::Result<bool>,
{
    let deadline = Instant::now().checked_add(timeout);
    let mut last_error = None;

    loop {
        match is_ready() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                log::debug!("not ready yet: {e:#}");
                last_error = Some(e);
            }
        }

        let now = Instant::now();
        let pause = match deadline {
            Some(deadline) if now >= deadline => {
                let waited = timeout.as_secs();
                return Err(match last_error {
                    Some(e) => e.context(format!("deadline of {waited}s expired")),
                    None => anyhow!("deadline of {waited}s expired"),
                });
            }
            Some(deadline) => interval.min(deadline - now),
            None => interval,
        };
        thread::sleep(pause);
    }
}
