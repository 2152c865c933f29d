//! Core types for unit sequencing and progress records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Static identity of an installation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitDescriptor {
    /// Stable identifier, also used as the state record file name
    pub id: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// Declared position in the run (strictly increasing across a plan)
    pub ordinal: u32,
}

impl UnitDescriptor {
    pub const fn new(id: &'static str, name: &'static str, ordinal: u32) -> Self {
        Self { id, name, ordinal }
    }
}

impl fmt::Display for UnitDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Lifecycle status of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Whether a re-run continues from the recorded steps instead of starting over
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::InProgress | Self::Failed)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure recorded on a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitError {
    /// Step that raised, if the failure happened inside one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Underlying error, including its cause chain
    pub message: String,
    /// What re-invoking will do
    pub resume: String,
    pub occurred_at: DateTime<Utc>,
}

/// Persisted progress of one unit
///
/// Field order matters for the TOML layout: scalar fields first, the step
/// list after them and the error table last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    pub unit_id: String,
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Ordered set of finished step ids
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<UnitError>,
}

impl UnitState {
    pub fn new(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            status: UnitStatus::NotStarted,
            last_step: None,
            started_at: None,
            finished_at: None,
            completed_steps: Vec::new(),
            error: None,
        }
    }

    /// Record for a unit gated off by an exclusion
    pub fn skipped(unit_id: &str) -> Self {
        let now = Utc::now();
        Self {
            status: UnitStatus::Skipped,
            started_at: Some(now),
            finished_at: Some(now),
            ..Self::new(unit_id)
        }
    }

    /// Replacement record for a new attempt.
    ///
    /// Only the step checkpoints of an interrupted or failed attempt carry
    /// over; everything else starts fresh.
    pub fn superseded(&self) -> Self {
        let mut next = Self::new(&self.unit_id);
        if self.status.is_resumable() {
            next.completed_steps = self.completed_steps.clone();
            next.last_step = self.last_step.clone();
        }
        next
    }

    pub fn begin(&mut self) {
        self.status = UnitStatus::InProgress;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.error = None;
    }

    pub fn complete(&mut self) {
        self.status = UnitStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.error = None;
    }

    pub fn fail(&mut self, error: UnitError) {
        self.status = UnitStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn is_step_done(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    /// Append a step to the completed set, keeping first-completion order
    pub fn record_step(&mut self, step: &str) {
        if !self.is_step_done(step) {
            self.completed_steps.push(step.to_string());
        }
    }
}

/// Every unit record for one target plus the configuration captured at run start
#[derive(Debug, Clone)]
pub struct RunState<S> {
    pub snapshot: Option<S>,
    pub units: BTreeMap<String, UnitState>,
}

impl<S> RunState<S> {
    pub fn unit(&self, id: &str) -> Option<&UnitState> {
        self.units.get(id)
    }
}

/// Final states of every unit attempted, in declared order
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub states: Vec<UnitState>,
}

impl RunResult {
    pub fn count(&self, status: UnitStatus) -> usize {
        self.states.iter().filter(|s| s.status == status).count()
    }

    pub fn state(&self, unit_id: &str) -> Option<&UnitState> {
        self.states.iter().find(|s| s.unit_id == unit_id)
    }
}
