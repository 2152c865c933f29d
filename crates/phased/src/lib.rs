//! # Phased
//!
//! Ordered, checkpointed installation units with run-level and step-level
//! resume.
//!
//! ## Core Concepts
//!
//! - **Unit**: one ordered installation phase with a requirement check and a
//!   run made of named steps
//! - **StateStore**: atomic per-unit progress records under a run directory
//! - **ExclusionResolver**: decides whether an optional feature is disabled
//! - **Orchestrator**: runs units in order, skipping completed ones and
//!   aborting on the first failure
//!
//! ## Example
//!
//! ```ignore
//! use phased::{Orchestrator, StateStore, Steps, StepFailure, Unit, UnitDescriptor};
//!
//! struct Layout;
//!
//! const LAYOUT: UnitDescriptor = UnitDescriptor::new("data_layout", "Data layout", 1);
//!
//! impl Unit for Layout {
//!     fn descriptor(&self) -> &UnitDescriptor { &LAYOUT }
//!
//!     fn run(&self, steps: &mut Steps<'_>) -> Result<(), StepFailure> {
//!         steps.step("create_directories", || Ok(std::fs::create_dir_all("/srv/app")?))?;
//!         steps.step("write_marker", || Ok(std::fs::write("/srv/app/.ok", "")?))
//!     }
//! }
//!
//! let store = StateStore::new("/var/lib/app/state");
//! let units: Vec<Box<dyn Unit>> = vec![Box::new(Layout)];
//! let result = Orchestrator::new(&store, &resolver, &gate).run(&units)?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`PrivilegeGate`]: confirms or establishes the service identity
//! - [`RunObserver`]: receives unit and step events

pub mod context;
pub mod error;
pub mod features;
pub mod orchestrator;
pub mod store;
pub mod types;
pub mod unit;

// Re-export main types at crate root
pub use context::{LogObserver, NoObserver, PrivilegeGate, RunObserver, SkipReason, StepEvent};
pub use error::{PhaseError, Result};
pub use features::{
    ExclusionResolver, ExclusionSet, ExclusionToken, FeatureDescriptor, FeatureRegistry,
};
pub use orchestrator::{ExcludedUnitPolicy, Orchestrator, RunFailure, RunOptions};
pub use store::{RunLock, StateStore};
pub use types::{RunResult, RunState, UnitDescriptor, UnitError, UnitState, UnitStatus};
pub use unit::{StepFailure, Steps, Unit, Unmet, wait_until};
