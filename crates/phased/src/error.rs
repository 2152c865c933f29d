//! Error taxonomy for orchestrated runs.
//!
//! Every variant maps to a process exit code and tells the operator whether
//! re-invoking resumes, needs intervention first, or restarts.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the state store, resolver and orchestrator
#[derive(Debug, Error)]
pub enum PhaseError {
    /// A unit's preconditions are not met; the unit was not marked failed
    #[error("unit '{unit}' precondition failed: {condition}")]
    PreconditionFailed { unit: String, condition: String },

    /// A step inside a unit's run raised
    #[error("unit '{unit}' failed at step '{step}': {message}")]
    StepFailed {
        unit: String,
        step: String,
        message: String,
    },

    /// A state record exists but cannot be parsed
    #[error("corrupt state record {}: {message}", .path.display())]
    CorruptState { path: PathBuf, message: String },

    /// Creating or switching to the service identity failed
    #[error("privilege transfer failed: {message}")]
    PrivilegeTransferFailed { message: String },

    /// The run was invoked as the superuser
    #[error("refusing to run as the superuser; invoke as an unprivileged operator account")]
    SuperuserRefused,

    /// Applying shared-access ACL entries failed
    #[error("permission grant failed on {}: {message}", .path.display())]
    PermissionGrantFailed { path: PathBuf, message: String },

    /// Another run holds the state directory lock
    #[error("state directory is locked by another run: {}", .path.display())]
    StateLocked { path: PathBuf },

    /// `only_unit` or a reset named a unit not in the plan
    #[error("unknown unit: {id}")]
    UnknownUnit { id: String },

    /// Unit ids collide, ordinals are out of order, or an id is unusable
    #[error("invalid unit plan: {message}")]
    InvalidPlan { message: String },

    /// An exclusion list line could not be parsed
    #[error("invalid exclusion token on line {line}: {message}")]
    InvalidExclusion { line: usize, message: String },

    /// IO error
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serializing a record failed
    #[error("failed to serialize {what}: {message}")]
    Serialize { what: String, message: String },
}

impl PhaseError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PreconditionFailed { .. } | Self::SuperuserRefused => 2,
            Self::StepFailed { .. } | Self::PermissionGrantFailed { .. } => 3,
            Self::CorruptState { .. } => 4,
            Self::PrivilegeTransferFailed { .. } => 5,
            Self::StateLocked { .. } => 6,
            _ => 1,
        }
    }

    /// What happens if the operator simply invokes the run again
    pub fn resume_hint(&self) -> String {
        match self {
            Self::PreconditionFailed { .. } => {
                "fix the unmet condition and re-run; the unit will start from its first pending step"
                    .to_string()
            }
            Self::StepFailed { step, .. } => {
                format!("re-running resumes this unit at step '{step}'")
            }
            Self::CorruptState { path, .. } => format!(
                "inspect or remove {} to restart that unit; re-running as-is will fail again",
                path.display()
            ),
            Self::PrivilegeTransferFailed { .. } => {
                "no unit ran; re-running starts the run from the beginning".to_string()
            }
            Self::SuperuserRefused => {
                "no unit ran; re-run from an unprivileged account with sudo rights".to_string()
            }
            Self::PermissionGrantFailed { .. } => {
                "re-running resumes at the failed grant; grants are idempotent".to_string()
            }
            Self::StateLocked { .. } => {
                "wait for the other run to finish, then re-run".to_string()
            }
            Self::UnknownUnit { .. } | Self::InvalidPlan { .. } | Self::InvalidExclusion { .. } => {
                "correct the invocation and re-run".to_string()
            }
            Self::Io { .. } | Self::Serialize { .. } => {
                "re-running resumes from the last committed checkpoint".to_string()
            }
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, PhaseError>;
