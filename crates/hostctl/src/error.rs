//! Error types for host-level operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from account handling and ACL grants
#[derive(Debug, Error)]
pub enum HostError {
    #[error("refusing to run as the superuser; invoke as an operator with sudo rights")]
    Superuser,

    #[error("failed to look up account '{name}': {source}")]
    Lookup {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create service identity '{name}': {message}")]
    CreateFailed { name: String, message: String },

    #[error("could not switch to '{name}': {source}")]
    TransferFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("account '{name}' does not exist")]
    UnknownAccount { name: String },

    #[error("invalid principal '{name}': {reason}")]
    InvalidPrincipal { name: String, reason: &'static str },

    #[error("granting access on {path} failed: {message}")]
    GrantFailed { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, HostError>;

impl From<HostError> for phased::PhaseError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Superuser => Self::SuperuserRefused,
            HostError::GrantFailed { path, message } => {
                Self::PermissionGrantFailed { path, message }
            }
            other => Self::PrivilegeTransferFailed {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phased::PhaseError;

    #[test]
    fn test_superuser_maps_to_refusal() {
        let err: PhaseError = HostError::Superuser.into();
        assert!(matches!(err, PhaseError::SuperuserRefused));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_creation_failure_is_transfer_failure() {
        let err: PhaseError = HostError::CreateFailed {
            name: "rigger".into(),
            message: "useradd: permission denied".into(),
        }
        .into();
        match err {
            PhaseError::PrivilegeTransferFailed { message } => {
                assert!(message.contains("rigger"));
                assert!(message.contains("permission denied"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_grant_failure_keeps_path() {
        let err: PhaseError = HostError::GrantFailed {
            path: PathBuf::from("/srv/data"),
            message: "Operation not supported".into(),
        }
        .into();
        assert!(matches!(
            err,
            PhaseError::PermissionGrantFailed { ref path, .. } if path == &PathBuf::from("/srv/data")
        ));
    }
}
