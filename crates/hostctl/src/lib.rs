//! # Hostctl
//!
//! Host-level plumbing for installers that must not run as root.
//!
//! - [`PrivilegeContextManager`]: creates the service identity once and
//!   re-executes the current invocation as it
//! - [`PermissionManager`]: grants several identities `rwx` on shared paths
//!   through POSIX ACLs, default entries and an explicit mask
//!
//! Both sit on a backend trait ([`AccountBackend`], [`AclBackend`]) so the
//! host can be replaced in tests.

pub mod acl;
pub mod error;
pub mod identity;

pub use acl::{
    AclBackend, AclPlan, GrantPolicy, PermissionGrant, PermissionManager, Perms, Principal,
    SetfaclBackend, plan,
};
pub use error::{HostError, Result};
pub use identity::{
    AccountBackend, Identity, PrivilegeContextManager, ServiceIdentity, SystemAccounts,
};
