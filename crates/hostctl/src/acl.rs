//! Shared-path access via POSIX ACLs
//!
//! Several identities that do not trust each other's permission model need
//! write access to the same directory. One of them (a container runtime)
//! resets ownership on its own startup, so plain owner/group bits cannot be
//! relied on and world-writable bits are not an option.
//!
//! A grant sets a named entry per principal, the same entries as default
//! entries so new children inherit them, and an explicit mask equal to the
//! union of granted bits. Without the explicit mask the effective
//! permissions can stay narrower than the named entries. The `other` class
//! is never touched.

use crate::error::{HostError, Result};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Who an ACL entry applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Principal {
    User(String),
    Uid(u32),
    Group(String),
    Gid(u32),
}

impl Principal {
    fn validate(&self) -> Result<()> {
        let (Self::User(name) | Self::Group(name)) = self else {
            return Ok(());
        };
        let reason = if name.is_empty() {
            "empty name"
        } else if name.contains([':', ',']) || name.chars().any(char::is_whitespace) {
            "contains a separator or whitespace"
        } else {
            return Ok(());
        };
        Err(HostError::InvalidPrincipal {
            name: name.clone(),
            reason,
        })
    }

    /// `u:name` / `g:1000` qualifier as understood by setfacl
    fn qualifier(&self) -> String {
        match self {
            Self::User(name) => format!("u:{name}"),
            Self::Uid(uid) => format!("u:{uid}"),
            Self::Group(name) => format!("g:{name}"),
            Self::Gid(gid) => format!("g:{gid}"),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(name) => write!(f, "user {name}"),
            Self::Uid(uid) => write!(f, "uid {uid}"),
            Self::Group(name) => write!(f, "group {name}"),
            Self::Gid(gid) => write!(f, "gid {gid}"),
        }
    }
}

/// Read/write/execute bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Perms(u8);

impl Perms {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0b100);
    pub const WRITE: Self = Self(0b010);
    pub const EXECUTE: Self = Self(0b001);
    pub const RWX: Self = Self(0b111);

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::Display for Perms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |p: Self, c: char| if self.contains(p) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            bit(Self::READ, 'r'),
            bit(Self::WRITE, 'w'),
            bit(Self::EXECUTE, 'x')
        )
    }
}

/// One ACL action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    pub path: PathBuf,
    pub principal: Principal,
    pub perms: Perms,
    pub is_default: bool,
}

impl PermissionGrant {
    fn entry(&self) -> String {
        format!("{}:{}", self.principal.qualifier(), self.perms)
    }
}

/// Ordered grants for one path plus the masks that make them effective
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclPlan {
    pub path: PathBuf,
    pub grants: Vec<PermissionGrant>,
    pub mask: Perms,
    /// Present only when default entries are planned
    pub default_mask: Option<Perms>,
}

impl AclPlan {
    /// setfacl entries for the access ACL, mask last
    pub fn access_entries(&self) -> Vec<String> {
        self.entries(false, Some(self.mask))
    }

    /// setfacl entries for the default ACL, mask last
    pub fn default_entries(&self) -> Vec<String> {
        self.entries(true, self.default_mask)
    }

    fn entries(&self, default: bool, mask: Option<Perms>) -> Vec<String> {
        let mut entries: Vec<String> = self
            .grants
            .iter()
            .filter(|g| g.is_default == default)
            .map(PermissionGrant::entry)
            .collect();
        match mask {
            Some(mask) if !entries.is_empty() => entries.push(format!("m::{mask}")),
            _ => entries.clear(),
        }
        entries
    }
}

/// Plan the ACL entries giving `principals` the `perms` bits on `path`
pub fn plan(
    path: &Path,
    principals: &[Principal],
    perms: Perms,
    as_default: bool,
) -> Result<AclPlan> {
    let mut grants = Vec::with_capacity(principals.len() * 2);
    let mut mask = Perms::NONE;

    for principal in principals {
        principal.validate()?;
        if grants
            .iter()
            .any(|g: &PermissionGrant| !g.is_default && g.principal == *principal)
        {
            continue;
        }
        mask = mask.union(perms);
        grants.push(PermissionGrant {
            path: path.to_path_buf(),
            principal: principal.clone(),
            perms,
            is_default: false,
        });
    }

    if as_default {
        let defaults: Vec<_> = grants
            .iter()
            .map(|g| PermissionGrant {
                is_default: true,
                ..g.clone()
            })
            .collect();
        grants.extend(defaults);
    }

    Ok(AclPlan {
        path: path.to_path_buf(),
        grants,
        mask,
        default_mask: as_default.then_some(mask),
    })
}

/// Applies ACL entries to the filesystem
pub trait AclBackend {
    /// Merge `entries` into the access (or default) ACL of `path`
    fn modify(&self, path: &Path, entries: &[String], default: bool, recursive: bool)
        -> Result<()>;
}

/// Shells out to `setfacl`
#[derive(Debug, Default, Clone, Copy)]
pub struct SetfaclBackend;

impl SetfaclBackend {
    fn args(path: &Path, entries: &[String], default: bool, recursive: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if recursive {
            args.push("-R".into());
        }
        if default {
            args.push("-d".into());
        }
        args.push("-m".into());
        args.push(entries.join(",").into());
        args.push(path.as_os_str().to_owned());
        args
    }
}

impl AclBackend for SetfaclBackend {
    fn modify(
        &self,
        path: &Path,
        entries: &[String],
        default: bool,
        recursive: bool,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let args = Self::args(path, entries, default, recursive);
        log::debug!(
            "setfacl {}",
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let output = Command::new("setfacl")
            .args(&args)
            .output()
            .map_err(|e| HostError::GrantFailed {
                path: path.to_path_buf(),
                message: format!("failed to execute setfacl: {e}"),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(HostError::GrantFailed {
                path: path.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl<B: AclBackend + ?Sized> AclBackend for Box<B> {
    fn modify(
        &self,
        path: &Path,
        entries: &[String],
        default: bool,
        recursive: bool,
    ) -> Result<()> {
        (**self).modify(path, entries, default, recursive)
    }
}

/// How a unit treats a failed grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantPolicy {
    /// The failure aborts the step
    Required,
    /// The failure is logged and the step continues
    BestEffort,
}

/// Grants shared access on paths
pub struct PermissionManager<B = SetfaclBackend> {
    backend: B,
}

impl Default for PermissionManager<SetfaclBackend> {
    fn default() -> Self {
        Self::new(SetfaclBackend)
    }
}

impl<B: AclBackend> PermissionManager<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Give every principal `rwx` on `path`. Idempotent.
    pub fn grant(
        &self,
        path: &Path,
        principals: &[Principal],
        recursive: bool,
        as_default: bool,
    ) -> Result<AclPlan> {
        self.grant_perms(path, principals, Perms::RWX, recursive, as_default)
    }

    /// Give every principal `perms` on `path`. Idempotent.
    pub fn grant_perms(
        &self,
        path: &Path,
        principals: &[Principal],
        perms: Perms,
        recursive: bool,
        as_default: bool,
    ) -> Result<AclPlan> {
        if !path.exists() {
            return Err(HostError::GrantFailed {
                path: path.to_path_buf(),
                message: "path does not exist".into(),
            });
        }

        let plan = plan(path, principals, perms, as_default)?;
        if plan.grants.is_empty() {
            return Ok(plan);
        }

        self.backend
            .modify(path, &plan.access_entries(), false, recursive)?;
        if as_default {
            self.backend
                .modify(path, &plan.default_entries(), true, recursive)?;
        }

        log::info!(
            "Granted {} on {} to {}",
            perms,
            path.display(),
            principals
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(plan)
    }

    /// [`grant`](Self::grant) under a policy. Returns whether access was granted.
    pub fn grant_with_policy(
        &self,
        path: &Path,
        principals: &[Principal],
        recursive: bool,
        as_default: bool,
        policy: GrantPolicy,
    ) -> Result<bool> {
        match self.grant(path, principals, recursive, as_default) {
            Ok(_) => Ok(true),
            Err(e) if policy == GrantPolicy::BestEffort => {
                log::warn!("Shared access not granted (best effort): {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
