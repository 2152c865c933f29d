// Installation
pub mod install;

// Run records
pub mod reset;
pub mod status;

// Static listings
pub mod listing;

use anyhow::Result;
use hostctl::{Identity, PrivilegeContextManager, ServiceIdentity};
use phased::{PhaseError, StateStore};

use crate::paths::{self, PRESERVED_ENV, SERVICE_HOME, SERVICE_USER};

/// Privilege manager for the real host
pub fn privilege_manager() -> PrivilegeContextManager {
    PrivilegeContextManager::system(ServiceIdentity::new(SERVICE_USER, SERVICE_HOME))
        .with_preserved_env(PRESERVED_ENV)
}

/// Switch to the service identity and open the target's run records.
///
/// Returns only once the process runs as the service identity; every path
/// derived afterwards (state dir, records) belongs to it.
pub fn enter_service_context(
    manager: &PrivilegeContextManager,
    target: &str,
) -> Result<(Identity, StateStore)> {
    paths::pin_config_dir()?;
    let identity = manager
        .enter_service_context()
        .map_err(PhaseError::from)?;
    log::debug!("Running as {} (uid {})", identity.username, identity.uid);
    Ok((identity, StateStore::new(paths::run_dir(target)?)))
}
