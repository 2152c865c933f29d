//! Centralized path resolution for rigger
//!
//! # Environment Variables
//!
//! - `RIGGER_CONFIG_DIR` - Override config directory
//! - `RIGGER_STATE_DIR` - Override state directory (run records live here)
//!
//! Both survive the switch to the service identity, as does `RUST_LOG`.
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `RIGGER_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/rigger` (if set)
//! 3. `~/.config/rigger`
//!
//! For state_dir():
//! 1. `RIGGER_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/rigger` (if set)
//! 3. `~/.local/state/rigger`
//!
//! After the switch `HOME` is the service identity's home, so the default
//! state directory belongs to the service identity.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "RIGGER_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "RIGGER_STATE_DIR";

/// Variables carried across the identity switch
pub const PRESERVED_ENV: [&str; 3] = [ENV_CONFIG_DIR, ENV_STATE_DIR, "RUST_LOG"];

/// Service identity all installation work runs as
pub const SERVICE_USER: &str = "rigger";

/// Home directory of the service identity
pub const SERVICE_HOME: &str = "/var/lib/rigger";

/// Installation target used when `--target` is not given
pub const DEFAULT_TARGET: &str = "default";

/// Get the rigger config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("rigger");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("rigger");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the rigger state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("rigger");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("rigger");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Run-scoped directory for one installation target
pub fn run_dir(target: &str) -> Result<PathBuf> {
    validate_target(target)?;
    Ok(state_dir()?.join("runs").join(target))
}

/// Default install config: `<config_dir>/install.toml`
pub fn default_config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("install.toml"))
}

/// Default exclusion list: `<config_dir>/exclusions`
pub fn default_exclusion_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("exclusions"))
}

/// Fix the config directory for the rest of the process tree.
///
/// Once the process runs as the service identity `HOME` changes, so the
/// operator's config directory is exported before the switch.
pub fn pin_config_dir() -> Result<()> {
    if std::env::var_os(ENV_CONFIG_DIR).is_some() {
        return Ok(());
    }
    let dir = config_dir()?;
    // SAFETY: called from main before any other thread exists
    unsafe { std::env::set_var(ENV_CONFIG_DIR, &dir) };
    Ok(())
}

fn validate_target(target: &str) -> Result<()> {
    if target.is_empty()
        || !target
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        bail!("Invalid target name '{target}': use lowercase letters, digits, '-' and '_'");
    }
    Ok(())
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
