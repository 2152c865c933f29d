//! Atomic persistence of per-unit progress records.
//!
//! Layout under the run directory:
//!
//! ```text
//! <run_dir>/
//!   run.lock              advisory lock held for the whole run
//!   snapshot.toml         configuration captured at run start
//!   units/<unit_id>.toml  one UnitState per unit
//! ```
//!
//! Every write goes to a temp file beside its target, is fsynced, then
//! renamed over the target, so a reader never observes a partial record.

use crate::error::{PhaseError, Result};
use crate::types::{RunState, UnitState};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const UNITS_DIR: &str = "units";
const SNAPSHOT_FILE: &str = "snapshot.toml";
const LOCK_FILE: &str = "run.lock";
const RECORD_EXT: &str = "toml";

/// Run-scoped store of unit records
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

/// Exclusive hold on a run directory; released when dropped
#[derive(Debug)]
pub struct RunLock {
    _file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn units_dir(&self) -> PathBuf {
        self.root.join(UNITS_DIR)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    /// Path of a unit's record; rejects ids that are unsafe as file names
    pub fn unit_path(&self, unit_id: &str) -> Result<PathBuf> {
        validate_unit_id(unit_id)?;
        Ok(self
            .units_dir()
            .join(format!("{unit_id}.{RECORD_EXT}")))
    }

    /// Load a unit's record. `None` means the unit has not started.
    pub fn load(&self, unit_id: &str) -> Result<Option<UnitState>> {
        let path = self.unit_path(unit_id)?;
        let Some(content) = read_if_exists(&path)? else {
            return Ok(None);
        };

        let state: UnitState = toml::from_str(&content).map_err(|e| PhaseError::CorruptState {
            path: path.clone(),
            message: e.to_string(),
        })?;

        if state.unit_id != unit_id {
            return Err(PhaseError::CorruptState {
                path,
                message: format!(
                    "record belongs to unit '{}', expected '{unit_id}'",
                    state.unit_id
                ),
            });
        }

        log::debug!("Loaded state for {unit_id}: {}", state.status);
        Ok(Some(state))
    }

    /// Atomically persist a unit's record
    pub fn save(&self, state: &UnitState) -> Result<()> {
        let path = self.unit_path(&state.unit_id)?;
        let content = toml::to_string_pretty(state).map_err(|e| PhaseError::Serialize {
            what: format!("state for unit '{}'", state.unit_id),
            message: e.to_string(),
        })?;
        write_atomic(&path, content.as_bytes())?;
        log::trace!("Saved state for {} to {}", state.unit_id, path.display());
        Ok(())
    }

    /// Remove a unit's record so its next run starts from scratch.
    ///
    /// Returns whether a record existed.
    pub fn remove(&self, unit_id: &str) -> Result<bool> {
        let path = self.unit_path(unit_id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Removed state record {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PhaseError::io(
                format!("failed to remove {}", path.display()),
                e,
            )),
        }
    }

    /// Load every unit record in the run directory, keyed by unit id
    pub fn load_all(&self) -> Result<BTreeMap<String, UnitState>> {
        let dir = self.units_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(PhaseError::io(
                    format!("failed to read {}", dir.display()),
                    e,
                ));
            }
        };

        let mut units = BTreeMap::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| PhaseError::io(format!("failed to read {}", dir.display()), e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(state) = self.load(id)? {
                units.insert(id.to_string(), state);
            }
        }
        Ok(units)
    }

    /// Load the whole run: all unit records plus the configuration snapshot
    pub fn load_run<S: DeserializeOwned>(&self) -> Result<RunState<S>> {
        Ok(RunState {
            snapshot: self.load_snapshot()?,
            units: self.load_all()?,
        })
    }

    /// Atomically persist the configuration snapshot for this run
    pub fn save_snapshot<S: Serialize>(&self, snapshot: &S) -> Result<()> {
        let content = toml::to_string_pretty(snapshot).map_err(|e| PhaseError::Serialize {
            what: "configuration snapshot".to_string(),
            message: e.to_string(),
        })?;
        write_atomic(&self.snapshot_path(), content.as_bytes())
    }

    /// Load the configuration snapshot, if one was captured
    pub fn load_snapshot<S: DeserializeOwned>(&self) -> Result<Option<S>> {
        let path = self.snapshot_path();
        let Some(content) = read_if_exists(&path)? else {
            return Ok(None);
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|e| PhaseError::CorruptState {
                path,
                message: e.to_string(),
            })
    }

    /// Take the exclusive run lock without blocking.
    ///
    /// The lock file is never unlinked: removing a file another process still
    /// holds would let a third process lock a fresh inode at the same path.
    pub fn lock(&self) -> Result<RunLock> {
        fs::create_dir_all(&self.root).map_err(|e| {
            PhaseError::io(format!("failed to create {}", self.root.display()), e)
        })?;

        let path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| PhaseError::io(format!("failed to open {}", path.display()), e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(PhaseError::StateLocked { path });
        }

        log::debug!("Acquired run lock {}", path.display());
        Ok(RunLock { _file: file, path })
    }
}

/// Unit ids become file names; keep them to a conservative alphabet
fn validate_unit_id(unit_id: &str) -> Result<()> {
    let valid = !unit_id.is_empty()
        && unit_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(PhaseError::InvalidPlan {
            message: format!("unit id '{unit_id}' must match [a-z0-9_-]+"),
        })
    }
}

fn read_if_exists(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(PhaseError::CorruptState {
            path: path.to_path_buf(),
            message: "record is not valid UTF-8".to_string(),
        }),
        Err(e) => Err(PhaseError::io(
            format!("failed to read {}", path.display()),
            e,
        )),
    }
}

/// Write to a temp file in the target's directory, fsync, rename over the target
fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
    let parent = target.parent().ok_or_else(|| {
        PhaseError::io(
            format!("path has no parent: {}", target.display()),
            io::Error::new(io::ErrorKind::InvalidInput, "no parent directory"),
        )
    })?;
    fs::create_dir_all(parent)
        .map_err(|e| PhaseError::io(format!("failed to create {}", parent.display()), e))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
        PhaseError::io(format!("failed to create temp file in {}", parent.display()), e)
    })?;
    temp.write_all(data)
        .map_err(|e| PhaseError::io(format!("failed to write temp file for {}", target.display()), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| PhaseError::io(format!("failed to sync temp file for {}", target.display()), e))?;
    temp.persist(target).map_err(|e| {
        PhaseError::io(format!("failed to rename temp file to {}", target.display()), e.error)
    })?;
    Ok(())
}
