use anyhow::{Context, Result};
use hostctl::{GrantPolicy, Perms, Principal};
use phased::{StepFailure, Steps, Unit, UnitDescriptor};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::Env;
use crate::runner;

pub const DESCRIPTOR: UnitDescriptor = UnitDescriptor::new("data_layout", "Data layout", 2);

/// Creates the install tree and opens the data directory to every writer
pub struct DataLayout(pub Rc<Env>);

impl DataLayout {
    fn directories(&self) -> [PathBuf; 4] {
        let paths = &self.0.config.paths;
        [
            paths.install_root(),
            paths.data_dir(),
            paths.log_dir(),
            paths.tls_dir(),
        ]
    }

    /// The service identity, the operator and the container runtime uid
    fn data_writers(&self) -> Vec<Principal> {
        let env = &self.0;
        let mut writers = vec![Principal::User(env.service_user.clone())];
        if env.operator != env.service_user {
            writers.push(Principal::User(env.operator.clone()));
        }
        writers.push(Principal::Uid(env.config.containers.runtime_uid));
        writers
    }

    fn log_readers(&self) -> Vec<Principal> {
        let env = &self.0;
        let mut readers = vec![Principal::User(env.service_user.clone())];
        if env.operator != env.service_user {
            readers.push(Principal::User(env.operator.clone()));
        }
        readers
    }

    fn grant(&self) -> Result<()> {
        let env = &self.0;
        let paths = &env.config.paths;
        env.tools.acl.grant_with_policy(
            &paths.data_dir(),
            &self.data_writers(),
            true,
            true,
            GrantPolicy::Required,
        )?;
        // The containers read the certificate and key through a read-only mount
        env.tools.acl.grant_perms(
            &paths.tls_dir(),
            &[Principal::Uid(env.config.containers.runtime_uid)],
            Perms::READ.union(Perms::EXECUTE),
            true,
            true,
        )?;
        env.tools.acl.grant_with_policy(
            &paths.log_dir(),
            &self.log_readers(),
            true,
            true,
            GrantPolicy::BestEffort,
        )?;
        Ok(())
    }
}

/// Create `dir`, falling back to `sudo install -d` where the service identity
/// cannot write the parent
fn create_dir(dir: &Path, owner: &str) -> Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            log::debug!("{} needs elevated creation: {e}", dir.display());
            let mut args: Vec<OsString> = ["-n", "install", "-d", "-o", owner, "-m", "0750"]
                .into_iter()
                .map(OsString::from)
                .collect();
            args.push(dir.as_os_str().to_owned());
            runner::run("sudo", &args)
        }
        Err(e) => Err(e).with_context(|| format!("Could not create {}", dir.display())),
    }
}

impl Unit for DataLayout {
    fn descriptor(&self) -> &UnitDescriptor {
        &DESCRIPTOR
    }

    fn run(&self, steps: &mut Steps<'_>) -> Result<(), StepFailure> {
        steps.step("create_directories", || {
            for dir in self.directories() {
                create_dir(&dir, &self.0.service_user)?;
            }
            Ok(())
        })?;
        steps.step("grant_shared_access", || self.grant())
    }
}
