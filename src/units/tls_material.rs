use anyhow::{Context, Result};
use phased::{StepFailure, Steps, Unit, UnitDescriptor, Unmet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::rc::Rc;

use super::Env;
use crate::catalog;

pub const DESCRIPTOR: UnitDescriptor = UnitDescriptor::new("tls_material", "TLS material", 3);
pub const FEATURE: &str = catalog::TLS_SELFSIGNED;

/// Group bits double as the ACL mask, which must let the container uid read
const KEY_MODE: u32 = 0o640;

/// Generates a self-signed certificate unless the operator supplied one
pub struct TlsMaterial(pub Rc<Env>);

impl TlsMaterial {
    fn staging_dir(&self) -> PathBuf {
        self.0.config.paths.tls_dir().join("staging")
    }

    fn provided(&self) -> bool {
        let paths = &self.0.config.paths;
        paths.cert_file().is_file() && paths.key_file().is_file()
    }

    fn generate(&self) -> Result<()> {
        if self.provided() {
            log::info!("Using existing TLS material in {}", self.0.config.paths.tls_dir().display());
            return Ok(());
        }
        let staging = self.staging_dir();
        fs::create_dir_all(&staging)
            .with_context(|| format!("Could not create {}", staging.display()))?;
        let config = &self.0.config;
        self.0.tools.tls.generate(
            &config.tls_subject(),
            config.tls.days,
            &staging.join("cert.pem"),
            &staging.join("key.pem"),
        )
    }

    /// Move staged material into place. Each move is skipped once done, so an
    /// interrupted install can run again.
    fn install(&self) -> Result<()> {
        let paths = &self.0.config.paths;
        let staging = self.staging_dir();

        let cert = staging.join("cert.pem");
        if cert.exists() {
            fs::rename(&cert, paths.cert_file())
                .with_context(|| format!("Could not install {}", paths.cert_file().display()))?;
        }

        let key = staging.join("key.pem");
        if key.exists() {
            fs::set_permissions(&key, fs::Permissions::from_mode(KEY_MODE))
                .with_context(|| format!("Could not restrict {}", key.display()))?;
            fs::rename(&key, paths.key_file())
                .with_context(|| format!("Could not install {}", paths.key_file().display()))?;
        }

        if staging.exists() {
            fs::remove_dir(&staging)
                .with_context(|| format!("Could not remove {}", staging.display()))?;
        }
        Ok(())
    }
}

impl Unit for TlsMaterial {
    fn descriptor(&self) -> &UnitDescriptor {
        &DESCRIPTOR
    }

    fn feature(&self) -> Option<&str> {
        Some(FEATURE)
    }

    fn check_requirements(&self) -> Result<(), Unmet> {
        if self.provided() {
            return Ok(());
        }
        self.0.require_command("openssl")
    }

    fn run(&self, steps: &mut Steps<'_>) -> Result<(), StepFailure> {
        steps.step("generate_key_pair", || self.generate())?;
        steps.step("install_material", || self.install())
    }
}
