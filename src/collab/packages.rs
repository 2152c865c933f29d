use anyhow::Result;

use crate::runner;

const NONINTERACTIVE: &str = "DEBIAN_FRONTEND=noninteractive";

/// System package installation
pub trait PackageManager {
    /// Refresh the package index
    fn refresh(&self) -> Result<()>;

    /// Install packages; already-installed ones are left alone
    fn install(&self, packages: &[String]) -> Result<()>;
}

/// `apt-get` through non-interactive sudo
pub struct AptGet;

impl AptGet {
    fn install_args(packages: &[String]) -> Vec<&str> {
        let mut args = vec![
            "-n",
            "env",
            NONINTERACTIVE,
            "apt-get",
            "install",
            "-y",
            "--no-install-recommends",
        ];
        args.extend(packages.iter().map(String::as_str));
        args
    }
}

impl PackageManager for AptGet {
    fn refresh(&self) -> Result<()> {
        runner::run("sudo", &["-n", "env", NONINTERACTIVE, "apt-get", "update", "-q"])
    }

    fn install(&self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        log::info!("Installing packages: {}", packages.join(" "));
        runner::run("sudo", &Self::install_args(packages))
    }
}
