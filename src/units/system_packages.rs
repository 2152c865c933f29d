use phased::{StepFailure, Steps, Unit, UnitDescriptor, Unmet};
use std::rc::Rc;

use super::Env;

pub const DESCRIPTOR: UnitDescriptor = UnitDescriptor::new("system_packages", "System packages", 1);

/// Installs the host packages the rest of the run depends on
pub struct SystemPackages(pub Rc<Env>);

impl Unit for SystemPackages {
    fn descriptor(&self) -> &UnitDescriptor {
        &DESCRIPTOR
    }

    fn check_requirements(&self) -> Result<(), Unmet> {
        self.0.require_command("sudo")?;
        self.0.require_command("apt-get")
    }

    fn run(&self, steps: &mut Steps<'_>) -> Result<(), StepFailure> {
        let env = &self.0;
        steps.step("refresh_index", || env.tools.packages.refresh())?;
        steps.step("install_packages", || {
            env.tools.packages.install(&env.config.packages.install)
        })
    }
}
