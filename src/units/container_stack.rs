use anyhow::{Result, bail};
use phased::{StepFailure, Steps, Unit, UnitDescriptor, Unmet, wait_until};
use std::rc::Rc;
use std::time::Duration;

use super::Env;

pub const DESCRIPTOR: UnitDescriptor =
    UnitDescriptor::new("container_stack", "Container stack", 5);

/// Pulls and starts the compose stack, then waits until the application is up
pub struct ContainerStack(pub Rc<Env>);

impl ContainerStack {
    /// Every container ready and the health endpoint answering
    fn is_healthy(&self) -> Result<bool> {
        let env = &self.0;
        let statuses = env.tools.containers.ps(&env.compose_project())?;
        if statuses.is_empty() {
            return Ok(false);
        }
        if let Some(pending) = statuses.iter().find(|s| !s.is_ready()) {
            log::debug!(
                "waiting for {} ({} {})",
                pending.service,
                pending.state,
                pending.health
            );
            return Ok(false);
        }
        env.tools.app.health()
    }

    fn await_healthy(&self) -> Result<()> {
        let containers = &self.0.config.containers;
        let timeout = Duration::from_secs(containers.startup_timeout_secs);
        let interval = Duration::from_secs(containers.poll_interval_secs.max(1));
        if timeout.is_zero() {
            bail!("startup_timeout_secs must be positive");
        }
        log::info!(
            "Waiting up to {}s for {}",
            timeout.as_secs(),
            containers.health_url
        );
        wait_until(timeout, interval, || self.is_healthy())
    }
}

impl Unit for ContainerStack {
    fn descriptor(&self) -> &UnitDescriptor {
        &DESCRIPTOR
    }

    fn check_requirements(&self) -> Result<(), Unmet> {
        self.0.require_command("docker")?;
        let compose = self.0.config.paths.compose_file();
        if !compose.is_file() {
            return Err(Unmet::new(format!(
                "compose file missing at {}",
                compose.display()
            )));
        }
        Ok(())
    }

    fn run(&self, steps: &mut Steps<'_>) -> Result<(), StepFailure> {
        let env = &self.0;
        let project = env.compose_project();
        steps.step("pull_images", || env.tools.containers.pull(&project))?;
        steps.step("start_stack", || env.tools.containers.up(&project))?;
        steps.step("await_healthy", || self.await_healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::testkit::Fixture;
    use phased::{NoObserver, StateStore, UnitState};
    use std::fs;

    fn run(fixture: &Fixture, state: &mut UnitState) -> Result<(), StepFailure> {
        let store = StateStore::new(fixture.dir.path().join("state"));
        let mut observer = NoObserver;
        ContainerStack(Rc::clone(&fixture.env))
            .run(&mut Steps::new(&store, state, &DESCRIPTOR, &mut observer))
    }

    #[test]
    fn test_requires_compose_file() {
        let fixture = Fixture::new("");
        let unit = ContainerStack(Rc::clone(&fixture.env));
        let unmet = unit.check_requirements().unwrap_err();
        assert!(unmet.condition.contains("docker-compose.yml"));

        fixture.create_layout();
        fs::write(fixture.env.config.paths.compose_file(), "services: {}\n").unwrap();
        assert!(unit.check_requirements().is_ok());
    }

    #[test]
    fn test_starts_and_waits() {
        let fixture = Fixture::new("");
        let mut state = UnitState::new(DESCRIPTOR.id);
        run(&fixture, &mut state).unwrap();

        assert_eq!(fixture.calls(), vec!["compose:pull", "compose:up"]);
        assert_eq!(
            state.completed_steps,
            vec!["pull_images", "start_stack", "await_healthy"]
        );
    }

    #[test]
    fn test_unhealthy_stack_times_out_and_resumes_at_wait() {
        let fixture = Fixture::new("");
        fixture.healthy.set(false);
        let mut state = UnitState::new(DESCRIPTOR.id);

        let failure = run(&fixture, &mut state).unwrap_err();
        assert_eq!(failure.step, "await_healthy");

        fixture.healthy.set(true);
        fixture.calls.borrow_mut().clear();
        run(&fixture, &mut state).unwrap();
        assert!(fixture.calls().is_empty());
    }
}
