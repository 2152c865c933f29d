use phased::{StepFailure, Steps, Unit, UnitDescriptor, Unmet};
use std::rc::Rc;

use super::Env;
use crate::catalog;

pub const DESCRIPTOR: UnitDescriptor =
    UnitDescriptor::new("ioc_enrichment", "IOC enrichment", 7);
pub const FEATURE: &str = catalog::IOC_ENRICHMENT;

pub struct IocEnrichment(pub Rc<Env>);

impl Unit for IocEnrichment {
    fn descriptor(&self) -> &UnitDescriptor {
        &DESCRIPTOR
    }

    fn feature(&self) -> Option<&str> {
        Some(FEATURE)
    }

    fn check_requirements(&self) -> Result<(), Unmet> {
        self.0.require_healthy()
    }

    fn run(&self, steps: &mut Steps<'_>) -> Result<(), StepFailure> {
        let env = &self.0;
        steps.step("configure_enrichment", || {
            env.tools
                .app
                .configure_enrichment(&env.config.feeds.enrichment_providers)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::testkit::Fixture;
    use phased::{ExcludedUnitPolicy, Orchestrator, RunOptions, StateStore, UnitStatus};

    #[test]
    fn test_only_enrichment_excluded() {
        let fixture = Fixture::new("ioc_enrichment\n");
        let store = StateStore::new(fixture.dir.path().join("state"));
        let units: Vec<Box<dyn Unit>> = vec![Box::new(IocEnrichment(Rc::clone(&fixture.env)))];

        let result = Orchestrator::new(&store, &fixture.env.resolver, &crate::units::testkit::GATE)
            .with_options(RunOptions {
                only_unit: None,
                excluded_policy: ExcludedUnitPolicy::Preserve,
            })
            .run(&units)
            .unwrap();

        assert_eq!(result.state(DESCRIPTOR.id).unwrap().status, UnitStatus::Skipped);
        assert!(fixture.calls().is_empty());
    }
}
