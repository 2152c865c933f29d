//! The installation units, in declared order
//!
//! | ord | unit | governing feature |
//! |-----|------|-------------------|
//! | 1 | `system_packages` | |
//! | 2 | `data_layout` | |
//! | 3 | `tls_material` | `tls_selfsigned` |
//! | 4 | `app_config` | |
//! | 5 | `container_stack` | |
//! | 6 | `threat_feeds` | `threat_feeds` |
//! | 7 | `ioc_enrichment` | `ioc_enrichment` |

mod app_config;
mod container_stack;
mod data_layout;
mod enrichment;
mod system_packages;
mod threat_feeds;
mod tls_material;

use phased::{ExclusionResolver, Unit, UnitDescriptor, Unmet};
use std::rc::Rc;

use crate::collab::{ComposeProject, Toolkit};
use crate::config::InstallConfig;

/// Shared context every unit reads from
pub struct Env {
    pub config: InstallConfig,
    pub tools: Toolkit,
    pub resolver: Rc<ExclusionResolver>,
    /// Account the run executes as
    pub service_user: String,
    /// Human operator that started the run
    pub operator: String,
}

impl Env {
    fn require_command(&self, cmd: &str) -> Result<(), Unmet> {
        if (self.tools.which)(cmd) {
            Ok(())
        } else {
            Err(Unmet::new(format!("`{cmd}` not found on PATH")))
        }
    }

    fn require_healthy(&self) -> Result<(), Unmet> {
        let url = &self.config.containers.health_url;
        match self.tools.app.health() {
            Ok(true) => Ok(()),
            Ok(false) => Err(Unmet::new(format!("application at {url} reports unhealthy"))),
            Err(e) => Err(Unmet::new(format!("application at {url} unreachable: {e:#}"))),
        }
    }

    fn compose_project(&self) -> ComposeProject {
        ComposeProject {
            name: self.config.containers.project.clone(),
            file: self.config.paths.compose_file(),
        }
    }
}

/// A unit as listed by `rigger units`
pub struct Declared {
    pub descriptor: UnitDescriptor,
    pub feature: Option<&'static str>,
}

pub const DECLARED: [Declared; 7] = [
    Declared {
        descriptor: system_packages::DESCRIPTOR,
        feature: None,
    },
    Declared {
        descriptor: data_layout::DESCRIPTOR,
        feature: None,
    },
    Declared {
        descriptor: tls_material::DESCRIPTOR,
        feature: Some(tls_material::FEATURE),
    },
    Declared {
        descriptor: app_config::DESCRIPTOR,
        feature: None,
    },
    Declared {
        descriptor: container_stack::DESCRIPTOR,
        feature: None,
    },
    Declared {
        descriptor: threat_feeds::DESCRIPTOR,
        feature: Some(threat_feeds::FEATURE),
    },
    Declared {
        descriptor: enrichment::DESCRIPTOR,
        feature: Some(enrichment::FEATURE),
    },
];

pub fn is_declared(id: &str) -> bool {
    DECLARED.iter().any(|d| d.descriptor.id == id)
}

/// Every unit, in declared order
pub fn plan(env: &Rc<Env>) -> Vec<Box<dyn Unit>> {
    vec![
        Box::new(system_packages::SystemPackages(Rc::clone(env))),
        Box::new(data_layout::DataLayout(Rc::clone(env))),
        Box::new(tls_material::TlsMaterial(Rc::clone(env))),
        Box::new(app_config::AppConfig(Rc::clone(env))),
        Box::new(container_stack::ContainerStack(Rc::clone(env))),
        Box::new(threat_feeds::ThreatFeeds(Rc::clone(env))),
        Box::new(enrichment::IocEnrichment(Rc::clone(env))),
    ]
}

#[cfg(test)]
pub(crate) mod testkit;

#[cfg(test)]
mod tests {
    use super::testkit::{Fixture, GATE};
    use super::*;
    use phased::{Orchestrator, PhaseError, StateStore, UnitStatus};

    #[test]
    fn test_plan_matches_declared_order() {
        let fixture = Fixture::new("");
        let units = plan(&fixture.env);
        let ids: Vec<_> = units.iter().map(|u| u.descriptor().id).collect();
        let declared: Vec<_> = DECLARED.iter().map(|d| d.descriptor.id).collect();
        assert_eq!(ids, declared);

        for (unit, declared) in units.iter().zip(&DECLARED) {
            assert_eq!(unit.feature(), declared.feature);
        }
    }

    #[test]
    fn test_full_install() {
        let fixture = Fixture::new("");
        let store = StateStore::new(fixture.dir.path().join("state"));

        let result = Orchestrator::new(&store, &fixture.env.resolver, &GATE)
            .run(&plan(&fixture.env))
            .unwrap();

        assert_eq!(result.count(UnitStatus::Completed), 7);
        let calls = fixture.calls();
        assert!(calls.contains(&"apt:refresh".to_string()));
        assert!(calls.contains(&"compose:up".to_string()));
        assert!(calls.iter().any(|c| c.starts_with("api:feed ")));
        assert!(calls.contains(&"api:enrichment".to_string()));
    }

    #[test]
    fn test_threat_intel_excluded() {
        let fixture = Fixture::new("category:threat_intel\n");
        let store = StateStore::new(fixture.dir.path().join("state"));

        let result = Orchestrator::new(&store, &fixture.env.resolver, &GATE)
            .run(&plan(&fixture.env))
            .unwrap();

        assert_eq!(result.state("threat_feeds").unwrap().status, UnitStatus::Skipped);
        assert_eq!(result.state("ioc_enrichment").unwrap().status, UnitStatus::Skipped);
        assert_eq!(result.count(UnitStatus::Completed), 5);
        assert!(!fixture.calls().iter().any(|c| c.starts_with("api:")));
    }

    #[test]
    fn test_excluding_tls_without_material_fails_precondition() {
        let fixture = Fixture::new("tls_selfsigned\n");
        let store = StateStore::new(fixture.dir.path().join("state"));

        let failure = Orchestrator::new(&store, &fixture.env.resolver, &GATE)
            .run(&plan(&fixture.env))
            .unwrap_err();

        match &failure.error {
            PhaseError::PreconditionFailed { unit, condition } => {
                assert_eq!(unit, "app_config");
                assert!(condition.contains("TLS material"));
            }
            other => panic!("unexpected: {other}"),
        }
        assert!(store.load("app_config").unwrap().is_none());
        assert_eq!(
            store.load("tls_material").unwrap().unwrap().status,
            UnitStatus::Skipped
        );
    }
}
