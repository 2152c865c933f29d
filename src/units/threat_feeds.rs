use anyhow::Result;
use phased::{StepFailure, Steps, Unit, UnitDescriptor, Unmet};
use std::rc::Rc;

use super::Env;
use crate::catalog;

pub const DESCRIPTOR: UnitDescriptor = UnitDescriptor::new("threat_feeds", "Threat feeds", 6);
pub const FEATURE: &str = catalog::THREAT_FEEDS;

/// Subscribes the application to the configured feeds
pub struct ThreatFeeds(pub Rc<Env>);

impl ThreatFeeds {
    fn register(&self) -> Result<()> {
        let env = &self.0;
        let urls = &env.config.feeds.urls;
        if urls.is_empty() {
            log::warn!("No feed URLs configured; the application starts without feeds");
        }
        for url in urls {
            log::info!("Registering feed {url}");
            env.tools.app.configure_feed(url)?;
        }
        Ok(())
    }
}

impl Unit for ThreatFeeds {
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
        steps.step("register_feeds", || self.register())?;
        steps.step("schedule_refresh", || {
            env.tools
                .app
                .schedule_feed_refresh(env.config.feeds.refresh_hours)
        })
    }
}
