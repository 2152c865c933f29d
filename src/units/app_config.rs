use anyhow::Result;
use phased::{StepFailure, Steps, Unit, UnitDescriptor, Unmet};
use std::collections::BTreeMap;
use std::rc::Rc;

use super::Env;
use crate::catalog;

pub const DESCRIPTOR: UnitDescriptor = UnitDescriptor::new("app_config", "Application config", 4);

const ENV_TEMPLATE: &str = include_str!("../../templates/env.tmpl");
const COMPOSE_TEMPLATE: &str = include_str!("../../templates/compose.yml.tmpl");

/// Renders the environment file and the compose file
pub struct AppConfig(pub Rc<Env>);

impl AppConfig {
    fn vars(&self) -> BTreeMap<String, String> {
        let env = &self.0;
        let config = &env.config;
        let enabled = |feature: &str| (!env.resolver.is_excluded(feature)).to_string();

        [
            ("hostname", config.app.hostname.clone()),
            ("admin_email", config.app.admin_email.clone()),
            ("release", config.app.release.clone()),
            ("project", config.containers.project.clone()),
            ("image", config.containers.image.clone()),
            ("runtime_uid", config.containers.runtime_uid.to_string()),
            ("data_dir", config.paths.data_dir().display().to_string()),
            ("log_dir", config.paths.log_dir().display().to_string()),
            ("tls_dir", config.paths.tls_dir().display().to_string()),
            ("web_ui_enabled", enabled(catalog::WEB_UI)),
            ("mail_alerts_enabled", enabled(catalog::MAIL_ALERTS)),
            ("metrics_enabled", enabled(catalog::METRICS_EXPORTER)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn render(&self, template: &str, dest: &std::path::Path) -> Result<()> {
        self.0.tools.writer.write(template, &self.vars(), dest)
    }
}

impl Unit for AppConfig {
    fn descriptor(&self) -> &UnitDescriptor {
        &DESCRIPTOR
    }

    fn check_requirements(&self) -> Result<(), Unmet> {
        let paths = &self.0.config.paths;
        for file in [paths.cert_file(), paths.key_file()] {
            if !file.is_file() {
                return Err(Unmet::new(format!(
                    "TLS material missing at {}",
                    file.display()
                )));
            }
        }
        Ok(())
    }

    fn run(&self, steps: &mut Steps<'_>) -> Result<(), StepFailure> {
        let paths = &self.0.config.paths;
        steps.step("render_env", || self.render(ENV_TEMPLATE, &paths.env_file()))?;
        steps.step("render_compose", || {
            self.render(COMPOSE_TEMPLATE, &paths.compose_file())
        })
    }
}
