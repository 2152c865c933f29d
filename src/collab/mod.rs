//! Narrow interfaces to the host and the installed application
//!
//! Units only see these traits. The system implementations shell out through
//! [`crate::runner`] or talk HTTP; tests swap in recording fakes.

mod api;
mod containers;
mod packages;
mod template;
mod tls;

pub use api::{AppClient, HttpAppClient};
pub use containers::{ComposeProject, ContainerRuntime, ContainerStatus, DockerCompose};
pub use packages::{AptGet, PackageManager};
pub use template::{ConfigWriter, TemplateWriter, render};
pub use tls::{OpenSsl, TlsGenerator};

use crate::config::InstallConfig;
use hostctl::{AclBackend, PermissionManager, SetfaclBackend};

/// Everything a unit may touch
pub struct Toolkit {
    pub packages: Box<dyn PackageManager>,
    pub containers: Box<dyn ContainerRuntime>,
    pub tls: Box<dyn TlsGenerator>,
    pub writer: Box<dyn ConfigWriter>,
    pub app: Box<dyn AppClient>,
    pub acl: PermissionManager<Box<dyn AclBackend>>,
    /// Whether a program is on PATH
    pub which: fn(&str) -> bool,
}

impl Toolkit {
    /// Real implementations for this host
    pub fn system(config: &InstallConfig) -> Self {
        Self {
            packages: Box::new(AptGet),
            containers: Box::new(DockerCompose),
            tls: Box::new(OpenSsl),
            writer: Box::new(TemplateWriter),
            app: Box::new(HttpAppClient::new(&config.app, &config.containers.health_url)),
            acl: PermissionManager::new(Box::new(SetfaclBackend)),
            which: crate::runner::command_exists,
        }
    }
}
