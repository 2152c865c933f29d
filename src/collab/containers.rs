use anyhow::{Context, Result};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::runner;

/// One compose project on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProject {
    pub name: String,
    pub file: PathBuf,
}

/// One row of `docker compose ps`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerStatus {
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Health", default)]
    pub health: String,
}

impl ContainerStatus {
    /// Running, and healthy if the service defines a healthcheck
    pub fn is_ready(&self) -> bool {
        self.state == "running" && (self.health.is_empty() || self.health == "healthy")
    }
}

/// Container lifecycle for the application stack
pub trait ContainerRuntime {
    fn pull(&self, project: &ComposeProject) -> Result<()>;

    /// Start (or reconcile) every service in the background
    fn up(&self, project: &ComposeProject) -> Result<()>;

    fn ps(&self, project: &ComposeProject) -> Result<Vec<ContainerStatus>>;
}

/// The `docker compose` plugin
pub struct DockerCompose;

impl DockerCompose {
    fn args(project: &ComposeProject, action: &[&str]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "compose".into(),
            "--project-name".into(),
            project.name.clone().into(),
            "--file".into(),
            project.file.clone().into_os_string(),
        ];
        args.extend(action.iter().map(OsString::from));
        args
    }
}

impl ContainerRuntime for DockerCompose {
    fn pull(&self, project: &ComposeProject) -> Result<()> {
        runner::run("docker", &Self::args(project, &["pull", "--quiet"]))
    }

    fn up(&self, project: &ComposeProject) -> Result<()> {
        runner::run(
            "docker",
            &Self::args(project, &["up", "--detach", "--remove-orphans"]),
        )
    }

    fn ps(&self, project: &ComposeProject) -> Result<Vec<ContainerStatus>> {
        let output = runner::run_capture(
            "docker",
            &Self::args(project, &["ps", "--all", "--format", "json"]),
        )?;
        parse_ps(&output)
    }
}

/// Compose v2 prints either a JSON array or one object per line
fn parse_ps(output: &str) -> Result<Vec<ContainerStatus>> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(Vec::new());
    }
    if output.starts_with('[') {
        return serde_json::from_str(output).context("Invalid `docker compose ps` output");
    }
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).context("Invalid `docker compose ps` line"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps_lines() {
        let output = r#"{"Service":"app","State":"running","Health":"healthy","Name":"rigger-app-1"}
{"Service":"worker","State":"running","Health":""}
{"Service":"db","State":"restarting","Health":"starting"}"#;
        let rows = parse_ps(output).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ready());
        assert!(rows[1].is_ready());
        assert!(!rows[2].is_ready());
    }

    #[test]
    fn test_parse_ps_array() {
        let output = r#"[{"Service":"app","State":"running"}]"#;
        let rows = parse_ps(output).unwrap();
        assert_eq!(rows[0].service, "app");
        assert!(rows[0].health.is_empty());
    }

    #[test]
    fn test_parse_ps_empty() {
        assert!(parse_ps("\n").unwrap().is_empty());
    }

    #[test]
    fn test_unhealthy_is_not_ready() {
        let row = ContainerStatus {
            service: "app".into(),
            state: "running".into(),
            health: "unhealthy".into(),
        };
        assert!(!row.is_ready());
    }

    #[test]
    fn test_compose_args() {
        let project = ComposeProject {
            name: "rigger".into(),
            file: PathBuf::from("/opt/rigger/docker-compose.yml"),
        };
        let args = DockerCompose::args(&project, &["up", "--detach"]);
        assert_eq!(
            args,
            [
                "compose",
                "--project-name",
                "rigger",
                "--file",
                "/opt/rigger/docker-compose.yml",
                "up",
                "--detach"
            ]
        );
    }
}
