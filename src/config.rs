//! Install configuration and the per-run snapshot
//!
//! A fresh run captures the operator's configuration and exclusion list into
//! a snapshot stored with the run records. `--resume` reuses that snapshot so
//! a resumed run never sees different inputs than the run it continues.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use phased::ExclusionSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

// ============================================================================
// Install Config
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    pub app: AppSection,
    pub paths: PathsSection,
    pub containers: ContainerSection,
    pub tls: TlsSection,
    pub packages: PackagesSection,
    pub feeds: FeedsSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub hostname: String,
    pub admin_email: String,
    /// Image tag to deploy
    pub release: String,
    /// Base URL of the application's REST API
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Verify the API certificate; off by default because the stack starts self-signed
    pub verify_tls: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            admin_email: "admin@localhost".to_string(),
            release: "latest".to_string(),
            api_url: "https://127.0.0.1".to_string(),
            api_token: None,
            verify_tls: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub install_root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            install_root: "/opt/rigger".to_string(),
            data_dir: None,
            log_dir: None,
        }
    }
}

impl PathsSection {
    pub fn install_root(&self) -> PathBuf {
        paths::expand(&self.install_root)
    }

    /// Shared data directory, written by the containers and by operators
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_deref()
            .map_or_else(|| self.install_root().join("data"), paths::expand)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .as_deref()
            .map_or_else(|| self.install_root().join("logs"), paths::expand)
    }

    pub fn tls_dir(&self) -> PathBuf {
        self.install_root().join("tls")
    }

    pub fn cert_file(&self) -> PathBuf {
        self.tls_dir().join("cert.pem")
    }

    pub fn key_file(&self) -> PathBuf {
        self.tls_dir().join("key.pem")
    }

    pub fn env_file(&self) -> PathBuf {
        self.install_root().join(".env")
    }

    pub fn compose_file(&self) -> PathBuf {
        self.install_root().join("docker-compose.yml")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSection {
    /// Compose project name
    pub project: String,
    pub image: String,
    /// Uid the application containers run as; it needs write access to the data dir
    pub runtime_uid: u32,
    pub health_url: String,
    pub startup_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            project: "rigger".to_string(),
            image: "ghcr.io/rigger-stack/sentinel".to_string(),
            runtime_uid: 1001,
            health_url: "https://127.0.0.1/health".to_string(),
            startup_timeout_secs: 30 * 60,
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSection {
    pub days: u32,
    /// openssl `-subj`; defaults to `/CN=<hostname>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            days: 365,
            subject: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagesSection {
    pub install: Vec<String>,
}

impl Default for PackagesSection {
    fn default() -> Self {
        Self {
            install: ["acl", "openssl", "curl", "docker.io", "docker-compose-v2"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsSection {
    pub urls: Vec<String>,
    pub refresh_hours: u32,
    pub enrichment_providers: Vec<String>,
}

impl Default for FeedsSection {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            refresh_hours: 24,
            enrichment_providers: Vec::new(),
        }
    }
}

impl InstallConfig {
    /// Load a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path` if given, else the default config file if it exists, else defaults
    pub fn resolve(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = path {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        let default = paths::default_config_file()?;
        if default.exists() {
            Ok((Self::load(&default)?, Some(default)))
        } else {
            log::info!(
                "No config at {}; using built-in defaults",
                default.display()
            );
            Ok((Self::default(), None))
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// blake3 digest of the canonical TOML form
    pub fn digest(&self) -> Result<String> {
        Ok(blake3::hash(self.to_toml()?.as_bytes()).to_hex().to_string())
    }

    /// openssl subject for the self-signed certificate
    pub fn tls_subject(&self) -> String {
        self.tls
            .subject
            .clone()
            .unwrap_or_else(|| format!("/CN={}", self.app.hostname))
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Inputs captured at the start of a fresh run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    /// Digest of `config` at capture time
    pub digest: String,
    #[serde(default)]
    pub exclusions: ExclusionSet,
    pub config: InstallConfig,
}

impl Snapshot {
    pub fn capture(config: InstallConfig, exclusions: ExclusionSet) -> Result<Self> {
        Ok(Self {
            captured_at: Utc::now(),
            digest: config.digest()?,
            exclusions,
            config,
        })
    }

    /// Whether `config` differs from the captured one
    pub fn drifted_from(&self, config: &InstallConfig) -> Result<bool> {
        Ok(config.digest()? != self.digest)
    }
}

/// Read an exclusion list file
pub fn load_exclusions(path: &Path) -> Result<ExclusionSet> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read exclusion list {}", path.display()))?;
    ExclusionSet::parse(&content)
        .with_context(|| format!("Invalid exclusion list {}", path.display()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(InstallConfig::parse("").unwrap(), InstallConfig::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = InstallConfig::parse(
            r#"
[app]
hostname = "intel.example.org"

[containers]
runtime_uid = 2000

[feeds]
urls = ["https://feeds.example.org/botnet.csv"]
"#,
        )
        .unwrap();

        assert_eq!(config.app.hostname, "intel.example.org");
        assert_eq!(config.app.release, "latest");
        assert_eq!(config.containers.runtime_uid, 2000);
        assert_eq!(config.containers.project, "rigger");
        assert_eq!(config.feeds.urls.len(), 1);
        assert_eq!(config.feeds.refresh_hours, 24);
        assert_eq!(config.tls_subject(), "/CN=intel.example.org");
    }

    #[test]
    fn test_unknown_field_type_is_error() {
        assert!(InstallConfig::parse("[containers]\nruntime_uid = \"root\"\n").is_err());
    }

    #[test]
    fn test_derived_paths() {
        let config = InstallConfig::parse("[paths]\ninstall_root = \"/srv/app\"\n").unwrap();
        assert_eq!(config.paths.data_dir(), PathBuf::from("/srv/app/data"));
        assert_eq!(config.paths.log_dir(), PathBuf::from("/srv/app/logs"));
        assert_eq!(config.paths.cert_file(), PathBuf::from("/srv/app/tls/cert.pem"));
        assert_eq!(
            config.paths.compose_file(),
            PathBuf::from("/srv/app/docker-compose.yml")
        );

        let config = InstallConfig::parse(
            "[paths]\ninstall_root = \"/srv/app\"\ndata_dir = \"/mnt/bulk\"\n",
        )
        .unwrap();
        assert_eq!(config.paths.data_dir(), PathBuf::from("/mnt/bulk"));
    }

    #[test]
    fn test_digest_ignores_formatting() {
        let a = InstallConfig::parse("[app]\nhostname = \"a\"\n").unwrap();
        let b = InstallConfig::parse("[app]\n  hostname    =   \"a\"   # same\n").unwrap();
        let c = InstallConfig::parse("[app]\nhostname = \"c\"\n").unwrap();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        assert_ne!(a.digest().unwrap(), c.digest().unwrap());
    }

    #[test]
    fn test_snapshot_round_trip_through_toml() {
        let config = InstallConfig::parse("[app]\napi_token = \"s3cret\"\n").unwrap();
        let exclusions = ExclusionSet::parse("category:threat_intel\nweb_ui\n").unwrap();
        let snapshot = Snapshot::capture(config.clone(), exclusions).unwrap();

        let text = toml::to_string_pretty(&snapshot).unwrap();
        let back: Snapshot = toml::from_str(&text).unwrap();
        assert_eq!(back, snapshot);
        assert!(!back.drifted_from(&config).unwrap());

        let mut changed = config;
        changed.app.hostname = "elsewhere".into();
        assert!(back.drifted_from(&changed).unwrap());
    }

    #[test]
    fn test_load_exclusions_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exclusions");
        fs::write(&path, "# optional bits\ncategory:threat_intel\n\nmail_alerts\n").unwrap();

        let set = load_exclusions(&path).unwrap();
        assert!(set.category_ids().contains("threat_intel"));
        assert!(set.feature_ids().contains("mail_alerts"));
    }

    #[test]
    fn test_load_exclusions_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exclusions");
        fs::write(&path, "web_ui\ncategory:\n").unwrap();

        let err = load_exclusions(&path).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }
}
