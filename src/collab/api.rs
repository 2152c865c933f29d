use anyhow::{Context, Result};
use serde_json::json;
use std::time::Duration;

use crate::config::AppSection;

const USER_AGENT: &str = concat!("rigger/", env!("CARGO_PKG_VERSION"));

/// The installed application's REST API
pub trait AppClient {
    /// Whether the health endpoint answers with a success status
    fn health(&self) -> Result<bool>;

    /// Subscribe to a threat feed; re-registering an existing feed is a no-op
    fn configure_feed(&self, url: &str) -> Result<()>;

    fn schedule_feed_refresh(&self, every_hours: u32) -> Result<()>;

    fn configure_enrichment(&self, providers: &[String]) -> Result<()>;
}

/// JSON over HTTPS via `ureq`
pub struct HttpAppClient {
    agent: ureq::Agent,
    api_url: String,
    health_url: String,
    token: Option<String>,
}

impl HttpAppClient {
    pub fn new(app: &AppSection, health_url: &str) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .tls_config(
                ureq::tls::TlsConfig::builder()
                    .disable_verification(!app.verify_tls)
                    .build(),
            )
            .build();

        Self {
            agent: ureq::Agent::new_with_config(config),
            api_url: app.api_url.trim_end_matches('/').to_string(),
            health_url: health_url.to_string(),
            token: app.api_token.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.api_url, path.trim_start_matches('/'))
    }

    fn send(&self, method: &str, path: &str, body: &serde_json::Value) -> Result<()> {
        let url = self.endpoint(path);
        let request = match method {
            "PUT" => self.agent.put(&url),
            _ => self.agent.post(&url),
        };
        let request = request
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json");
        let request = match &self.token {
            Some(token) => request.header("Authorization", &format!("Bearer {token}")),
            None => request,
        };

        request
            .send_json(body)
            .with_context(|| format!("{method} {url} failed"))?;
        Ok(())
    }
}

impl AppClient for HttpAppClient {
    fn health(&self) -> Result<bool> {
        match self
            .agent
            .get(&self.health_url)
            .header("User-Agent", USER_AGENT)
            .call()
        {
            Ok(_) => Ok(true),
            Err(ureq::Error::StatusCode(code)) => {
                log::debug!("Health endpoint answered {code}");
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("GET {} failed", self.health_url)),
        }
    }

    fn configure_feed(&self, url: &str) -> Result<()> {
        self.send("PUT", "feeds", &json!({ "url": url, "enabled": true }))
    }

    fn schedule_feed_refresh(&self, every_hours: u32) -> Result<()> {
        self.send(
            "PUT",
            "settings/feeds",
            &json!({ "refresh_interval_hours": every_hours }),
        )
    }

    fn configure_enrichment(&self, providers: &[String]) -> Result<()> {
        self.send(
            "PUT",
            "settings/enrichment",
            &json!({ "enabled": true, "providers": providers }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_paths() {
        let app = AppSection {
            api_url: "https://intel.example.org/".into(),
            ..AppSection::default()
        };
        let client = HttpAppClient::new(&app, "https://intel.example.org/health");
        assert_eq!(
            client.endpoint("/feeds"),
            "https://intel.example.org/api/feeds"
        );
        assert_eq!(
            client.endpoint("settings/feeds"),
            "https://intel.example.org/api/settings/feeds"
        );
    }

    #[test]
    fn test_health_unreachable_is_error() {
        let client = HttpAppClient::new(&AppSection::default(), "http://127.0.0.1:9/health");
        assert!(client.health().is_err());
    }
}
