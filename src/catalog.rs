//! Optional capabilities an operator can exclude

use phased::{FeatureDescriptor, FeatureRegistry};

pub const TLS_SELFSIGNED: &str = "tls_selfsigned";
pub const THREAT_FEEDS: &str = "threat_feeds";
pub const IOC_ENRICHMENT: &str = "ioc_enrichment";
pub const WEB_UI: &str = "web_ui";
pub const MAIL_ALERTS: &str = "mail_alerts";
pub const METRICS_EXPORTER: &str = "metrics_exporter";

pub const FEATURES: &[FeatureDescriptor] = &[
    FeatureDescriptor {
        id: TLS_SELFSIGNED,
        category: "core",
        description: "Generate a self-signed certificate when no TLS material is provided",
    },
    FeatureDescriptor {
        id: THREAT_FEEDS,
        category: "threat_intel",
        description: "Subscribe the application to external threat feeds",
    },
    FeatureDescriptor {
        id: IOC_ENRICHMENT,
        category: "threat_intel",
        description: "Enrich indicators of compromise through lookup providers",
    },
    FeatureDescriptor {
        id: WEB_UI,
        category: "interface",
        description: "Serve the browser interface",
    },
    FeatureDescriptor {
        id: MAIL_ALERTS,
        category: "notifications",
        description: "Send alert notifications by mail",
    },
    FeatureDescriptor {
        id: METRICS_EXPORTER,
        category: "observability",
        description: "Expose a metrics endpoint for scraping",
    },
];

pub const fn registry() -> FeatureRegistry {
    FeatureRegistry::new(FEATURES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let mut ids: Vec<_> = FEATURES.iter().map(|f| f.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), FEATURES.len());
    }

    #[test]
    fn test_threat_intel_category() {
        let registry = registry();
        assert_eq!(registry.category_of(THREAT_FEEDS), Some("threat_intel"));
        assert_eq!(registry.category_of(IOC_ENRICHMENT), Some("threat_intel"));
        assert!(registry.has_category("observability"));
    }
}
