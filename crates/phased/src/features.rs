//! Optional feature catalog and operator exclusions.
//!
//! The operator supplies a newline-delimited exclusion list:
//!
//! ```text
//! # no feed subscriptions on this host
//! category:threat_intel
//! mail_alerts
//! ```
//!
//! Tokens are parsed once into [`ExclusionToken`] values; the resolver answers
//! [`ExclusionResolver::is_excluded`] from those sets without reparsing.

use crate::error::{PhaseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

const CATEGORY_PREFIX: &str = "category:";

/// An optional, independently excludable capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureDescriptor {
    pub id: &'static str,
    pub category: &'static str,
    pub description: &'static str,
}

/// Static catalog of known features
#[derive(Debug, Clone, Copy)]
pub struct FeatureRegistry {
    features: &'static [FeatureDescriptor],
}

impl FeatureRegistry {
    pub const fn new(features: &'static [FeatureDescriptor]) -> Self {
        Self { features }
    }

    pub fn get(&self, id: &str) -> Option<&'static FeatureDescriptor> {
        self.features.iter().find(|f| f.id == id)
    }

    pub fn category_of(&self, id: &str) -> Option<&'static str> {
        self.get(id).map(|f| f.category)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.features.iter().any(|f| f.category == category)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static FeatureDescriptor> {
        self.features.iter()
    }

    /// Distinct categories in catalog order
    pub fn categories(&self) -> Vec<&'static str> {
        let mut seen = Vec::new();
        for f in self.features {
            if !seen.contains(&f.category) {
                seen.push(f.category);
            }
        }
        seen
    }
}

/// One parsed exclusion token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExclusionToken {
    Feature(String),
    Category(String),
}

impl FromStr for ExclusionToken {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let token = s.trim();
        if token.is_empty() {
            return Err("empty token".to_string());
        }
        if token.chars().any(char::is_whitespace) {
            return Err(format!("'{token}' contains whitespace"));
        }
        match token.strip_prefix(CATEGORY_PREFIX) {
            Some("") => Err(format!("'{token}' is missing a category name")),
            Some(category) => Ok(Self::Category(category.to_string())),
            None => Ok(Self::Feature(token.to_string())),
        }
    }
}

impl fmt::Display for ExclusionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feature(id) => f.write_str(id),
            Self::Category(name) => write!(f, "{CATEGORY_PREFIX}{name}"),
        }
    }
}

/// Feature ids and categories disabled for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSet {
    #[serde(default)]
    feature_ids: BTreeSet<String>,
    #[serde(default)]
    category_ids: BTreeSet<String>,
}

impl ExclusionSet {
    /// Parse an exclusion list. Blank lines and `#` comments are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let token = line.parse::<ExclusionToken>().map_err(|message| {
                PhaseError::InvalidExclusion {
                    line: idx + 1,
                    message,
                }
            })?;
            tokens.push(token);
        }
        Ok(Self::from_tokens(tokens))
    }

    pub fn from_tokens(tokens: impl IntoIterator<Item = ExclusionToken>) -> Self {
        let mut set = Self::default();
        for token in tokens {
            match token {
                ExclusionToken::Feature(id) => {
                    set.feature_ids.insert(id);
                }
                ExclusionToken::Category(name) => {
                    set.category_ids.insert(name);
                }
            }
        }
        set
    }

    /// Union of two sets
    pub fn merge(self, other: Self) -> Self {
        Self::from_tokens(self.tokens().into_iter().chain(other.tokens()))
    }

    pub fn is_empty(&self) -> bool {
        self.feature_ids.is_empty() && self.category_ids.is_empty()
    }

    pub fn feature_ids(&self) -> &BTreeSet<String> {
        &self.feature_ids
    }

    pub fn category_ids(&self) -> &BTreeSet<String> {
        &self.category_ids
    }

    /// Tokens in a stable order: categories first, then features
    pub fn tokens(&self) -> Vec<ExclusionToken> {
        self.category_ids
            .iter()
            .cloned()
            .map(ExclusionToken::Category)
            .chain(self.feature_ids.iter().cloned().map(ExclusionToken::Feature))
            .collect()
    }
}

/// Answers whether a feature is disabled for this run
#[derive(Debug)]
pub struct ExclusionResolver {
    set: ExclusionSet,
    registry: FeatureRegistry,
    warned: Mutex<HashSet<String>>,
}

impl ExclusionResolver {
    pub fn new(set: ExclusionSet, registry: FeatureRegistry) -> Self {
        for id in set.feature_ids() {
            if !registry.contains(id) {
                log::warn!("Exclusion list names unknown feature '{id}'; excluding it by id");
            }
        }
        for category in set.category_ids() {
            if !registry.has_category(category) {
                log::warn!("Exclusion list names unknown category '{category}'; ignoring it");
            }
        }
        Self {
            set,
            registry,
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn set(&self) -> &ExclusionSet {
        &self.set
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    /// True iff the feature or its category is excluded.
    ///
    /// An id named in the set is excluded whether or not the registry knows
    /// it. Otherwise an unregistered id has no category and stays enabled;
    /// each one is warned about once.
    pub fn is_excluded(&self, feature_id: &str) -> bool {
        if self.set.feature_ids.contains(feature_id) {
            return true;
        }
        match self.registry.category_of(feature_id) {
            Some(category) => self.set.category_ids.contains(category),
            None => {
                self.warn_unknown(feature_id);
                false
            }
        }
    }

    fn warn_unknown(&self, feature_id: &str) {
        let first = self
            .warned
            .lock()
            .map(|mut warned| warned.insert(feature_id.to_string()))
            .unwrap_or(false);
        if first {
            log::warn!("Unknown feature '{feature_id}' is not in the catalog; treating it as enabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &[FeatureDescriptor] = &[
        FeatureDescriptor {
            id: "threat_feeds",
            category: "threat_intel",
            description: "Feed subscriptions",
        },
        FeatureDescriptor {
            id: "ioc_enrichment",
            category: "threat_intel",
            description: "Indicator enrichment",
        },
        FeatureDescriptor {
            id: "mail_alerts",
            category: "notifications",
            description: "Mail alerts",
        },
    ];

    fn resolver(text: &str) -> ExclusionResolver {
        ExclusionResolver::new(
            ExclusionSet::parse(text).unwrap(),
            FeatureRegistry::new(CATALOG),
        )
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!(
            "category:threat_intel".parse::<ExclusionToken>().unwrap(),
            ExclusionToken::Category("threat_intel".into())
        );
        assert_eq!(
            " mail_alerts ".parse::<ExclusionToken>().unwrap(),
            ExclusionToken::Feature("mail_alerts".into())
        );
        assert!("category:".parse::<ExclusionToken>().is_err());
        assert!("two words".parse::<ExclusionToken>().is_err());
    }

    #[test]
    fn test_parse_ignores_blank_and_comments() {
        let set = ExclusionSet::parse(
            "# header\n\ncategory:threat_intel  # trailing\n   \nmail_alerts\n",
        )
        .unwrap();
        assert!(set.category_ids().contains("threat_intel"));
        assert!(set.feature_ids().contains("mail_alerts"));
        assert_eq!(set.tokens().len(), 2);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = ExclusionSet::parse("mail_alerts\ncategory:\n").unwrap_err();
        assert!(matches!(err, PhaseError::InvalidExclusion { line: 2, .. }));
    }

    #[test]
    fn test_is_excluded_by_feature() {
        let r = resolver("mail_alerts");
        assert!(r.is_excluded("mail_alerts"));
        assert!(!r.is_excluded("threat_feeds"));
    }

    #[test]
    fn test_is_excluded_by_category() {
        let r = resolver("category:threat_intel");
        assert!(r.is_excluded("threat_feeds"));
        assert!(r.is_excluded("ioc_enrichment"));
        assert!(!r.is_excluded("mail_alerts"));
    }

    #[test]
    fn test_unknown_ids_fail_open() {
        let r = resolver("category:threat_intel");
        assert!(!r.is_excluded("future_feature"));
        assert!(!r.is_excluded("future_feature"));
        assert_eq!(r.warned.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_listed_unknown_id_is_excluded() {
        let r = ExclusionResolver::new(
            ExclusionSet::parse("future_feed\n").unwrap(),
            FeatureRegistry::new(&[]),
        );
        assert!(r.is_excluded("future_feed"));
        assert!(!r.is_excluded("other_feed"));
    }

    #[test]
    fn test_is_excluded_matches_definition_for_every_combination() {
        let tokens = [
            ExclusionToken::Feature("threat_feeds".into()),
            ExclusionToken::Feature("mail_alerts".into()),
            ExclusionToken::Category("threat_intel".into()),
            ExclusionToken::Category("notifications".into()),
        ];
        let registry = FeatureRegistry::new(CATALOG);

        for mask in 0u32..(1 << tokens.len()) {
            let chosen: Vec<_> = tokens
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, t)| t.clone())
                .collect();
            let set = ExclusionSet::from_tokens(chosen);
            let r = ExclusionResolver::new(set.clone(), registry);

            for f in CATALOG {
                let expected = set.feature_ids().contains(f.id)
                    || set.category_ids().contains(f.category);
                assert_eq!(r.is_excluded(f.id), expected, "mask={mask} feature={}", f.id);
            }
            assert!(!r.is_excluded("not_in_catalog"));
        }
    }

    #[test]
    fn test_merge_and_display() {
        let a = ExclusionSet::parse("mail_alerts").unwrap();
        let b = ExclusionSet::from_tokens([ExclusionToken::Category("threat_intel".into())]);
        let merged = a.merge(b);
        let rendered: Vec<String> = merged.tokens().iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["category:threat_intel", "mail_alerts"]);
    }

    #[test]
    fn test_registry_categories() {
        let registry = FeatureRegistry::new(CATALOG);
        assert_eq!(registry.categories(), vec!["threat_intel", "notifications"]);
        assert_eq!(registry.category_of("ioc_enrichment"), Some("threat_intel"));
        assert!(registry.category_of("nope").is_none());
    }
}
