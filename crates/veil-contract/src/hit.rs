use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Redacted identity preview attached to a discovery hit. The scan
/// collaborator is responsible for redaction; this engine never widens it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HitPreview {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub city: String,
}

/// One candidate exposure produced by the discovery collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerHit {
    pub broker: String,
    pub url: String,
    #[serde(default)]
    pub category: String,
    pub confidence: f64,
    #[serde(default)]
    pub why: Vec<String>,
    #[serde(default)]
    pub preview: HitPreview,
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl BrokerHit {
    /// Creates a minimal hit for a broker page at `url`.
    pub fn new(broker: impl Into<String>, url: impl Into<String>, confidence: f64) -> Self {
        Self {
            broker: broker.into(),
            url: url.into(),
            category: String::new(),
            confidence,
            why: Vec::new(),
            preview: HitPreview::default(),
            adapter: None,
            region: None,
            metadata: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BrokerHit;

    #[test]
    fn unit_hit_deserializes_with_defaults() {
        let hit: BrokerHit = serde_json::from_str(
            r#"{"broker":"Justdial","url":"https://justdial.com/x","confidence":0.9}"#,
        )
        .expect("parse hit");
        assert_eq!(hit.broker, "Justdial");
        assert!(hit.why.is_empty());
        assert!(hit.adapter.is_none());
    }
}
