use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use veil_contract::ActionChannel;

pub const CAPABILITY_TABLE_SCHEMA_VERSION: u32 = 1;
pub const CAPABILITY_TABLE_FILE_NAME: &str = "controller-capabilities.json";

/// Controller id used when no adapter matches a hit.
pub const GENERIC_CONTROLLER_ID: &str = "generic";

/// Confidence floor applied when a controller has no capability entry.
const GENERIC_MIN_CONFIDENCE: f64 = 0.90;

fn capability_table_schema_version() -> u32 {
    CAPABILITY_TABLE_SCHEMA_VERSION
}

fn default_true() -> bool {
    true
}

fn default_min_confidence() -> f64 {
    0.84
}

fn default_followup_cadence_days() -> u32 {
    7
}

fn default_max_followups() -> u32 {
    3
}

fn default_allowed_channels() -> Vec<ActionChannel> {
    vec![ActionChannel::Email]
}

fn default_preferred_channel() -> ActionChannel {
    ActionChannel::Email
}

/// Per-controller capability declaration. Reference data, editable only by
/// operators through the capability table file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerCapability {
    pub controller_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default = "default_true")]
    pub can_auto_prepare: bool,
    #[serde(default)]
    pub can_auto_submit: bool,
    #[serde(default = "default_allowed_channels")]
    pub allowed_channels: Vec<ActionChannel>,
    #[serde(default = "default_preferred_channel")]
    pub preferred_channel: ActionChannel,
    #[serde(default = "default_min_confidence")]
    pub default_min_confidence: f64,
    #[serde(default)]
    pub region_min_confidence: BTreeMap<String, f64>,
    #[serde(default)]
    pub threshold_high: Option<f64>,
    #[serde(default)]
    pub threshold_medium: Option<f64>,
    #[serde(default = "default_followup_cadence_days")]
    pub followup_cadence_days: u32,
    #[serde(default = "default_max_followups")]
    pub max_followups: u32,
}

impl ControllerCapability {
    /// Conservative entry used when a controller has no table row:
    /// email-only with a raised confidence floor, no auto-submit.
    pub fn generic() -> Self {
        Self {
            controller_id: GENERIC_CONTROLLER_ID.to_string(),
            display_name: "Generic controller".to_string(),
            domains: Vec::new(),
            can_auto_prepare: true,
            can_auto_submit: false,
            allowed_channels: vec![ActionChannel::Email],
            preferred_channel: ActionChannel::Email,
            default_min_confidence: GENERIC_MIN_CONFIDENCE,
            region_min_confidence: BTreeMap::new(),
            threshold_high: None,
            threshold_medium: None,
            followup_cadence_days: default_followup_cadence_days(),
            max_followups: default_max_followups(),
        }
    }
}

/// On-disk capability table shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityTableFile {
    #[serde(default = "capability_table_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub controllers: Vec<ControllerCapability>,
}

impl Default for CapabilityTableFile {
    fn default() -> Self {
        Self {
            schema_version: CAPABILITY_TABLE_SCHEMA_VERSION,
            allowed_domains: Vec::new(),
            controllers: Vec::new(),
        }
    }
}

/// Indexed capability table used by the resolver and candidate selector.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    controllers: BTreeMap<String, ControllerCapability>,
    allowed_domains: Vec<String>,
}

impl CapabilityTable {
    pub fn from_file(file: CapabilityTableFile) -> Result<Self> {
        validate_capability_table_file(&file)?;
        let mut controllers = BTreeMap::new();
        for capability in file.controllers {
            controllers.insert(capability.controller_id.clone(), capability);
        }
        Ok(Self {
            controllers,
            allowed_domains: file.allowed_domains,
        })
    }

    pub fn lookup(&self, controller_id: &str) -> Option<&ControllerCapability> {
        self.controllers.get(controller_id.trim())
    }

    /// Returns the controller whose declared domains match `url` by
    /// substring, in table order.
    pub fn lookup_by_domain(&self, url: &str) -> Option<&ControllerCapability> {
        let normalized = url.trim().to_ascii_lowercase();
        self.controllers.values().find(|capability| {
            capability
                .domains
                .iter()
                .any(|domain| normalized.contains(domain.trim().to_ascii_lowercase().as_str()))
        })
    }

    /// True when `url` lands on a domain eligible for automatic action:
    /// any controller's declared domain, or the table-level allow-list.
    pub fn is_url_allowlisted(&self, url: &str) -> bool {
        let normalized = url.trim().to_ascii_lowercase();
        if !(normalized.starts_with("http://") || normalized.starts_with("https://")) {
            return false;
        }
        self.controllers
            .values()
            .flat_map(|capability| capability.domains.iter())
            .chain(self.allowed_domains.iter())
            .any(|domain| {
                let domain = domain.trim().to_ascii_lowercase();
                !domain.is_empty() && normalized.contains(domain.as_str())
            })
    }

    pub fn controller_ids(&self) -> impl Iterator<Item = &str> {
        self.controllers.keys().map(String::as_str)
    }
}

/// Compiled-in capability table covering the controllers with first-party
/// adapters plus a small operator allow-list of directory domains.
pub fn builtin_capability_table() -> CapabilityTable {
    let file = CapabilityTableFile {
        schema_version: CAPABILITY_TABLE_SCHEMA_VERSION,
        allowed_domains: vec!["locanto.com".to_string(), "yellowpages.com".to_string()],
        controllers: vec![
            ControllerCapability {
                controller_id: "justdial".to_string(),
                display_name: "Justdial".to_string(),
                domains: vec!["justdial.com".to_string()],
                can_auto_prepare: true,
                can_auto_submit: true,
                allowed_channels: vec![ActionChannel::Webform, ActionChannel::Email],
                preferred_channel: ActionChannel::Webform,
                default_min_confidence: 0.84,
                region_min_confidence: BTreeMap::from([("IN".to_string(), 0.82)]),
                threshold_high: Some(0.90),
                threshold_medium: Some(0.82),
                followup_cadence_days: 7,
                max_followups: 3,
            },
            ControllerCapability {
                controller_id: "sulekha".to_string(),
                display_name: "Sulekha".to_string(),
                domains: vec!["sulekha.com".to_string()],
                can_auto_prepare: true,
                can_auto_submit: true,
                allowed_channels: vec![ActionChannel::Webform, ActionChannel::Email],
                preferred_channel: ActionChannel::Webform,
                default_min_confidence: 0.84,
                region_min_confidence: BTreeMap::new(),
                threshold_high: None,
                threshold_medium: None,
                followup_cadence_days: 10,
                max_followups: 2,
            },
            ControllerCapability {
                controller_id: "whitepages".to_string(),
                display_name: "Whitepages".to_string(),
                domains: vec!["whitepages.com".to_string()],
                can_auto_prepare: true,
                can_auto_submit: false,
                allowed_channels: vec![ActionChannel::Email, ActionChannel::Api],
                preferred_channel: ActionChannel::Email,
                default_min_confidence: 0.86,
                region_min_confidence: BTreeMap::new(),
                threshold_high: None,
                threshold_medium: None,
                followup_cadence_days: 14,
                max_followups: 2,
            },
        ],
    };
    CapabilityTable::from_file(file).unwrap_or_default()
}

/// Loads the capability table, falling back to the compiled-in table when the
/// file does not exist.
pub fn load_capability_table(path: &Path) -> Result<CapabilityTable> {
    if !path.exists() {
        return Ok(builtin_capability_table());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read capability table {}", path.display()))?;
    let file = serde_json::from_str::<CapabilityTableFile>(&raw)
        .with_context(|| format!("failed to parse capability table {}", path.display()))?;
    CapabilityTable::from_file(file)
        .with_context(|| format!("invalid capability table {}", path.display()))
}

fn validate_capability_table_file(file: &CapabilityTableFile) -> Result<()> {
    if file.schema_version != CAPABILITY_TABLE_SCHEMA_VERSION {
        bail!(
            "unsupported capability table schema_version {} (expected {})",
            file.schema_version,
            CAPABILITY_TABLE_SCHEMA_VERSION
        );
    }
    let mut seen = std::collections::HashSet::new();
    for capability in &file.controllers {
        let controller_id = capability.controller_id.trim();
        if controller_id.is_empty() {
            bail!("capability entry has empty controller_id");
        }
        if !seen.insert(controller_id.to_string()) {
            bail!("capability table contains duplicate controller_id '{controller_id}'");
        }
        if !(0.0..=1.0).contains(&capability.default_min_confidence) {
            bail!(
                "controller '{}' default_min_confidence {} outside [0,1]",
                controller_id,
                capability.default_min_confidence
            );
        }
        for (region, floor) in &capability.region_min_confidence {
            if !(0.0..=1.0).contains(floor) {
                bail!(
                    "controller '{}' region '{}' confidence {} outside [0,1]",
                    controller_id,
                    region,
                    floor
                );
            }
        }
        if capability.allowed_channels.is_empty() {
            bail!("controller '{controller_id}' must allow at least one channel");
        }
    }
    Ok(())
}
