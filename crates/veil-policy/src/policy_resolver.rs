use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use veil_contract::ActionChannel;
use veil_core::write_text_atomic;

use crate::controller_capability::{CapabilityTable, ControllerCapability};

pub const OPERATOR_OVERRIDES_SCHEMA_VERSION: u32 = 1;
pub const OPERATOR_OVERRIDES_FILE_NAME: &str = "policy-overrides.json";

const DEFAULT_SLA_ACKNOWLEDGE_MINUTES: u64 = 4_320;
const DEFAULT_SLA_RESOLVE_MINUTES: u64 = 43_200;

fn operator_overrides_schema_version() -> u32 {
    OPERATOR_OVERRIDES_SCHEMA_VERSION
}

/// SLA timers attached to a resolved policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlaMinutes {
    pub acknowledge_minutes: u64,
    pub resolve_minutes: u64,
}

impl Default for SlaMinutes {
    fn default() -> Self {
        Self {
            acknowledge_minutes: DEFAULT_SLA_ACKNOWLEDGE_MINUTES,
            resolve_minutes: DEFAULT_SLA_RESOLVE_MINUTES,
        }
    }
}

/// Resolved view for one controller+region. Computed on demand, never
/// persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EffectivePolicy {
    pub controller_id: String,
    pub preferred_channel: ActionChannel,
    pub fallback_channel: Option<ActionChannel>,
    pub allowed_channels: Vec<ActionChannel>,
    pub min_confidence: f64,
    pub sla: SlaMinutes,
    pub can_auto_prepare: bool,
    pub can_auto_submit: bool,
    /// Which layer supplied the base entry, e.g. `capability:justdial` or
    /// `generic`, with `+region`/`+operator`/`+explicit` markers appended.
    pub source: String,
}

impl EffectivePolicy {
    pub fn allows_channel(&self, channel: ActionChannel) -> bool {
        self.allowed_channels.contains(&channel)
    }
}

/// One override layer. Every field is optional; unset fields leave the lower
/// layer untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicyOverride {
    #[serde(default)]
    pub preferred_channel: Option<ActionChannel>,
    #[serde(default)]
    pub allowed_channels: Option<Vec<ActionChannel>>,
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub can_auto_prepare: Option<bool>,
    #[serde(default)]
    pub can_auto_submit: Option<bool>,
    #[serde(default)]
    pub sla_acknowledge_minutes: Option<u64>,
    #[serde(default)]
    pub sla_resolve_minutes: Option<u64>,
}

impl PolicyOverride {
    fn is_empty(&self) -> bool {
        self.preferred_channel.is_none()
            && self.allowed_channels.is_none()
            && self.min_confidence.is_none()
            && self.can_auto_prepare.is_none()
            && self.can_auto_submit.is_none()
            && self.sla_acknowledge_minutes.is_none()
            && self.sla_resolve_minutes.is_none()
    }
}

/// Live operator overrides keyed by controller id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperatorOverridesFile {
    #[serde(default = "operator_overrides_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub overrides: BTreeMap<String, PolicyOverride>,
}

impl Default for OperatorOverridesFile {
    fn default() -> Self {
        Self {
            schema_version: OPERATOR_OVERRIDES_SCHEMA_VERSION,
            overrides: BTreeMap::new(),
        }
    }
}

pub fn load_operator_overrides(path: &Path) -> Result<OperatorOverridesFile> {
    if !path.exists() {
        return Ok(OperatorOverridesFile::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read operator overrides {}", path.display()))?;
    let parsed = serde_json::from_str::<OperatorOverridesFile>(&raw)
        .with_context(|| format!("failed to parse operator overrides {}", path.display()))?;
    if parsed.schema_version != OPERATOR_OVERRIDES_SCHEMA_VERSION {
        bail!(
            "unsupported operator overrides schema_version {} (expected {})",
            parsed.schema_version,
            OPERATOR_OVERRIDES_SCHEMA_VERSION
        );
    }
    Ok(parsed)
}

pub fn save_operator_overrides(path: &Path, overrides: &OperatorOverridesFile) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(overrides)
        .context("failed to encode operator overrides")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write operator overrides {}", path.display()))
}

/// Resolves the effective policy for one controller+region.
///
/// Merge precedence, lowest to highest: compiled default (the conservative
/// generic entry) -> capability table entry -> per-region confidence
/// override -> live operator override -> explicit caller override. Missing
/// data degrades to the generic policy; this function never fails.
pub fn resolve_effective_policy(
    table: &CapabilityTable,
    operator_overrides: Option<&OperatorOverridesFile>,
    controller_id: &str,
    region: Option<&str>,
    explicit: Option<&PolicyOverride>,
) -> EffectivePolicy {
    let controller_id = controller_id.trim();
    let (capability, mut source) = match table.lookup(controller_id) {
        Some(entry) => (entry.clone(), format!("capability:{controller_id}")),
        None => {
            tracing::debug!(
                controller = controller_id,
                "no capability entry; degrading to the generic policy"
            );
            (ControllerCapability::generic(), "generic".to_string())
        }
    };

    let mut policy = EffectivePolicy {
        controller_id: controller_id.to_string(),
        preferred_channel: capability.preferred_channel,
        fallback_channel: None,
        allowed_channels: capability.allowed_channels.clone(),
        min_confidence: capability.default_min_confidence,
        sla: SlaMinutes::default(),
        can_auto_prepare: capability.can_auto_prepare,
        can_auto_submit: capability.can_auto_submit,
        source: String::new(),
    };

    if let Some(region) = region.map(str::trim).filter(|value| !value.is_empty()) {
        if let Some(floor) = capability.region_min_confidence.get(region) {
            policy.min_confidence = *floor;
            source.push_str("+region");
        }
    }

    let operator_layer = operator_overrides
        .and_then(|file| file.overrides.get(controller_id))
        .filter(|layer| !layer.is_empty());
    if let Some(layer) = operator_layer {
        apply_override_layer(&mut policy, layer);
        source.push_str("+operator");
    }

    if let Some(layer) = explicit.filter(|layer| !layer.is_empty()) {
        apply_override_layer(&mut policy, layer);
        source.push_str("+explicit");
    }

    policy.min_confidence = policy.min_confidence.clamp(0.0, 1.0);
    if !policy.allowed_channels.contains(&policy.preferred_channel) {
        // An override can narrow the allowed set below the preferred channel;
        // the first remaining channel becomes preferred.
        if let Some(first) = policy.allowed_channels.first() {
            policy.preferred_channel = *first;
        }
    }
    policy.fallback_channel = policy
        .allowed_channels
        .iter()
        .copied()
        .find(|channel| *channel != policy.preferred_channel);
    policy.source = source;
    policy
}

fn apply_override_layer(policy: &mut EffectivePolicy, layer: &PolicyOverride) {
    if let Some(preferred) = layer.preferred_channel {
        policy.preferred_channel = preferred;
    }
    if let Some(allowed) = layer.allowed_channels.as_ref() {
        if !allowed.is_empty() {
            policy.allowed_channels = allowed.clone();
        }
    }
    if let Some(floor) = layer.min_confidence {
        policy.min_confidence = floor;
    }
    if let Some(flag) = layer.can_auto_prepare {
        policy.can_auto_prepare = flag;
    }
    if let Some(flag) = layer.can_auto_submit {
        policy.can_auto_submit = flag;
    }
    if let Some(minutes) = layer.sla_acknowledge_minutes {
        policy.sla.acknowledge_minutes = minutes;
    }
    if let Some(minutes) = layer.sla_resolve_minutes {
        policy.sla.resolve_minutes = minutes;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::tempdir;
    use veil_contract::ActionChannel;

    use super::{
        load_operator_overrides, resolve_effective_policy, save_operator_overrides,
        OperatorOverridesFile, PolicyOverride,
    };
    use crate::controller_capability::builtin_capability_table;

    #[test]
    fn unit_missing_capability_degrades_to_generic_policy() {
        let table = builtin_capability_table();
        let policy = resolve_effective_policy(&table, None, "unknown-broker", None, None);
        assert_eq!(policy.source, "generic");
        assert_eq!(policy.preferred_channel, ActionChannel::Email);
        assert_eq!(policy.allowed_channels, vec![ActionChannel::Email]);
        assert!(policy.min_confidence >= 0.90);
        assert!(policy.fallback_channel.is_none());
    }

    #[test]
    fn functional_region_override_lowers_confidence_floor() {
        let table = builtin_capability_table();
        let base = resolve_effective_policy(&table, None, "justdial", None, None);
        let regional = resolve_effective_policy(&table, None, "justdial", Some("IN"), None);
        assert_eq!(base.min_confidence, 0.84);
        assert_eq!(regional.min_confidence, 0.82);
        assert!(regional.source.ends_with("+region"));
    }

    #[test]
    fn functional_operator_override_takes_precedence_over_region() {
        let table = builtin_capability_table();
        let overrides = OperatorOverridesFile {
            overrides: BTreeMap::from([(
                "justdial".to_string(),
                PolicyOverride {
                    min_confidence: Some(0.95),
                    ..PolicyOverride::default()
                },
            )]),
            ..OperatorOverridesFile::default()
        };
        let policy =
            resolve_effective_policy(&table, Some(&overrides), "justdial", Some("IN"), None);
        assert_eq!(policy.min_confidence, 0.95);
        assert!(policy.source.contains("+operator"));
    }

    #[test]
    fn functional_explicit_override_wins_over_operator() {
        let table = builtin_capability_table();
        let overrides = OperatorOverridesFile {
            overrides: BTreeMap::from([(
                "justdial".to_string(),
                PolicyOverride {
                    min_confidence: Some(0.95),
                    ..PolicyOverride::default()
                },
            )]),
            ..OperatorOverridesFile::default()
        };
        let explicit = PolicyOverride {
            min_confidence: Some(0.70),
            ..PolicyOverride::default()
        };
        let policy = resolve_effective_policy(
            &table,
            Some(&overrides),
            "justdial",
            None,
            Some(&explicit),
        );
        assert_eq!(policy.min_confidence, 0.70);
        assert!(policy.source.ends_with("+explicit"));
    }

    #[test]
    fn regression_narrowed_allowed_set_repoints_preferred_channel() {
        let table = builtin_capability_table();
        let explicit = PolicyOverride {
            allowed_channels: Some(vec![ActionChannel::Email]),
            ..PolicyOverride::default()
        };
        let policy = resolve_effective_policy(&table, None, "justdial", None, Some(&explicit));
        assert_eq!(policy.preferred_channel, ActionChannel::Email);
        assert!(policy.fallback_channel.is_none());
    }

    #[test]
    fn integration_operator_overrides_round_trip_through_disk() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("policy-overrides.json");
        let overrides = OperatorOverridesFile {
            overrides: BTreeMap::from([(
                "sulekha".to_string(),
                PolicyOverride {
                    can_auto_submit: Some(false),
                    ..PolicyOverride::default()
                },
            )]),
            ..OperatorOverridesFile::default()
        };
        save_operator_overrides(&path, &overrides).expect("save");
        let loaded = load_operator_overrides(&path).expect("load");
        assert_eq!(loaded, overrides);
    }

    #[test]
    fn unit_load_operator_overrides_defaults_when_missing() {
        let temp = tempdir().expect("tempdir");
        let loaded =
            load_operator_overrides(&temp.path().join("missing.json")).expect("load default");
        assert!(loaded.overrides.is_empty());
    }
}
