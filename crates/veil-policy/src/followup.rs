use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use veil_core::unix_ms_plus_days;

use crate::controller_capability::ControllerCapability;

pub const FOLLOWUP_OVERRIDES_SCHEMA_VERSION: u32 = 1;
pub const FOLLOWUP_OVERRIDES_FILE_NAME: &str = "followup-overrides.json";

fn followup_overrides_schema_version() -> u32 {
    FOLLOWUP_OVERRIDES_SCHEMA_VERSION
}

/// Operator overrides for follow-up cadence, keyed by controller id.
///
/// Cadence overrides are a separate table from confidence overrides; the two
/// are never read through the same key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowupOverridesFile {
    #[serde(default = "followup_overrides_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub cadence_days: BTreeMap<String, u32>,
}

impl Default for FollowupOverridesFile {
    fn default() -> Self {
        Self {
            schema_version: FOLLOWUP_OVERRIDES_SCHEMA_VERSION,
            cadence_days: BTreeMap::new(),
        }
    }
}

pub fn load_followup_overrides(path: &Path) -> Result<FollowupOverridesFile> {
    if !path.exists() {
        return Ok(FollowupOverridesFile::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read followup overrides {}", path.display()))?;
    let parsed = serde_json::from_str::<FollowupOverridesFile>(&raw)
        .with_context(|| format!("failed to parse followup overrides {}", path.display()))?;
    if parsed.schema_version != FOLLOWUP_OVERRIDES_SCHEMA_VERSION {
        bail!(
            "unsupported followup overrides schema_version {} (expected {})",
            parsed.schema_version,
            FOLLOWUP_OVERRIDES_SCHEMA_VERSION
        );
    }
    for (controller_id, days) in &parsed.cadence_days {
        if controller_id.trim().is_empty() {
            bail!("followup override has empty controller_id");
        }
        if *days == 0 {
            bail!("followup cadence for '{controller_id}' must be at least 1 day");
        }
    }
    Ok(parsed)
}

/// Computes when the next follow-up for a sent action is due.
///
/// Returns `None` once the controller's follow-up budget is exhausted.
/// Cadence comes from the override table when present, else the capability
/// entry; the schedule is anchored to `sent_at_unix_ms` so retries of the
/// planner are stable.
pub fn next_followup_at(
    capability: &ControllerCapability,
    overrides: Option<&FollowupOverridesFile>,
    sent_at_unix_ms: u64,
    followups_done: u32,
) -> Option<u64> {
    if followups_done >= capability.max_followups {
        return None;
    }
    let cadence_days = overrides
        .and_then(|file| file.cadence_days.get(capability.controller_id.trim()))
        .copied()
        .unwrap_or(capability.followup_cadence_days)
        .max(1);
    Some(unix_ms_plus_days(
        sent_at_unix_ms,
        u64::from(cadence_days) * u64::from(followups_done + 1),
    ))
}
