use serde::{Deserialize, Serialize};

use crate::controller_capability::ControllerCapability;

pub const DEFAULT_THRESHOLD_HIGH: f64 = 0.88;
pub const DEFAULT_THRESHOLD_MEDIUM: f64 = 0.80;

/// Qualitative confidence tier derived from a numeric match score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Controller-specific banding thresholds with global fallbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            high: DEFAULT_THRESHOLD_HIGH,
            medium: DEFAULT_THRESHOLD_MEDIUM,
        }
    }
}

impl BandThresholds {
    /// Thresholds for a capability entry, falling back per-field to the
    /// global defaults when the entry leaves them unset.
    pub fn for_capability(capability: Option<&ControllerCapability>) -> Self {
        let defaults = Self::default();
        match capability {
            Some(capability) => Self {
                high: capability.threshold_high.unwrap_or(defaults.high),
                medium: capability.threshold_medium.unwrap_or(defaults.medium),
            },
            None => defaults,
        }
    }
}

/// Maps a match score into a band. Scores are clamped to [0, 1] first; no
/// I/O, no controller lookup.
pub fn band_for_score(score: f64, thresholds: &BandThresholds) -> ConfidenceBand {
    let clamped = score.clamp(0.0, 1.0);
    if clamped >= thresholds.high {
        ConfidenceBand::High
    } else if clamped >= thresholds.medium {
        ConfidenceBand::Medium
    } else {
        ConfidenceBand::Low
    }
}
