use serde::Serialize;
use veil_contract::BrokerHit;

use crate::confidence_band::{band_for_score, BandThresholds, ConfidenceBand};
use crate::controller_capability::{CapabilityTable, GENERIC_CONTROLLER_ID};
use crate::policy_resolver::{resolve_effective_policy, OperatorOverridesFile};

/// Rationale phrases that mark a low-trust match. Hits carrying one of these
/// in their `why` list must never be auto-actioned.
const AMBIGUITY_BLOCKLIST: [&str; 4] = [
    "different city",
    "possible duplicate",
    "name-only match",
    "stale listing",
];

/// Fixed tiebreak order when accepted candidates share a confidence score.
const ADAPTER_PRIORITY: [&str; 4] = ["justdial", "sulekha", "whitepages", GENERIC_CONTROLLER_ID];

/// Caller-side knobs for one selection pass.
#[derive(Debug, Clone)]
pub struct AutoCandidateConfig {
    /// Global confidence floor applied on top of every controller floor.
    pub global_min_confidence: f64,
    /// Accepted candidates are truncated to this count after ranking.
    pub max_candidates: usize,
    pub region: Option<String>,
}

impl Default for AutoCandidateConfig {
    fn default() -> Self {
        Self {
            global_min_confidence: 0.75,
            max_candidates: 5,
            region: None,
        }
    }
}

/// Hit accepted for automatic action creation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AcceptedCandidate {
    pub controller_id: String,
    pub band: ConfidenceBand,
    pub reasons: Vec<String>,
    pub hit: BrokerHit,
}

/// Hit rejected with a machine-readable reason.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RejectedCandidate {
    pub controller_id: String,
    pub broker: String,
    pub url: String,
    pub reason: String,
}

/// Outcome of one selection pass over a batch of hits.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AutoCandidateReport {
    pub accepted: Vec<AcceptedCandidate>,
    pub rejected: Vec<RejectedCandidate>,
}

/// Resolves which adapter/controller a hit belongs to: the explicit adapter
/// tag when present, else domain inference against the capability table, else
/// generic.
pub fn resolve_adapter_id(hit: &BrokerHit, table: &CapabilityTable) -> String {
    if let Some(adapter) = hit
        .adapter
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return adapter.to_ascii_lowercase();
    }
    if let Some(capability) = table.lookup_by_domain(&hit.url) {
        return capability.controller_id.clone();
    }
    GENERIC_CONTROLLER_ID.to_string()
}

fn adapter_priority(controller_id: &str) -> usize {
    ADAPTER_PRIORITY
        .iter()
        .position(|candidate| *candidate == controller_id)
        .unwrap_or(ADAPTER_PRIORITY.len())
}

fn ambiguity_phrase(hit: &BrokerHit) -> Option<&'static str> {
    let rationale = hit.why.join(" ").to_ascii_lowercase();
    AMBIGUITY_BLOCKLIST
        .iter()
        .copied()
        .find(|phrase| rationale.contains(phrase))
}

/// Filters and ranks incoming hits into candidates eligible for automatic
/// action creation.
///
/// Gates, in order: capability `can_auto_prepare`, confidence floor
/// (max of controller floor, region override, and the caller's global floor),
/// domain allow-list, ambiguity blocklist. Accepted candidates record the
/// reasons that passed; rejections record one machine-readable reason each.
pub fn select_auto_candidates(
    hits: &[BrokerHit],
    table: &CapabilityTable,
    operator_overrides: Option<&OperatorOverridesFile>,
    config: &AutoCandidateConfig,
) -> AutoCandidateReport {
    let mut report = AutoCandidateReport::default();

    for hit in hits {
        let controller_id = resolve_adapter_id(hit, table);
        let policy = resolve_effective_policy(
            table,
            operator_overrides,
            &controller_id,
            hit.region.as_deref().or(config.region.as_deref()),
            None,
        );

        if !policy.can_auto_prepare {
            report.rejected.push(rejection(
                &controller_id,
                hit,
                "auto-prepare-disabled".to_string(),
            ));
            continue;
        }

        let floor = policy.min_confidence.max(config.global_min_confidence);
        let score = hit.confidence.clamp(0.0, 1.0);
        if score < floor {
            report.rejected.push(rejection(
                &controller_id,
                hit,
                format!("below-min:{score:.2}<{floor:.2}"),
            ));
            continue;
        }

        if !table.is_url_allowlisted(&hit.url) {
            report.rejected.push(rejection(
                &controller_id,
                hit,
                "url-not-allowlisted".to_string(),
            ));
            continue;
        }

        if let Some(phrase) = ambiguity_phrase(hit) {
            report.rejected.push(rejection(
                &controller_id,
                hit,
                format!("ambiguous-match:{phrase}"),
            ));
            continue;
        }

        let thresholds = BandThresholds::for_capability(table.lookup(&controller_id));
        report.accepted.push(AcceptedCandidate {
            controller_id: controller_id.clone(),
            band: band_for_score(score, &thresholds),
            reasons: vec![
                format!("adapter:{controller_id}"),
                "confidence-ok".to_string(),
                "url-allowlisted".to_string(),
            ],
            hit: hit.clone(),
        });
    }

    report.accepted.sort_by(|left, right| {
        right
            .hit
            .confidence
            .partial_cmp(&left.hit.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                adapter_priority(&left.controller_id).cmp(&adapter_priority(&right.controller_id))
            })
    });
    report.accepted.truncate(config.max_candidates);
    report
}

fn rejection(controller_id: &str, hit: &BrokerHit, reason: String) -> RejectedCandidate {
    RejectedCandidate {
        controller_id: controller_id.to_string(),
        broker: hit.broker.clone(),
        url: hit.url.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use veil_contract::BrokerHit;

    use super::{resolve_adapter_id, select_auto_candidates, AutoCandidateConfig};
    use crate::controller_capability::builtin_capability_table;

    fn justdial_hit(confidence: f64) -> BrokerHit {
        BrokerHit::new("Justdial", "https://justdial.com/x", confidence)
    }

    #[test]
    fn functional_high_confidence_justdial_hit_is_accepted() {
        let table = builtin_capability_table();
        let report = select_auto_candidates(
            &[justdial_hit(0.90)],
            &table,
            None,
            &AutoCandidateConfig::default(),
        );
        assert_eq!(report.accepted.len(), 1);
        let accepted = &report.accepted[0];
        assert_eq!(accepted.controller_id, "justdial");
        assert!(accepted.reasons.iter().any(|reason| reason == "confidence-ok"));
    }

    #[test]
    fn functional_below_floor_hit_is_rejected_with_reason() {
        let table = builtin_capability_table();
        let report = select_auto_candidates(
            &[justdial_hit(0.80)],
            &table,
            None,
            &AutoCandidateConfig::default(),
        );
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].reason, "below-min:0.80<0.84");
    }

    #[test]
    fn unit_adapter_resolution_prefers_explicit_tag() {
        let table = builtin_capability_table();
        let mut hit = justdial_hit(0.9);
        hit.adapter = Some("Sulekha".to_string());
        assert_eq!(resolve_adapter_id(&hit, &table), "sulekha");
        hit.adapter = None;
        assert_eq!(resolve_adapter_id(&hit, &table), "justdial");
        hit.url = "https://nowhere.example/p".to_string();
        assert_eq!(resolve_adapter_id(&hit, &table), "generic");
    }

    #[test]
    fn unit_ambiguous_rationale_is_blocklisted() {
        let table = builtin_capability_table();
        let mut hit = justdial_hit(0.95);
        hit.why = vec!["same name, Different City".to_string()];
        let report =
            select_auto_candidates(&[hit], &table, None, &AutoCandidateConfig::default());
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected[0].reason, "ambiguous-match:different city");
    }

    #[test]
    fn unit_off_allowlist_url_is_rejected() {
        let table = builtin_capability_table();
        let mut hit = justdial_hit(0.95);
        hit.adapter = Some("justdial".to_string());
        hit.url = "https://mirror-of-justdial.example/x".to_string();
        let report =
            select_auto_candidates(&[hit], &table, None, &AutoCandidateConfig::default());
        assert_eq!(report.rejected[0].reason, "url-not-allowlisted");
    }

    #[test]
    fn functional_generic_hits_need_the_higher_generic_floor() {
        let table = builtin_capability_table();
        // locanto.com is allow-listed but has no capability entry.
        let low = BrokerHit::new("Locanto", "https://locanto.com/p/1", 0.86);
        let high = BrokerHit::new("Locanto", "https://locanto.com/p/2", 0.93);
        let report = select_auto_candidates(
            &[low, high],
            &table,
            None,
            &AutoCandidateConfig::default(),
        );
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.accepted[0].hit.url, "https://locanto.com/p/2");
        assert!(report.rejected[0].reason.starts_with("below-min:0.86"));
    }

    #[test]
    fn functional_ranking_sorts_by_confidence_then_adapter_priority() {
        let table = builtin_capability_table();
        let hits = vec![
            BrokerHit::new("Sulekha", "https://sulekha.com/a", 0.90),
            BrokerHit::new("Justdial", "https://justdial.com/b", 0.90),
            BrokerHit::new("Justdial", "https://justdial.com/c", 0.97),
        ];
        let report =
            select_auto_candidates(&hits, &table, None, &AutoCandidateConfig::default());
        let urls: Vec<&str> = report
            .accepted
            .iter()
            .map(|candidate| candidate.hit.url.as_str())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://justdial.com/c",
                "https://justdial.com/b",
                "https://sulekha.com/a"
            ]
        );
    }

    #[test]
    fn regression_truncation_respects_caller_budget() {
        let table = builtin_capability_table();
        let hits: Vec<BrokerHit> = (0..8)
            .map(|index| {
                BrokerHit::new(
                    "Justdial",
                    format!("https://justdial.com/p{index}"),
                    0.90 + f64::from(index) * 0.001,
                )
            })
            .collect();
        let config = AutoCandidateConfig {
            max_candidates: 3,
            ..AutoCandidateConfig::default()
        };
        let report = select_auto_candidates(&hits, &table, None, &config);
        assert_eq!(report.accepted.len(), 3);
        assert_eq!(report.accepted[0].hit.url, "https://justdial.com/p7");
    }

    #[test]
    fn unit_auto_prepare_disabled_rejects_regardless_of_score() {
        let table = builtin_capability_table();
        let mut overrides = crate::policy_resolver::OperatorOverridesFile::default();
        overrides.overrides.insert(
            "justdial".to_string(),
            crate::policy_resolver::PolicyOverride {
                can_auto_prepare: Some(false),
                ..crate::policy_resolver::PolicyOverride::default()
            },
        );
        let report = select_auto_candidates(
            &[justdial_hit(0.99)],
            &table,
            Some(&overrides),
            &AutoCandidateConfig::default(),
        );
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected[0].reason, "auto-prepare-disabled");
    }
}
