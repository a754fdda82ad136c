//! Capability and policy resolution for controller dispatch.
//!
//! The capability table declares what may be attempted per controller; the
//! resolver merges it with region and operator overrides into one effective
//! policy value. Candidate selection gates discovery hits through those
//! policies before any action is drafted.

pub mod auto_candidate;
pub mod confidence_band;
pub mod controller_capability;
pub mod followup;
pub mod policy_resolver;

pub use auto_candidate::{
    select_auto_candidates, AcceptedCandidate, AutoCandidateConfig, AutoCandidateReport,
    RejectedCandidate,
};
pub use confidence_band::{
    band_for_score, BandThresholds, ConfidenceBand, DEFAULT_THRESHOLD_HIGH,
    DEFAULT_THRESHOLD_MEDIUM,
};
pub use controller_capability::{
    builtin_capability_table, load_capability_table, CapabilityTable, CapabilityTableFile,
    ControllerCapability, CAPABILITY_TABLE_SCHEMA_VERSION, GENERIC_CONTROLLER_ID,
};
pub use followup::{load_followup_overrides, next_followup_at, FollowupOverridesFile};
pub use policy_resolver::{
    load_operator_overrides, resolve_effective_policy, save_operator_overrides, EffectivePolicy,
    OperatorOverridesFile, PolicyOverride, SlaMinutes,
};
