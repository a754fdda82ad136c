//! Shared contract types for the Veil dispatch engine.
//!
//! Defines the action envelope and its status machine, discovery hit records,
//! redaction helpers, and the engine-wide error taxonomy. Every other Veil
//! crate builds on these types.

pub mod action_envelope;
pub mod error;
pub mod hit;

pub use action_envelope::{
    normalize_evidence_urls, scrub_pii_text, ActionChannel, ActionEnvelope, ActionStatus,
    DraftContent, RedactedIdentity, StructuredFields, DRAFT_BODY_MAX_CHARS,
    DRAFT_SUBJECT_MAX_CHARS, EVIDENCE_URL_MAX_COUNT,
};
pub use error::{EngineError, EngineResult};
pub use hit::{BrokerHit, HitPreview};
