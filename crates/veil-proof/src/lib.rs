//! Proof ledger for dispatched actions.
//!
//! Canonicalizes the non-PII view of an action envelope, hashes it, signs the
//! canonical bytes, and enforces (controller, hash) idempotency over an
//! append-only record log.

pub mod canonical;
pub mod ledger;
pub mod signer;

pub use canonical::{canonical_envelope_bytes, content_hash_hex};
pub use ledger::{ProofLedger, ProofRecord, SealOutcome, PROOF_RECORD_SCHEMA_VERSION};
pub use signer::{
    build_signer, Ed25519ProofSigner, HmacProofSigner, ProofSigner, ProofSignerConfig, SignerMode,
    UnsignedProofSigner,
};
