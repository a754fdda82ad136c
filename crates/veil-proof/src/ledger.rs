use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use veil_contract::{ActionEnvelope, EngineError, EngineResult};
use veil_core::append_line_creating_dir;

use crate::canonical::{canonical_envelope_bytes, content_hash_hex};
use crate::signer::ProofSigner;

pub const PROOF_RECORD_SCHEMA_VERSION: u32 = 1;

fn proof_record_schema_version() -> u32 {
    PROOF_RECORD_SCHEMA_VERSION
}

/// One signed envelope, append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofRecord {
    #[serde(default = "proof_record_schema_version")]
    pub schema_version: u32,
    pub controller_id: String,
    pub content_hash: String,
    pub signature: String,
    pub key_id: String,
    pub signer_mode: String,
    pub signed_at_unix_ms: u64,
    pub evidence_count: usize,
}

/// Result of sealing an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealOutcome {
    pub record: ProofRecord,
    /// True when an identical logical action was already sealed; the caller
    /// must reuse the existing stored action instead of inserting a new one.
    pub idempotent: bool,
}

/// Tamper-evident ledger over sealed envelopes.
///
/// The on-disk form is JSONL, one record per line, never rewritten. The
/// in-memory index enforces the (controller, content hash) idempotency key.
pub struct ProofLedger {
    path: Option<PathBuf>,
    index: Mutex<BTreeMap<(String, String), ProofRecord>>,
}

impl ProofLedger {
    /// Opens a ledger file, loading the idempotency index from existing
    /// records. A missing file starts an empty ledger.
    pub fn open(path: &Path) -> Result<Self> {
        let mut index = BTreeMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read proof ledger {}", path.display()))?;
            for (line_number, line) in raw.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let record = serde_json::from_str::<ProofRecord>(line).with_context(|| {
                    format!(
                        "failed to parse proof ledger {} line {}",
                        path.display(),
                        line_number + 1
                    )
                })?;
                index.insert(
                    (record.controller_id.clone(), record.content_hash.clone()),
                    record,
                );
            }
        }
        Ok(Self {
            path: Some(path.to_path_buf()),
            index: Mutex::new(index),
        })
    }

    /// Ledger without persistence, for tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            index: Mutex::new(BTreeMap::new()),
        }
    }

    /// Canonicalizes, hashes, and signs `envelope`, enforcing idempotency on
    /// (controller, hash). On an idempotent replay the existing record is
    /// returned and the envelope carries the original hash and signature.
    pub fn seal(
        &self,
        envelope: &mut ActionEnvelope,
        signer: &dyn ProofSigner,
        now_unix_ms: u64,
    ) -> EngineResult<SealOutcome> {
        envelope.validate()?;
        let content_hash = content_hash_hex(envelope);
        let key = (envelope.controller_id.trim().to_string(), content_hash.clone());

        let mut index = self
            .index
            .lock()
            .map_err(|_| EngineError::SigningUnavailable("proof index poisoned".to_string()))?;
        if let Some(existing) = index.get(&key) {
            envelope.proof_hash = Some(existing.content_hash.clone());
            envelope.proof_signature = Some(existing.signature.clone());
            return Ok(SealOutcome {
                record: existing.clone(),
                idempotent: true,
            });
        }

        let signature = signer.sign(&canonical_envelope_bytes(envelope))?;
        let record = ProofRecord {
            schema_version: PROOF_RECORD_SCHEMA_VERSION,
            controller_id: key.0.clone(),
            content_hash: content_hash.clone(),
            signature: signature.clone(),
            key_id: signer.key_id().to_string(),
            signer_mode: signer.mode().as_str().to_string(),
            signed_at_unix_ms: now_unix_ms,
            evidence_count: envelope.evidence_urls.len(),
        };

        if let Some(path) = self.path.as_deref() {
            let line = serde_json::to_string(&record).map_err(|error| {
                EngineError::SigningUnavailable(format!("failed to encode proof record: {error}"))
            })?;
            append_line_creating_dir(path, &line).map_err(|error| {
                EngineError::SigningUnavailable(format!("failed to append proof record: {error}"))
            })?;
        }

        index.insert(key, record.clone());
        envelope.proof_hash = Some(content_hash);
        envelope.proof_signature = Some(signature);
        Ok(SealOutcome {
            record,
            idempotent: false,
        })
    }

    /// Looks up the record for a (controller, hash) pair.
    pub fn find(&self, controller_id: &str, content_hash: &str) -> Option<ProofRecord> {
        self.index
            .lock()
            .ok()?
            .get(&(controller_id.trim().to_string(), content_hash.to_string()))
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        self.index.lock().map(|index| index.len()).unwrap_or(0)
    }
}
