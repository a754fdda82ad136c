use sha2::{Digest, Sha256};
use veil_contract::ActionEnvelope;

/// Builds the canonical, stable-ordered representation of an envelope used
/// for hashing and signing. Only non-PII fields participate: the controller,
/// category, redacted identity previews, the sorted evidence URL list, the
/// structured action fields, and a digest of the draft subject (never the
/// subject text itself).
///
/// Timestamps are deliberately excluded so re-signing the same logical action
/// at a later time produces the same content hash; signing time lives on the
/// ledger record instead.
pub fn canonical_envelope_bytes(envelope: &ActionEnvelope) -> Vec<u8> {
    let mut evidence = envelope
        .evidence_urls
        .iter()
        .map(|url| url.trim().to_string())
        .collect::<Vec<_>>();
    evidence.sort();

    let mut lines = vec![
        "v1".to_string(),
        format!("controller={}", envelope.controller_id.trim()),
        format!("category={}", envelope.category.trim()),
        format!("identity_name={}", envelope.identity.name_preview.trim()),
        format!("identity_email={}", envelope.identity.email_preview.trim()),
        format!("identity_city={}", envelope.identity.city.trim()),
        format!("action={}", envelope.fields.action.trim()),
        format!("legal_basis={}", envelope.fields.legal_basis.trim()),
        format!("evidence_count={}", evidence.len()),
    ];
    for (index, url) in evidence.iter().enumerate() {
        lines.push(format!("evidence.{index}={url}"));
    }
    lines.push(format!(
        "subject_sha256={}",
        sha256_hex(envelope.draft.subject.as_bytes())
    ));
    lines.join("\n").into_bytes()
}

/// Hex content hash of the canonical envelope bytes. This is the idempotency
/// key component paired with the controller id.
pub fn content_hash_hex(envelope: &ActionEnvelope) -> String {
    sha256_hex(&canonical_envelope_bytes(envelope))
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
