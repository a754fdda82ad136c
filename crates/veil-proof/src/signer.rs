use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use veil_contract::{EngineError, EngineResult};

/// Marker signature recorded when signing is disabled.
pub const UNSIGNED_SIGNATURE_MARKER: &str = "unsigned";

/// Signing backend selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignerMode {
    Hmac,
    Ed25519,
    /// Development convenience only: records carry no signature and are
    /// loudly flagged. Production configurations must not use this.
    Unsigned,
}

impl SignerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hmac => "hmac",
            Self::Ed25519 => "ed25519",
            Self::Unsigned => "unsigned",
        }
    }
}

/// Signs canonical envelope bytes. Implementations must be deterministic for
/// identical input so re-signing stays idempotent.
pub trait ProofSigner: Send + Sync + std::fmt::Debug {
    fn key_id(&self) -> &str;
    fn mode(&self) -> SignerMode;
    fn sign(&self, message: &[u8]) -> EngineResult<String>;
}

/// Symmetric MAC signer (HMAC-SHA256).
#[derive(Debug)]
pub struct HmacProofSigner {
    key_id: String,
    secret: Vec<u8>,
}

impl HmacProofSigner {
    pub fn new(key_id: impl Into<String>, secret: Vec<u8>) -> EngineResult<Self> {
        if secret.is_empty() {
            return Err(EngineError::SigningUnavailable(
                "hmac signer requires a non-empty secret".to_string(),
            ));
        }
        Ok(Self {
            key_id: key_id.into(),
            secret,
        })
    }
}

impl ProofSigner for HmacProofSigner {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn mode(&self) -> SignerMode {
        SignerMode::Hmac
    }

    fn sign(&self, message: &[u8]) -> EngineResult<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret).map_err(|error| {
            EngineError::SigningUnavailable(format!("failed to initialize hmac: {error}"))
        })?;
        mac.update(message);
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

/// Asymmetric signer backed by an Ed25519 key.
#[derive(Debug)]
pub struct Ed25519ProofSigner {
    key_id: String,
    signing_key: SigningKey,
}

impl Ed25519ProofSigner {
    pub fn new(key_id: impl Into<String>, key_bytes: [u8; 32]) -> Self {
        Self {
            key_id: key_id.into(),
            signing_key: SigningKey::from_bytes(&key_bytes),
        }
    }

    /// Base64 of the verifying key, for publishing to auditors.
    pub fn verifying_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().to_bytes())
    }
}

impl ProofSigner for Ed25519ProofSigner {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn mode(&self) -> SignerMode {
        SignerMode::Ed25519
    }

    fn sign(&self, message: &[u8]) -> EngineResult<String> {
        Ok(BASE64.encode(self.signing_key.sign(message).to_bytes()))
    }
}

/// Explicit no-signature mode. Every use is logged so a misconfigured
/// production deployment is visible in the logs, not silent.
#[derive(Debug, Default)]
pub struct UnsignedProofSigner;

impl ProofSigner for UnsignedProofSigner {
    fn key_id(&self) -> &str {
        UNSIGNED_SIGNATURE_MARKER
    }

    fn mode(&self) -> SignerMode {
        SignerMode::Unsigned
    }

    fn sign(&self, _message: &[u8]) -> EngineResult<String> {
        tracing::warn!(
            "proof ledger signing is disabled; records are being written unsigned"
        );
        Ok(UNSIGNED_SIGNATURE_MARKER.to_string())
    }
}

/// Signer configuration as loaded from deployment config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofSignerConfig {
    pub mode: SignerMode,
    #[serde(default)]
    pub key_id: String,
    /// Base64 key material: the HMAC secret, or the 32-byte Ed25519 seed.
    #[serde(default)]
    pub key_base64: String,
}

/// Builds the configured signer, failing closed when a signed mode is
/// selected without usable key material.
pub fn build_signer(config: &ProofSignerConfig) -> EngineResult<Box<dyn ProofSigner>> {
    match config.mode {
        SignerMode::Unsigned => {
            tracing::warn!("proof signer configured in unsigned development mode");
            Ok(Box::new(UnsignedProofSigner))
        }
        SignerMode::Hmac => {
            let secret = decode_key(&config.key_base64)?;
            let key_id = required_key_id(config)?;
            Ok(Box::new(HmacProofSigner::new(key_id, secret)?))
        }
        SignerMode::Ed25519 => {
            let decoded = decode_key(&config.key_base64)?;
            let key_bytes: [u8; 32] = decoded.try_into().map_err(|_| {
                EngineError::SigningUnavailable(
                    "ed25519 signer key must decode to exactly 32 bytes".to_string(),
                )
            })?;
            let key_id = required_key_id(config)?;
            Ok(Box::new(Ed25519ProofSigner::new(key_id, key_bytes)))
        }
    }
}

fn required_key_id(config: &ProofSignerConfig) -> EngineResult<String> {
    let key_id = config.key_id.trim();
    if key_id.is_empty() {
        return Err(EngineError::SigningUnavailable(
            "signed proof modes require a key_id".to_string(),
        ));
    }
    Ok(key_id.to_string())
}

fn decode_key(raw: &str) -> EngineResult<Vec<u8>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::SigningUnavailable(
            "signed proof modes require key material".to_string(),
        ));
    }
    BASE64.decode(trimmed).map_err(|error| {
        EngineError::SigningUnavailable(format!("failed to decode signer key: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    use super::{
        build_signer, Ed25519ProofSigner, HmacProofSigner, ProofSigner, ProofSignerConfig,
        SignerMode, UnsignedProofSigner, UNSIGNED_SIGNATURE_MARKER,
    };

    #[test]
    fn unit_hmac_signatures_are_deterministic() {
        let signer = HmacProofSigner::new("ops-v1", b"shared-secret".to_vec()).expect("signer");
        let first = signer.sign(b"canonical").expect("sign");
        let second = signer.sign(b"canonical").expect("sign again");
        assert_eq!(first, second);
        assert_ne!(first, signer.sign(b"different").expect("different"));
    }

    #[test]
    fn unit_ed25519_signatures_verify_against_published_key() {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let signer = Ed25519ProofSigner::new("audit-v1", [9; 32]);
        let signature_b64 = signer.sign(b"canonical").expect("sign");
        let signature_bytes: [u8; 64] = BASE64
            .decode(signature_b64)
            .expect("decode signature")
            .try_into()
            .expect("64 bytes");
        let key_bytes: [u8; 32] = BASE64
            .decode(signer.verifying_key_base64())
            .expect("decode key")
            .try_into()
            .expect("32 bytes");
        let verifying_key = VerifyingKey::from_bytes(&key_bytes).expect("verifying key");
        verifying_key
            .verify(b"canonical", &Signature::from_bytes(&signature_bytes))
            .expect("signature verifies");
    }

    #[test]
    fn unit_unsigned_signer_returns_marker() {
        let signer = UnsignedProofSigner;
        assert_eq!(
            signer.sign(b"canonical").expect("sign"),
            UNSIGNED_SIGNATURE_MARKER
        );
        assert_eq!(signer.mode(), SignerMode::Unsigned);
    }

    #[test]
    fn regression_signed_modes_fail_closed_without_key_material() {
        let config = ProofSignerConfig {
            mode: SignerMode::Hmac,
            key_id: "ops-v1".to_string(),
            key_base64: String::new(),
        };
        let error = build_signer(&config).expect_err("missing key must fail");
        assert_eq!(error.reason_code(), "signing_unavailable");

        let config = ProofSignerConfig {
            mode: SignerMode::Ed25519,
            key_id: "audit-v1".to_string(),
            key_base64: BASE64.encode([1_u8; 16]),
        };
        let error = build_signer(&config).expect_err("short key must fail");
        assert_eq!(error.reason_code(), "signing_unavailable");
    }

    #[test]
    fn functional_build_signer_produces_working_hmac_backend() {
        let config = ProofSignerConfig {
            mode: SignerMode::Hmac,
            key_id: "ops-v1".to_string(),
            key_base64: BASE64.encode(b"shared-secret"),
        };
        let signer = build_signer(&config).expect("build");
        assert_eq!(signer.key_id(), "ops-v1");
        assert!(!signer.sign(b"canonical").expect("sign").is_empty());
    }
}
