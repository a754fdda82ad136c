use thiserror::Error;

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure taxonomy shared across selection, dispatch, automation, and
/// signing. Retry decisions key off the variant, never off message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Required envelope or job fields are missing; rejected immediately.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Rejected at selection time (allow-list or confidence floor); never
    /// reaches dispatch.
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    /// The upstream asked us to slow down; retry after the given delay.
    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },
    /// Preferred and fallback channels are disallowed or unconfigured.
    #[error("channel unavailable: {hint}")]
    ChannelUnavailable { hint: String },
    /// Handler failure, navigation timeout, or missing submit control.
    /// Retryable up to the job's attempt budget.
    #[error("automation error: {0}")]
    AutomationError(String),
    /// The signing backend is configured but cannot produce a signature.
    /// The ledger fails closed on this in signed modes.
    #[error("signing unavailable: {0}")]
    SigningUnavailable(String),
}

impl EngineError {
    /// Reason code surfaced in reports and audit entries.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::PolicyViolation(_) => "policy_violation",
            Self::RateLimited { .. } => "rate_limited",
            Self::ChannelUnavailable { .. } => "channel_unavailable",
            Self::AutomationError(_) => "automation_error",
            Self::SigningUnavailable(_) => "signing_unavailable",
        }
    }

    /// Returns true when the caller may retry after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::AutomationError(_))
    }
}
