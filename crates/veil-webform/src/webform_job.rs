use serde::{Deserialize, Serialize};
use thiserror::Error;
use veil_contract::scrub_pii_text;

/// Default attempt budget before a job dead-letters.
pub const DEFAULT_JOB_MAX_ATTEMPTS: u32 = 6;

/// Error returned when a job status transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job status transition: {from:?} -> {to:?}")]
pub struct JobTransitionError {
    pub from: WebformJobStatus,
    pub to: WebformJobStatus,
}

/// Lifecycle state for a webform submission job.
///
/// `Running -> Queued` is the retry reschedule; `Failed -> Queued` is the
/// operator re-arm. Retries mutate the same row, never clone it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebformJobStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl WebformJobStatus {
    /// Returns true when this status can transition to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Queued)
                | (Self::Running, Self::Failed)
                | (Self::Failed, Self::Queued)
        )
    }

    /// Returns an error if transitioning to `next` is not allowed.
    pub fn ensure_transition(self, next: Self) -> Result<(), JobTransitionError> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(JobTransitionError {
            from: self,
            to: next,
        })
    }

    /// Returns true when no further execution is expected without operator
    /// intervention.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Minimal redacted payload a handler types into a controller form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub message: String,
}

impl SubmissionPayload {
    /// Applies the defensive scrub to every field before the payload is
    /// persisted on a job row.
    pub fn sanitized(name: &str, email: &str, phone: &str, message: &str) -> Self {
        Self {
            name: scrub_pii_text(name.trim()),
            email: scrub_pii_text(email.trim()),
            phone: phone.trim().to_string(),
            message: scrub_pii_text(message.trim()),
        }
    }
}

/// Captured result of a successful submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebformJobResult {
    pub confirmation_excerpt: String,
    #[serde(default)]
    pub ticket_reference: Option<String>,
    #[serde(default)]
    pub artifact_paths: Vec<String>,
    #[serde(default)]
    pub artifact_hashes: Vec<String>,
}

/// One durable automation job. A row covers the whole attempt cycle; retries
/// bump `attempt` and move `scheduled_at_unix_ms` forward on the same row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebformJob {
    pub job_id: String,
    pub action_id: String,
    pub subject_id: String,
    pub controller_id: String,
    /// Listing page the action concerns; also the domain used for failure
    /// grouping.
    pub target_url: String,
    /// Explicit operator-supplied form URL. Takes precedence over profile
    /// candidates and handler defaults when present.
    #[serde(default)]
    pub submission_url: Option<String>,
    pub payload: SubmissionPayload,
    #[serde(default)]
    pub status: WebformJobStatus,
    #[serde(default)]
    pub attempt: u32,
    pub max_attempts: u32,
    pub scheduled_at_unix_ms: u64,
    #[serde(default)]
    pub completed_at_unix_ms: Option<u64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub result: Option<WebformJobResult>,
    pub created_unix_ms: u64,
    pub updated_unix_ms: u64,
}

impl WebformJob {
    /// Creates a queued job scheduled to run immediately.
    pub fn new(
        job_id: impl Into<String>,
        action_id: impl Into<String>,
        subject_id: impl Into<String>,
        controller_id: impl Into<String>,
        target_url: impl Into<String>,
        payload: SubmissionPayload,
        now_unix_ms: u64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            action_id: action_id.into(),
            subject_id: subject_id.into(),
            controller_id: controller_id.into(),
            target_url: target_url.into(),
            submission_url: None,
            payload,
            status: WebformJobStatus::Queued,
            attempt: 0,
            max_attempts: DEFAULT_JOB_MAX_ATTEMPTS,
            scheduled_at_unix_ms: now_unix_ms,
            completed_at_unix_ms: None,
            last_error: None,
            result: None,
            created_unix_ms: now_unix_ms,
            updated_unix_ms: now_unix_ms,
        }
    }
}
