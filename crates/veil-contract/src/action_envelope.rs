use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{EngineError, EngineResult};

/// Subjects longer than this are truncated before storage.
pub const DRAFT_SUBJECT_MAX_CHARS: usize = 140;
/// Bodies longer than this are truncated before storage.
pub const DRAFT_BODY_MAX_CHARS: usize = 1_800;
/// Evidence URL lists are deduplicated and capped at this count.
pub const EVIDENCE_URL_MAX_COUNT: usize = 10;

const DIGIT_RUN_PLACEHOLDER: &str = "[redacted-digits]";
const CREDENTIAL_PLACEHOLDER: &str = "[redacted]";

/// Error returned when a status transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid action transition: {from:?} -> {to:?}")]
pub struct ActionTransitionError {
    pub from: ActionStatus,
    pub to: ActionStatus,
}

/// Communication channel used to reach a controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ActionChannel {
    Email,
    Webform,
    Api,
}

impl ActionChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webform => "webform",
            Self::Api => "api",
        }
    }

    /// Parses a channel name, tolerating surrounding whitespace and case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "email" => Some(Self::Email),
            "webform" => Some(Self::Webform),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

/// Lifecycle state of one removal/correction attempt.
///
/// Forward-only except `sent -> escalate_pending`, which records that
/// automation exhausted its budget and a human must follow up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Draft,
    Prepared,
    Sent,
    EscalatePending,
    Failed,
}

impl ActionStatus {
    /// Returns true when this status can transition to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Self::Draft, Self::Prepared)
                | (Self::Prepared, Self::Sent)
                | (Self::Prepared, Self::Failed)
                | (Self::Sent, Self::EscalatePending)
                | (Self::Sent, Self::Failed)
                | (Self::EscalatePending, Self::Sent)
        )
    }

    /// Returns an error if transitioning to `next` is not allowed.
    pub fn ensure_transition(self, next: Self) -> Result<(), ActionTransitionError> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(ActionTransitionError {
            from: self,
            to: next,
        })
    }

    /// Returns true when no further automated work is expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Prepared => "prepared",
            Self::Sent => "sent",
            Self::EscalatePending => "escalate_pending",
            Self::Failed => "failed",
        }
    }
}

/// Identity block carried on an envelope. Holds previews only; raw PII never
/// enters this engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactedIdentity {
    #[serde(default)]
    pub name_preview: String,
    #[serde(default)]
    pub email_preview: String,
    #[serde(default)]
    pub city: String,
}

/// Structured request fields supplied by the draft-generation collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuredFields {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub data_categories: Vec<String>,
    #[serde(default)]
    pub legal_basis: String,
    #[serde(default)]
    pub reply_to_hint: String,
}

/// Draft subject/body after the defensive scrub and length caps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftContent {
    pub subject: String,
    pub body: String,
}

impl DraftContent {
    /// Applies the conservative PII scrub and length caps. Draft text is
    /// treated as opaque collaborator output; this pass runs before storage
    /// no matter what the collaborator claims to have redacted.
    pub fn sanitized(subject: &str, body: &str) -> Self {
        Self {
            subject: truncate_chars(&scrub_pii_text(subject.trim()), DRAFT_SUBJECT_MAX_CHARS),
            body: truncate_chars(&scrub_pii_text(body.trim()), DRAFT_BODY_MAX_CHARS),
        }
    }
}

/// One removal/correction attempt against a controller. Never deleted, only
/// status-transitioned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionEnvelope {
    pub action_id: String,
    /// Opaque reference to the data subject this action is filed for.
    #[serde(default)]
    pub subject_ref: String,
    pub controller_id: String,
    #[serde(default)]
    pub controller_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub identity: RedactedIdentity,
    #[serde(default)]
    pub evidence_urls: Vec<String>,
    #[serde(default)]
    pub draft: DraftContent,
    #[serde(default)]
    pub fields: StructuredFields,
    pub preferred_channel: ActionChannel,
    #[serde(default)]
    pub reply_preview: String,
    #[serde(default)]
    pub status: ActionStatus,
    #[serde(default)]
    pub proof_hash: Option<String>,
    #[serde(default)]
    pub proof_signature: Option<String>,
    pub created_unix_ms: u64,
    pub updated_unix_ms: u64,
}

impl ActionEnvelope {
    /// Creates a draft envelope, normalizing evidence URLs and sanitizing the
    /// draft content.
    pub fn new_draft(
        action_id: impl Into<String>,
        controller_id: impl Into<String>,
        preferred_channel: ActionChannel,
        subject: &str,
        body: &str,
        evidence_urls: Vec<String>,
        now_unix_ms: u64,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            subject_ref: String::new(),
            controller_id: controller_id.into(),
            controller_name: String::new(),
            category: String::new(),
            identity: RedactedIdentity::default(),
            evidence_urls: normalize_evidence_urls(evidence_urls),
            draft: DraftContent::sanitized(subject, body),
            fields: StructuredFields::default(),
            preferred_channel,
            reply_preview: String::new(),
            status: ActionStatus::Draft,
            proof_hash: None,
            proof_signature: None,
            created_unix_ms: now_unix_ms,
            updated_unix_ms: now_unix_ms,
        }
    }

    /// Rejects envelopes missing the fields every downstream component
    /// depends on.
    pub fn validate(&self) -> EngineResult<()> {
        if self.action_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("action_id is empty".to_string()));
        }
        if self.controller_id.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "controller_id is empty".to_string(),
            ));
        }
        if self.draft.subject.trim().is_empty() && self.draft.body.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "draft subject and body are both empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies a status transition, updating the change timestamp.
    pub fn transition(&mut self, next: ActionStatus, now_unix_ms: u64) -> EngineResult<()> {
        self.status
            .ensure_transition(next)
            .map_err(|error| EngineError::InvalidInput(error.to_string()))?;
        self.status = next;
        self.updated_unix_ms = now_unix_ms;
        Ok(())
    }
}

/// Trims, deduplicates (order-preserving), and caps an evidence URL list.
pub fn normalize_evidence_urls(urls: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::new();
    for url in urls {
        let trimmed = url.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.clone()) {
            normalized.push(trimmed);
        }
        if normalized.len() >= EVIDENCE_URL_MAX_COUNT {
            break;
        }
    }
    normalized
}

fn digit_run_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{6,}").expect("digit-run pattern compiles"))
}

fn credential_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\b(api[_-]?key|token|secret|password|passwd|pwd|auth)\s*[=:]\s*\S+"#)
            .expect("credential pattern compiles")
    })
}

/// Conservative scrub applied to collaborator-supplied text before storage:
/// masks long digit runs (phone numbers, government ids) and anything shaped
/// like a `key=value` credential assignment.
pub fn scrub_pii_text(text: &str) -> String {
    let masked_digits = digit_run_pattern().replace_all(text, DIGIT_RUN_PLACEHOLDER);
    credential_token_pattern()
        .replace_all(&masked_digits, |captures: &regex::Captures<'_>| {
            format!("{}={}", &captures[1], CREDENTIAL_PLACEHOLDER)
        })
        .into_owned()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
