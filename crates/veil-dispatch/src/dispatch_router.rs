use async_trait::async_trait;
use serde::Serialize;
use veil_contract::{ActionChannel, ActionEnvelope, ActionStatus, EngineResult};
use veil_policy::EffectivePolicy;

use crate::email_retry::PROVIDER_MAX_SEND_ATTEMPTS;
use crate::provider_dispatch::{send_with_retry, DirectSendRequest, DirectSender};

/// Router-level dispatch state. Distinct from the envelope status: a webform
/// dispatch is `sent` here once the job is durably enqueued, while the
/// envelope stays `prepared` until the worker completes the submission.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Unsent,
    Sent,
    Failed,
}

impl DispatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsent => "unsent",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of routing one envelope.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub state: DispatchState,
    pub channel: Option<ActionChannel>,
    pub provider_ref: Option<String>,
    pub webform_job_id: Option<String>,
    /// One entry per attempted path, e.g. `email:provider_rejected` or
    /// `webform:enqueued`.
    pub attempted: Vec<String>,
    pub hint: Option<String>,
}

/// Enqueue seam for the webform channel. The durable queue lives in the
/// webform crate; the router only needs a job id back.
#[async_trait]
pub trait WebformEnqueue: Send + Sync {
    async fn enqueue_webform_job(
        &self,
        envelope: &ActionEnvelope,
        now_unix_ms: u64,
    ) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct DispatchRouterConfig {
    pub max_send_attempts: u32,
}

impl Default for DispatchRouterConfig {
    fn default() -> Self {
        Self {
            max_send_attempts: PROVIDER_MAX_SEND_ATTEMPTS,
        }
    }
}

/// Routes a drafted envelope through the policy-allowed channels.
///
/// The preferred channel is attempted only when the effective policy allows
/// it; on failure (or a disallowed preference) the policy's designated
/// fallback gets exactly one try. Exhausting both paths marks the envelope
/// failed with a hint describing what was attempted.
pub async fn route_action(
    envelope: &mut ActionEnvelope,
    policy: &EffectivePolicy,
    sender: &dyn DirectSender,
    enqueuer: &dyn WebformEnqueue,
    config: &DispatchRouterConfig,
    now_unix_ms: u64,
) -> EngineResult<DispatchOutcome> {
    envelope.validate()?;
    if envelope.status == ActionStatus::Draft {
        envelope.transition(ActionStatus::Prepared, now_unix_ms)?;
    }

    let mut outcome = DispatchOutcome {
        state: DispatchState::Unsent,
        channel: None,
        provider_ref: None,
        webform_job_id: None,
        attempted: Vec::new(),
        hint: None,
    };

    if !policy.allows_channel(envelope.preferred_channel) {
        outcome.attempted.push(format!(
            "{}:disallowed-by-policy",
            envelope.preferred_channel.as_str()
        ));
    }

    // Candidate order: the drafted preference, then the policy's preferred
    // channel, then its designated fallback. One automatic fallback only, so
    // at most two paths are ever attempted.
    let mut channels = Vec::new();
    for candidate in [
        Some(envelope.preferred_channel),
        Some(policy.preferred_channel),
        policy.fallback_channel,
    ]
    .into_iter()
    .flatten()
    {
        if policy.allows_channel(candidate) && !channels.contains(&candidate) {
            channels.push(candidate);
        }
    }
    channels.truncate(2);

    if channels.is_empty() {
        let hint = format!(
            "no dispatchable channel: preferred={} allowed={:?}",
            envelope.preferred_channel.as_str(),
            policy
                .allowed_channels
                .iter()
                .map(|channel| channel.as_str())
                .collect::<Vec<_>>()
        );
        envelope.transition(ActionStatus::Failed, now_unix_ms)?;
        outcome.state = DispatchState::Failed;
        outcome.hint = Some(hint);
        return Ok(outcome);
    }

    for channel in channels {
        match channel {
            ActionChannel::Webform => {
                match enqueuer.enqueue_webform_job(envelope, now_unix_ms).await {
                    Ok(job_id) => {
                        outcome.attempted.push("webform:enqueued".to_string());
                        outcome.state = DispatchState::Sent;
                        outcome.channel = Some(channel);
                        outcome.webform_job_id = Some(job_id);
                        // The envelope stays `prepared`; the worker advances
                        // it to `sent` when the submission completes.
                        return Ok(outcome);
                    }
                    Err(error) => {
                        tracing::warn!(
                            controller = envelope.controller_id.as_str(),
                            error = %error,
                            "webform enqueue failed"
                        );
                        outcome.attempted.push("webform:enqueue-failed".to_string());
                    }
                }
            }
            ActionChannel::Email | ActionChannel::Api => {
                let request = DirectSendRequest {
                    action_id: envelope.action_id.clone(),
                    controller_id: envelope.controller_id.clone(),
                    to_hint: envelope.fields.reply_to_hint.clone(),
                    subject: envelope.draft.subject.clone(),
                    body: envelope.draft.body.clone(),
                };
                match send_with_retry(sender, channel, &request, config.max_send_attempts).await {
                    Ok(receipt) => {
                        outcome
                            .attempted
                            .push(format!("{}:sent", channel.as_str()));
                        envelope.transition(ActionStatus::Sent, now_unix_ms)?;
                        outcome.state = DispatchState::Sent;
                        outcome.channel = Some(channel);
                        outcome.provider_ref = receipt.provider_ref;
                        return Ok(outcome);
                    }
                    Err(error) => {
                        let label = if error.is_rate_limited() {
                            "rate_limited".to_string()
                        } else {
                            error.reason_code.clone()
                        };
                        outcome
                            .attempted
                            .push(format!("{}:{}", channel.as_str(), label));
                    }
                }
            }
        }
    }

    let hint = format!("dispatch exhausted: attempted {}", outcome.attempted.join(", "));
    envelope.transition(ActionStatus::Failed, now_unix_ms)?;
    outcome.state = DispatchState::Failed;
    outcome.hint = Some(hint);
    Ok(outcome)
}
