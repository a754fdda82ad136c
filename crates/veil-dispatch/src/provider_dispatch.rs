use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use veil_contract::ActionChannel;

use crate::email_retry::{provider_retry_delay_ms, should_retry_status};

const REASON_CHANNEL_UNCONFIGURED: &str = "channel_unconfigured";
const REASON_PROVIDER_REJECTED: &str = "provider_rejected";
const REASON_PROVIDER_THROTTLED: &str = "provider_throttled";
const REASON_PROVIDER_UNREACHABLE: &str = "provider_unreachable";
const REASON_WEBFORM_NOT_DIRECT: &str = "webform_not_direct";

/// Outbound payload for a direct (email or API) send. Draft content arrives
/// here already scrubbed and capped by the envelope constructor.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DirectSendRequest {
    pub action_id: String,
    pub controller_id: String,
    pub to_hint: String,
    pub subject: String,
    pub body: String,
}

/// Successful provider handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectSendReceipt {
    pub channel: ActionChannel,
    pub provider_ref: Option<String>,
    pub http_status: u16,
}

/// Structured provider failure; `retryable` drives the send loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectSendError {
    pub reason_code: String,
    pub detail: String,
    pub retryable: bool,
    pub http_status: Option<u16>,
    pub retry_after_ms: Option<u64>,
}

impl std::fmt::Display for DirectSendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reason_code={} retryable={} http_status={:?} detail={}",
            self.reason_code, self.retryable, self.http_status, self.detail
        )
    }
}

impl std::error::Error for DirectSendError {}

impl DirectSendError {
    pub fn is_rate_limited(&self) -> bool {
        self.http_status == Some(429)
    }
}

/// Transport for the email and API channels. The webform channel is never a
/// direct send; it goes through the durable job queue instead.
#[async_trait]
pub trait DirectSender: Send + Sync {
    fn is_channel_configured(&self, channel: ActionChannel) -> bool;
    async fn send(
        &self,
        channel: ActionChannel,
        request: &DirectSendRequest,
    ) -> Result<DirectSendReceipt, DirectSendError>;
}

/// HTTP provider configuration for direct sends.
#[derive(Debug, Clone, Default)]
pub struct HttpDirectSenderConfig {
    pub email_endpoint: Option<String>,
    pub api_endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub http_timeout_ms: u64,
}

/// Direct sender posting JSON to the configured provider endpoints.
pub struct HttpDirectSender {
    config: HttpDirectSenderConfig,
    client: reqwest::Client,
}

impl HttpDirectSender {
    pub fn new(config: HttpDirectSenderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms.max(1)))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint_for(&self, channel: ActionChannel) -> Option<&str> {
        match channel {
            ActionChannel::Email => self.config.email_endpoint.as_deref(),
            ActionChannel::Api => self.config.api_endpoint.as_deref(),
            ActionChannel::Webform => None,
        }
    }
}

#[async_trait]
impl DirectSender for HttpDirectSender {
    fn is_channel_configured(&self, channel: ActionChannel) -> bool {
        self.endpoint_for(channel)
            .map(|endpoint| !endpoint.trim().is_empty())
            .unwrap_or(false)
    }

    async fn send(
        &self,
        channel: ActionChannel,
        request: &DirectSendRequest,
    ) -> Result<DirectSendReceipt, DirectSendError> {
        if channel == ActionChannel::Webform {
            return Err(DirectSendError {
                reason_code: REASON_WEBFORM_NOT_DIRECT.to_string(),
                detail: "webform dispatch must go through the job queue".to_string(),
                retryable: false,
                http_status: None,
                retry_after_ms: None,
            });
        }
        let Some(endpoint) = self.endpoint_for(channel).filter(|e| !e.trim().is_empty()) else {
            return Err(DirectSendError {
                reason_code: REASON_CHANNEL_UNCONFIGURED.to_string(),
                detail: format!("no endpoint configured for channel {}", channel.as_str()),
                retryable: false,
                http_status: None,
                retry_after_ms: None,
            });
        };

        let payload = json!({
            "action_id": request.action_id,
            "controller_id": request.controller_id,
            "channel": channel.as_str(),
            "to_hint": request.to_hint,
            "subject": request.subject,
            "body": request.body,
        });
        let mut builder = self.client.post(endpoint).json(&payload);
        if let Some(token) = self
            .config
            .auth_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
        {
            builder = builder.bearer_auth(token.trim());
        }

        let response = builder.send().await.map_err(|error| DirectSendError {
            reason_code: REASON_PROVIDER_UNREACHABLE.to_string(),
            detail: error.to_string(),
            retryable: true,
            http_status: None,
            retry_after_ms: None,
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after_ms = crate::email_retry::parse_retry_after_ms(response.headers());
            let reason_code = if status == 429 {
                REASON_PROVIDER_THROTTLED
            } else {
                REASON_PROVIDER_REJECTED
            };
            return Err(DirectSendError {
                reason_code: reason_code.to_string(),
                detail: format!("provider returned http {status}"),
                retryable: should_retry_status(status),
                http_status: Some(status),
                retry_after_ms,
            });
        }

        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        let provider_ref = ["id", "message_id", "reference"]
            .iter()
            .find_map(|key| body.get(key).and_then(Value::as_str))
            .map(str::to_string);
        Ok(DirectSendReceipt {
            channel,
            provider_ref,
            http_status: status,
        })
    }
}

/// Bounded retry loop over a direct sender. Retryable failures back off
/// exponentially (honoring Retry-After); the last error is returned once the
/// budget is spent and the router decides what happens next.
pub async fn send_with_retry(
    sender: &dyn DirectSender,
    channel: ActionChannel,
    request: &DirectSendRequest,
    max_attempts: u32,
) -> Result<DirectSendReceipt, DirectSendError> {
    let max_attempts = max_attempts.max(1);
    let mut last_error: Option<DirectSendError> = None;
    for attempt in 0..max_attempts {
        match sender.send(channel, request).await {
            Ok(receipt) => return Ok(receipt),
            Err(error) => {
                let final_attempt = attempt + 1 >= max_attempts;
                if !error.retryable || final_attempt {
                    tracing::debug!(
                        channel = channel.as_str(),
                        reason_code = error.reason_code.as_str(),
                        attempt = attempt + 1,
                        "direct send failed terminally for this channel"
                    );
                    return Err(error);
                }
                let delay_ms = provider_retry_delay_ms(attempt, true, error.retry_after_ms);
                tracing::debug!(
                    channel = channel.as_str(),
                    reason_code = error.reason_code.as_str(),
                    attempt = attempt + 1,
                    delay_ms,
                    "direct send failed; backing off"
                );
                last_error = Some(error);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
    Err(last_error.unwrap_or(DirectSendError {
        reason_code: REASON_PROVIDER_UNREACHABLE.to_string(),
        detail: "send budget exhausted".to_string(),
        retryable: false,
        http_status: None,
        retry_after_ms: None,
    }))
}
