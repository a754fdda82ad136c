use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use veil_core::unix_ms_window_start;

use crate::job_store::WebformJobStore;

pub const ALERT_TYPE_WEBFORM_FAILURE_SPIKE: &str = "WEBFORM_FAILURE_SPIKE";

/// Rolling-window thresholds for the failure-spike monitor.
#[derive(Debug, Clone, Copy)]
pub struct FailureSpikeConfig {
    pub window_minutes: u64,
    pub failure_threshold: usize,
}

impl Default for FailureSpikeConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            failure_threshold: 5,
        }
    }
}

/// Alert event delivered to the operator webhook.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailureSpikeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "windowMinutes")]
    pub window_minutes: u64,
    #[serde(rename = "totalFailed")]
    pub total_failed: usize,
    #[serde(rename = "byDomain")]
    pub by_domain: BTreeMap<String, usize>,
    pub at: u64,
}

/// Delivery seam for alert events.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, event: &FailureSpikeEvent) -> anyhow::Result<()>;
}

/// Posts alert events as JSON to a configured webhook.
pub struct WebhookAlertSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>, http_timeout_ms: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(http_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn deliver(&self, event: &FailureSpikeEvent) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(event).send().await?;
        if !response.status().is_success() {
            anyhow::bail!(
                "alert webhook returned http {}",
                response.status().as_u16()
            );
        }
        Ok(())
    }
}

/// Host portion of a URL used for failure grouping: scheme and `www.`
/// stripped, port and path dropped.
pub fn domain_of_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

/// Stateless sweep over recent failures. Queries failed jobs updated within
/// the window, groups by domain, and emits exactly one event when the total
/// crosses the threshold. Safe to call after every worker batch.
pub async fn evaluate_failure_spike(
    store: &dyn WebformJobStore,
    config: &FailureSpikeConfig,
    sink: &dyn AlertSink,
    now_unix_ms: u64,
) -> anyhow::Result<Option<FailureSpikeEvent>> {
    let since = unix_ms_window_start(now_unix_ms, config.window_minutes);
    let failed = store.failed_jobs_since(since).await?;
    if failed.len() < config.failure_threshold.max(1) {
        return Ok(None);
    }

    let mut by_domain: BTreeMap<String, usize> = BTreeMap::new();
    for job in &failed {
        *by_domain.entry(domain_of_url(&job.target_url)).or_default() += 1;
    }
    let event = FailureSpikeEvent {
        event_type: ALERT_TYPE_WEBFORM_FAILURE_SPIKE.to_string(),
        window_minutes: config.window_minutes,
        total_failed: failed.len(),
        by_domain,
        at: now_unix_ms,
    };
    sink.deliver(&event).await?;
    tracing::warn!(
        total_failed = event.total_failed,
        window_minutes = event.window_minutes,
        "webform failure spike alert emitted"
    );
    Ok(Some(event))
}
