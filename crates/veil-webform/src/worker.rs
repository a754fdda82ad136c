use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use veil_core::current_unix_timestamp_ms;

use crate::artifact_store::ArtifactStore;
use crate::automation_session::{AutomationSessionFactory, AUTOMATION_ERROR_TIMEOUT};
use crate::controller_profile::ControllerProfileSet;
use crate::failure_alerting::{evaluate_failure_spike, AlertSink, FailureSpikeConfig};
use crate::handler_registry::{HandlerOutcome, HandlerRegistry};
use crate::job_store::WebformJobStore;
use crate::webform_job::{WebformJob, WebformJobResult};

static BACKOFF_JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Worker tuning. The defaults match the production retry ladder: one minute
/// base doubling up to thirty minutes, six attempts, six-hour manual
/// follow-up after dead-lettering.
#[derive(Debug, Clone)]
pub struct WebformWorkerConfig {
    pub batch_size: usize,
    pub base_backoff_ms: u64,
    pub backoff_cap_ms: u64,
    /// Upper bound on one handler run plus each artifact capture step.
    pub step_timeout_ms: u64,
    /// Offset for the parent action's `next_attempt_at` after escalation.
    pub escalate_followup_ms: u64,
    pub alerting: FailureSpikeConfig,
}

impl Default for WebformWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            base_backoff_ms: 60_000,
            backoff_cap_ms: 1_800_000,
            step_timeout_ms: 30_000,
            escalate_followup_ms: 21_600_000,
            alerting: FailureSpikeConfig::default(),
        }
    }
}

/// Parent-action seam: the worker reports submission completion and
/// dead-letter escalation without owning action persistence.
#[async_trait]
pub trait ActionTracker: Send + Sync {
    async fn action_sent(&self, action_id: &str, job_id: &str, now_unix_ms: u64)
        -> anyhow::Result<()>;
    async fn action_escalated(
        &self,
        action_id: &str,
        next_attempt_at_unix_ms: u64,
        now_unix_ms: u64,
    ) -> anyhow::Result<()>;
}

/// Summary of one poll batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerBatchReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub failed_terminal: usize,
    pub alert_emitted: bool,
}

/// Jitter-free expected delay before retry `attempt` (1-based):
/// `min(base * 2^(attempt-1), cap)`.
pub fn backoff_delay_ms(attempt: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let shift = attempt.saturating_sub(1).min(20);
    base_ms
        .saturating_mul(1_u64 << shift)
        .min(cap_ms.max(base_ms))
}

/// Expected delay scaled by a jitter factor in [0.8, 1.2], still clamped to
/// the cap. The factor comes from a counter-mixed hash, keeping tests
/// deterministic per process without sharing a clock.
pub fn jittered_backoff_delay_ms(attempt: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let expected = backoff_delay_ms(attempt, base_ms, cap_ms);
    let seed = BACKOFF_JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(23) ^ 0xD1B5_4A32_D192_ED03;
    let permille = 800 + (mixed % 401);
    (expected.saturating_mul(permille) / 1_000).min(cap_ms.max(base_ms))
}

fn ticket_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:ticket|reference|case)\s*(?:id|number|no\.?|#)?\s*[:#-]?\s*([A-Za-z0-9][A-Za-z0-9-]{3,})",
        )
        .expect("ticket pattern compiles")
    })
}

/// Best-effort ticket/reference/case token extraction from a confirmation
/// page. Returns the first plausible token; absence is not an error.
pub fn extract_ticket_reference(content: &str) -> Option<String> {
    ticket_reference_pattern()
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map(|token| token.as_str().to_string())
}

/// Claims and processes one bounded batch of due jobs sequentially, then runs
/// the failure-spike sweep.
///
/// Jobs run one at a time within a batch to bound pressure on the automation
/// backend; concurrency across worker instances is safe because the store's
/// claim is an atomic conditional update.
pub async fn run_worker_batch(
    store: &dyn WebformJobStore,
    registry: &HandlerRegistry,
    profiles: &ControllerProfileSet,
    sessions: &dyn AutomationSessionFactory,
    artifacts: &ArtifactStore,
    tracker: &dyn ActionTracker,
    alert_sink: &dyn AlertSink,
    config: &WebformWorkerConfig,
) -> anyhow::Result<WorkerBatchReport> {
    let mut report = WorkerBatchReport::default();
    let now_unix_ms = current_unix_timestamp_ms();
    let claimed = store.claim_due_jobs(now_unix_ms, config.batch_size).await?;
    report.claimed = claimed.len();

    for job in claimed {
        process_claimed_job(
            store, registry, profiles, sessions, artifacts, tracker, config, &job, &mut report,
        )
        .await?;
    }

    let alert = evaluate_failure_spike(
        store,
        &config.alerting,
        alert_sink,
        current_unix_timestamp_ms(),
    )
    .await?;
    report.alert_emitted = alert.is_some();
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn process_claimed_job(
    store: &dyn WebformJobStore,
    registry: &HandlerRegistry,
    profiles: &ControllerProfileSet,
    sessions: &dyn AutomationSessionFactory,
    artifacts: &ArtifactStore,
    tracker: &dyn ActionTracker,
    config: &WebformWorkerConfig,
    job: &WebformJob,
    report: &mut WorkerBatchReport,
) -> anyhow::Result<()> {
    let Some(handler) = registry.select(&job.controller_id, &job.target_url) else {
        dead_letter(
            store,
            tracker,
            config,
            job,
            "no handler matches controller or domain",
            report,
        )
        .await?;
        return Ok(());
    };

    let profile = profiles.lookup(&job.controller_id, &job.target_url);
    let Some(form_url) = handler.resolve_url(job, &profile) else {
        dead_letter(store, tracker, config, job, "no resolvable form URL", report).await?;
        return Ok(());
    };

    let mut session = match sessions.create_session().await {
        Ok(session) => session,
        Err(error) => {
            handle_retryable(
                store,
                tracker,
                config,
                job,
                &format!("automation backend unavailable: {error}"),
                report,
            )
            .await?;
            return Ok(());
        }
    };

    let step_timeout = Duration::from_millis(config.step_timeout_ms.max(1));
    let outcome = match tokio::time::timeout(
        step_timeout,
        handler.run(session.as_mut(), job, &profile, &form_url),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => HandlerOutcome::Retryable {
            code: AUTOMATION_ERROR_TIMEOUT.to_string(),
            detail: format!("handler exceeded {}ms", config.step_timeout_ms),
        },
    };

    match outcome {
        HandlerOutcome::Submitted {
            confirmation_excerpt,
        } => {
            let mut result = WebformJobResult {
                confirmation_excerpt,
                ticket_reference: None,
                artifact_paths: Vec::new(),
                artifact_hashes: Vec::new(),
            };

            // Artifact capture is best effort: a submission that went
            // through is not retried because evidence capture hiccuped.
            match tokio::time::timeout(step_timeout, session.page_content()).await {
                Ok(Ok(content)) => {
                    result.ticket_reference = extract_ticket_reference(&content);
                    match artifacts.write_page_html(&job.job_id, &content) {
                        Ok(artifact) => {
                            result.artifact_paths.push(artifact.relative_path);
                            result.artifact_hashes.push(artifact.sha256_hex);
                        }
                        Err(error) => {
                            tracing::warn!(job_id = job.job_id.as_str(), error = %error,
                                "failed to persist page artifact");
                        }
                    }
                }
                Ok(Err(error)) => {
                    tracing::warn!(job_id = job.job_id.as_str(), code = error.code.as_str(),
                        "failed to capture confirmation page");
                }
                Err(_) => {
                    tracing::warn!(job_id = job.job_id.as_str(), "page capture timed out");
                }
            }
            if let Ok(Ok(png)) = tokio::time::timeout(step_timeout, session.screenshot_png()).await
            {
                match artifacts.write_screenshot_png(&job.job_id, &png) {
                    Ok(artifact) => {
                        result.artifact_paths.push(artifact.relative_path);
                        result.artifact_hashes.push(artifact.sha256_hex);
                    }
                    Err(error) => {
                        tracing::warn!(job_id = job.job_id.as_str(), error = %error,
                            "failed to persist screenshot artifact");
                    }
                }
            }

            let now_unix_ms = current_unix_timestamp_ms();
            store.complete_job(&job.job_id, result, now_unix_ms).await?;
            tracker
                .action_sent(&job.action_id, &job.job_id, now_unix_ms)
                .await?;
            report.succeeded += 1;
        }
        HandlerOutcome::Retryable { code, detail } => {
            handle_retryable(
                store,
                tracker,
                config,
                job,
                &format!("{code}: {detail}"),
                report,
            )
            .await?;
        }
        HandlerOutcome::Permanent { code, detail } => {
            dead_letter(
                store,
                tracker,
                config,
                job,
                &format!("{code}: {detail}"),
                report,
            )
            .await?;
        }
    }
    Ok(())
}

/// Reschedules within the attempt budget; dead-letters once the budget is
/// spent. `job.attempt` already includes the claim increment.
async fn handle_retryable(
    store: &dyn WebformJobStore,
    tracker: &dyn ActionTracker,
    config: &WebformWorkerConfig,
    job: &WebformJob,
    error: &str,
    report: &mut WorkerBatchReport,
) -> anyhow::Result<()> {
    let now_unix_ms = current_unix_timestamp_ms();
    if job.attempt < job.max_attempts {
        let delay_ms =
            jittered_backoff_delay_ms(job.attempt, config.base_backoff_ms, config.backoff_cap_ms);
        store
            .reschedule_job(
                &job.job_id,
                now_unix_ms.saturating_add(delay_ms),
                error,
                now_unix_ms,
            )
            .await?;
        tracing::debug!(
            job_id = job.job_id.as_str(),
            attempt = job.attempt,
            delay_ms,
            "webform job rescheduled"
        );
        report.rescheduled += 1;
        return Ok(());
    }
    dead_letter(store, tracker, config, job, error, report).await
}

/// Terminal failure: the job dead-letters and the parent action escalates
/// for manual follow-up.
async fn dead_letter(
    store: &dyn WebformJobStore,
    tracker: &dyn ActionTracker,
    config: &WebformWorkerConfig,
    job: &WebformJob,
    error: &str,
    report: &mut WorkerBatchReport,
) -> anyhow::Result<()> {
    let now_unix_ms = current_unix_timestamp_ms();
    store.fail_job(&job.job_id, error, now_unix_ms).await?;
    tracker
        .action_escalated(
            &job.action_id,
            now_unix_ms.saturating_add(config.escalate_followup_ms),
            now_unix_ms,
        )
        .await?;
    tracing::warn!(
        job_id = job.job_id.as_str(),
        attempt = job.attempt,
        error,
        "webform job dead-lettered; parent action escalated"
    );
    report.failed_terminal += 1;
    Ok(())
}
