use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use veil_contract::ActionEnvelope;
use veil_dispatch::WebformEnqueue;

use crate::webform_job::{
    SubmissionPayload, WebformJob, WebformJobResult, WebformJobStatus, DEFAULT_JOB_MAX_ATTEMPTS,
};

/// Result type for job store operations.
pub type StoreResult<T> = Result<T, WebformStoreError>;

/// Errors returned by job store implementations.
#[derive(Debug, Error)]
pub enum WebformStoreError {
    #[error("job '{0}' already exists")]
    JobAlreadyExists(String),
    #[error("job '{0}' not found")]
    JobNotFound(String),
    #[error("invalid job status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: WebformJobStatus,
        to: WebformJobStatus,
    },
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Async contract between the dispatcher, the worker, and operator tooling.
///
/// `claim_due_jobs` is the concurrency-critical operation: the
/// `queued -> running` flip plus attempt increment must be a single
/// conditional update per job so overlapping workers never double-process.
#[async_trait]
pub trait WebformJobStore: Send + Sync {
    async fn enqueue_job(&self, job: WebformJob) -> StoreResult<()>;
    /// Atomically claims up to `limit` queued jobs with
    /// `scheduled_at <= now`, ordered by `scheduled_at`.
    async fn claim_due_jobs(&self, now_unix_ms: u64, limit: usize) -> StoreResult<Vec<WebformJob>>;
    /// Puts a running job back in the queue for a later attempt. The new
    /// schedule is clamped so a queued job is never scheduled in the past.
    async fn reschedule_job(
        &self,
        job_id: &str,
        scheduled_at_unix_ms: u64,
        error: &str,
        now_unix_ms: u64,
    ) -> StoreResult<()>;
    async fn complete_job(
        &self,
        job_id: &str,
        result: WebformJobResult,
        now_unix_ms: u64,
    ) -> StoreResult<()>;
    /// Terminal failure; the job will not run again unless an operator
    /// re-arms it.
    async fn fail_job(&self, job_id: &str, error: &str, now_unix_ms: u64) -> StoreResult<()>;
    /// Operator action: re-arms a terminal `failed` job with a reset attempt
    /// counter.
    async fn retry_job(&self, job_id: &str, now_unix_ms: u64) -> StoreResult<()>;
    /// Operator action: cancels a job with a reason. Returns false (and
    /// changes nothing) when the job is already terminal.
    async fn cancel_job(&self, job_id: &str, reason: &str, now_unix_ms: u64) -> StoreResult<bool>;
    async fn get_job(&self, job_id: &str) -> StoreResult<Option<WebformJob>>;
    /// Failed jobs whose last update falls inside the alerting window.
    async fn failed_jobs_since(&self, since_unix_ms: u64) -> StoreResult<Vec<WebformJob>>;
}

/// In-memory backend for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryWebformJobStore {
    inner: RwLock<HashMap<String, WebformJob>>,
}

impl InMemoryWebformJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebformJobStore for InMemoryWebformJobStore {
    async fn enqueue_job(&self, mut job: WebformJob) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.contains_key(&job.job_id) {
            return Err(WebformStoreError::JobAlreadyExists(job.job_id));
        }
        job.status = WebformJobStatus::Queued;
        job.scheduled_at_unix_ms = job.scheduled_at_unix_ms.max(job.created_unix_ms);
        inner.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn claim_due_jobs(&self, now_unix_ms: u64, limit: usize) -> StoreResult<Vec<WebformJob>> {
        let mut inner = self.inner.write().await;
        let mut due: Vec<String> = inner
            .values()
            .filter(|job| {
                job.status == WebformJobStatus::Queued && job.scheduled_at_unix_ms <= now_unix_ms
            })
            .map(|job| job.job_id.clone())
            .collect();
        due.sort_by_key(|job_id| {
            inner
                .get(job_id)
                .map(|job| (job.scheduled_at_unix_ms, job.job_id.clone()))
                .unwrap_or((u64::MAX, job_id.clone()))
        });
        due.truncate(limit);

        let mut claimed = Vec::new();
        for job_id in due {
            let Some(job) = inner.get_mut(&job_id) else {
                continue;
            };
            job.status
                .ensure_transition(WebformJobStatus::Running)
                .map_err(|error| WebformStoreError::InvalidTransition {
                    from: error.from,
                    to: error.to,
                })?;
            job.status = WebformJobStatus::Running;
            job.attempt = job.attempt.saturating_add(1);
            job.updated_unix_ms = now_unix_ms;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn reschedule_job(
        &self,
        job_id: &str,
        scheduled_at_unix_ms: u64,
        error: &str,
        now_unix_ms: u64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let job = inner
            .get_mut(job_id)
            .ok_or_else(|| WebformStoreError::JobNotFound(job_id.to_string()))?;
        job.status
            .ensure_transition(WebformJobStatus::Queued)
            .map_err(|error| WebformStoreError::InvalidTransition {
                from: error.from,
                to: error.to,
            })?;
        job.status = WebformJobStatus::Queued;
        job.scheduled_at_unix_ms = scheduled_at_unix_ms.max(now_unix_ms);
        job.last_error = Some(error.to_string());
        job.updated_unix_ms = now_unix_ms;
        Ok(())
    }

    async fn complete_job(
        &self,
        job_id: &str,
        result: WebformJobResult,
        now_unix_ms: u64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let job = inner
            .get_mut(job_id)
            .ok_or_else(|| WebformStoreError::JobNotFound(job_id.to_string()))?;
        job.status
            .ensure_transition(WebformJobStatus::Succeeded)
            .map_err(|error| WebformStoreError::InvalidTransition {
                from: error.from,
                to: error.to,
            })?;
        job.status = WebformJobStatus::Succeeded;
        job.result = Some(result);
        job.completed_at_unix_ms = Some(now_unix_ms);
        job.last_error = None;
        job.updated_unix_ms = now_unix_ms;
        Ok(())
    }

    async fn fail_job(&self, job_id: &str, error: &str, now_unix_ms: u64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let job = inner
            .get_mut(job_id)
            .ok_or_else(|| WebformStoreError::JobNotFound(job_id.to_string()))?;
        job.status
            .ensure_transition(WebformJobStatus::Failed)
            .map_err(|error| WebformStoreError::InvalidTransition {
                from: error.from,
                to: error.to,
            })?;
        job.status = WebformJobStatus::Failed;
        job.last_error = Some(error.to_string());
        job.completed_at_unix_ms = Some(now_unix_ms);
        job.updated_unix_ms = now_unix_ms;
        Ok(())
    }

    async fn retry_job(&self, job_id: &str, now_unix_ms: u64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let job = inner
            .get_mut(job_id)
            .ok_or_else(|| WebformStoreError::JobNotFound(job_id.to_string()))?;
        if job.status != WebformJobStatus::Failed {
            return Err(WebformStoreError::InvalidTransition {
                from: job.status,
                to: WebformJobStatus::Queued,
            });
        }
        job.status = WebformJobStatus::Queued;
        job.attempt = 0;
        job.scheduled_at_unix_ms = now_unix_ms;
        job.completed_at_unix_ms = None;
        job.last_error = None;
        job.updated_unix_ms = now_unix_ms;
        Ok(())
    }

    async fn cancel_job(&self, job_id: &str, reason: &str, now_unix_ms: u64) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let job = inner
            .get_mut(job_id)
            .ok_or_else(|| WebformStoreError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = WebformJobStatus::Failed;
        job.last_error = Some(format!("cancelled: {reason}"));
        job.completed_at_unix_ms = Some(now_unix_ms);
        job.updated_unix_ms = now_unix_ms;
        Ok(true)
    }

    async fn get_job(&self, job_id: &str) -> StoreResult<Option<WebformJob>> {
        let inner = self.inner.read().await;
        Ok(inner.get(job_id).cloned())
    }

    async fn failed_jobs_since(&self, since_unix_ms: u64) -> StoreResult<Vec<WebformJob>> {
        let inner = self.inner.read().await;
        let mut failed: Vec<WebformJob> = inner
            .values()
            .filter(|job| {
                job.status == WebformJobStatus::Failed && job.updated_unix_ms >= since_unix_ms
            })
            .cloned()
            .collect();
        failed.sort_by(|left, right| left.job_id.cmp(&right.job_id));
        Ok(failed)
    }
}

/// Bridges the dispatch router's enqueue seam onto a job store: one webform
/// dispatch becomes one durable queued job derived from the envelope.
pub struct StoreWebformEnqueuer<S: WebformJobStore> {
    store: Arc<S>,
    max_attempts: u32,
}

impl<S: WebformJobStore> StoreWebformEnqueuer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_JOB_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

#[async_trait]
impl<S: WebformJobStore> WebformEnqueue for StoreWebformEnqueuer<S> {
    async fn enqueue_webform_job(
        &self,
        envelope: &ActionEnvelope,
        now_unix_ms: u64,
    ) -> anyhow::Result<String> {
        let target_url = envelope
            .evidence_urls
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("envelope has no evidence URL to act on"))?;
        let payload = SubmissionPayload::sanitized(
            &envelope.identity.name_preview,
            &envelope.identity.email_preview,
            "",
            &envelope.draft.body,
        );
        let mut job = WebformJob::new(
            format!("wfj-{}", envelope.action_id),
            envelope.action_id.clone(),
            envelope.subject_ref.clone(),
            envelope.controller_id.clone(),
            target_url,
            payload,
            now_unix_ms,
        );
        job.max_attempts = self.max_attempts;
        let job_id = job.job_id.clone();
        self.store
            .enqueue_job(job)
            .await
            .map_err(|error| anyhow::anyhow!("failed to enqueue webform job: {error}"))?;
        Ok(job_id)
    }
}
