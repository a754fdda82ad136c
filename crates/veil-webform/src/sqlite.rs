//! SQLite-backed `WebformJobStore` with durable retry scheduling.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::job_store::{StoreResult, WebformJobStore, WebformStoreError};
use crate::webform_job::{SubmissionPayload, WebformJob, WebformJobResult, WebformJobStatus};

/// Persistent job queue backend. Retry schedules live in
/// `scheduled_at_unix_ms`, so pending retries survive process restarts.
#[derive(Debug)]
pub struct SqliteWebformJobStore {
    db_path: PathBuf,
}

impl SqliteWebformJobStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS webform_jobs (
                job_id TEXT PRIMARY KEY,
                action_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                controller_id TEXT NOT NULL,
                target_url TEXT NOT NULL,
                submission_url TEXT NULL,
                payload_json TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                max_attempts INTEGER NOT NULL,
                scheduled_at_unix_ms INTEGER NOT NULL,
                completed_at_unix_ms INTEGER NULL,
                last_error TEXT NULL,
                result_json TEXT NULL,
                created_unix_ms INTEGER NOT NULL,
                updated_unix_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_webform_jobs_due
                ON webform_jobs (status, scheduled_at_unix_ms);

            CREATE INDEX IF NOT EXISTS idx_webform_jobs_failed
                ON webform_jobs (status, updated_unix_ms);
            "#,
        )?;
        Ok(())
    }
}

fn ms_to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn ms_from_db(field: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| WebformStoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

fn status_from_db(raw: &str) -> StoreResult<WebformJobStatus> {
    WebformJobStatus::parse(raw).ok_or(WebformStoreError::InvalidPersistedValue {
        field: "status",
        value: raw.to_string(),
    })
}

fn row_to_job(row: &rusqlite::Row<'_>) -> Result<RawJobRow, rusqlite::Error> {
    Ok(RawJobRow {
        job_id: row.get(0)?,
        action_id: row.get(1)?,
        subject_id: row.get(2)?,
        controller_id: row.get(3)?,
        target_url: row.get(4)?,
        submission_url: row.get(5)?,
        payload_json: row.get(6)?,
        status: row.get(7)?,
        attempt: row.get(8)?,
        max_attempts: row.get(9)?,
        scheduled_at_unix_ms: row.get(10)?,
        completed_at_unix_ms: row.get(11)?,
        last_error: row.get(12)?,
        result_json: row.get(13)?,
        created_unix_ms: row.get(14)?,
        updated_unix_ms: row.get(15)?,
    })
}

struct RawJobRow {
    job_id: String,
    action_id: String,
    subject_id: String,
    controller_id: String,
    target_url: String,
    submission_url: Option<String>,
    payload_json: String,
    status: String,
    attempt: i64,
    max_attempts: i64,
    scheduled_at_unix_ms: i64,
    completed_at_unix_ms: Option<i64>,
    last_error: Option<String>,
    result_json: Option<String>,
    created_unix_ms: i64,
    updated_unix_ms: i64,
}

impl RawJobRow {
    fn into_job(self) -> StoreResult<WebformJob> {
        let payload: SubmissionPayload = serde_json::from_str(&self.payload_json)?;
        let result: Option<WebformJobResult> = match self.result_json.as_deref() {
            Some(raw) => Some(serde_json::from_str(raw)?),
            None => None,
        };
        Ok(WebformJob {
            job_id: self.job_id,
            action_id: self.action_id,
            subject_id: self.subject_id,
            controller_id: self.controller_id,
            target_url: self.target_url,
            submission_url: self.submission_url,
            payload,
            status: status_from_db(&self.status)?,
            attempt: u32::try_from(self.attempt).map_err(|_| {
                WebformStoreError::InvalidPersistedValue {
                    field: "attempt",
                    value: self.attempt.to_string(),
                }
            })?,
            max_attempts: u32::try_from(self.max_attempts).map_err(|_| {
                WebformStoreError::InvalidPersistedValue {
                    field: "max_attempts",
                    value: self.max_attempts.to_string(),
                }
            })?,
            scheduled_at_unix_ms: ms_from_db("scheduled_at_unix_ms", self.scheduled_at_unix_ms)?,
            completed_at_unix_ms: self
                .completed_at_unix_ms
                .map(|value| ms_from_db("completed_at_unix_ms", value))
                .transpose()?,
            last_error: self.last_error,
            result,
            created_unix_ms: ms_from_db("created_unix_ms", self.created_unix_ms)?,
            updated_unix_ms: ms_from_db("updated_unix_ms", self.updated_unix_ms)?,
        })
    }
}

const SELECT_JOB_COLUMNS: &str = r#"
    SELECT job_id, action_id, subject_id, controller_id, target_url, submission_url,
           payload_json, status, attempt, max_attempts, scheduled_at_unix_ms,
           completed_at_unix_ms, last_error, result_json, created_unix_ms, updated_unix_ms
    FROM webform_jobs
"#;

impl SqliteWebformJobStore {
    fn load_job(&self, connection: &Connection, job_id: &str) -> StoreResult<WebformJob> {
        let raw = connection
            .query_row(
                &format!("{SELECT_JOB_COLUMNS} WHERE job_id = ?1"),
                params![job_id],
                row_to_job,
            )
            .optional()?
            .ok_or_else(|| WebformStoreError::JobNotFound(job_id.to_string()))?;
        raw.into_job()
    }
}

#[async_trait]
impl WebformJobStore for SqliteWebformJobStore {
    async fn enqueue_job(&self, mut job: WebformJob) -> StoreResult<()> {
        job.status = WebformJobStatus::Queued;
        job.scheduled_at_unix_ms = job.scheduled_at_unix_ms.max(job.created_unix_ms);

        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let exists = transaction
            .query_row(
                "SELECT 1 FROM webform_jobs WHERE job_id = ?1",
                params![job.job_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(WebformStoreError::JobAlreadyExists(job.job_id));
        }

        transaction.execute(
            r#"
            INSERT INTO webform_jobs (
                job_id, action_id, subject_id, controller_id, target_url, submission_url,
                payload_json, status, attempt, max_attempts, scheduled_at_unix_ms,
                completed_at_unix_ms, last_error, result_json, created_unix_ms, updated_unix_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                job.job_id,
                job.action_id,
                job.subject_id,
                job.controller_id,
                job.target_url,
                job.submission_url,
                serde_json::to_string(&job.payload)?,
                job.status.as_str(),
                i64::from(job.attempt),
                i64::from(job.max_attempts),
                ms_to_db(job.scheduled_at_unix_ms),
                job.completed_at_unix_ms.map(ms_to_db),
                job.last_error,
                job.result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                ms_to_db(job.created_unix_ms),
                ms_to_db(job.updated_unix_ms),
            ],
        )?;
        transaction.commit()?;
        Ok(())
    }

    async fn claim_due_jobs(&self, now_unix_ms: u64, limit: usize) -> StoreResult<Vec<WebformJob>> {
        let mut connection = self.open_connection()?;
        let transaction =
            connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let due_ids: Vec<String> = {
            let mut statement = transaction.prepare(
                r#"
                SELECT job_id FROM webform_jobs
                WHERE status = 'queued' AND scheduled_at_unix_ms <= ?1
                ORDER BY scheduled_at_unix_ms ASC, job_id ASC
                LIMIT ?2
                "#,
            )?;
            let rows = statement.query_map(
                params![ms_to_db(now_unix_ms), i64::try_from(limit).unwrap_or(i64::MAX)],
                |row| row.get::<_, String>(0),
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut claimed = Vec::new();
        for job_id in due_ids {
            // The conditional update is the claim: a concurrent worker that
            // already flipped this row to running changes zero rows here.
            let changed = transaction.execute(
                r#"
                UPDATE webform_jobs
                SET status = 'running', attempt = attempt + 1, updated_unix_ms = ?2
                WHERE job_id = ?1 AND status = 'queued' AND scheduled_at_unix_ms <= ?3
                "#,
                params![job_id, ms_to_db(now_unix_ms), ms_to_db(now_unix_ms)],
            )?;
            if changed == 0 {
                continue;
            }
            claimed.push(self.load_job(&transaction, &job_id)?);
        }
        transaction.commit()?;
        Ok(claimed)
    }

    async fn reschedule_job(
        &self,
        job_id: &str,
        scheduled_at_unix_ms: u64,
        error: &str,
        now_unix_ms: u64,
    ) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let current = self.load_job(&connection, job_id)?;
        current
            .status
            .ensure_transition(WebformJobStatus::Queued)
            .map_err(|error| WebformStoreError::InvalidTransition {
                from: error.from,
                to: error.to,
            })?;
        connection.execute(
            r#"
            UPDATE webform_jobs
            SET status = 'queued', scheduled_at_unix_ms = ?2, last_error = ?3,
                updated_unix_ms = ?4
            WHERE job_id = ?1
            "#,
            params![
                job_id,
                ms_to_db(scheduled_at_unix_ms.max(now_unix_ms)),
                error,
                ms_to_db(now_unix_ms),
            ],
        )?;
        Ok(())
    }

    async fn complete_job(
        &self,
        job_id: &str,
        result: WebformJobResult,
        now_unix_ms: u64,
    ) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let current = self.load_job(&connection, job_id)?;
        current
            .status
            .ensure_transition(WebformJobStatus::Succeeded)
            .map_err(|error| WebformStoreError::InvalidTransition {
                from: error.from,
                to: error.to,
            })?;
        connection.execute(
            r#"
            UPDATE webform_jobs
            SET status = 'succeeded', result_json = ?2, completed_at_unix_ms = ?3,
                last_error = NULL, updated_unix_ms = ?3
            WHERE job_id = ?1
            "#,
            params![job_id, serde_json::to_string(&result)?, ms_to_db(now_unix_ms)],
        )?;
        Ok(())
    }

    async fn fail_job(&self, job_id: &str, error: &str, now_unix_ms: u64) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let current = self.load_job(&connection, job_id)?;
        current
            .status
            .ensure_transition(WebformJobStatus::Failed)
            .map_err(|error| WebformStoreError::InvalidTransition {
                from: error.from,
                to: error.to,
            })?;
        connection.execute(
            r#"
            UPDATE webform_jobs
            SET status = 'failed', last_error = ?2, completed_at_unix_ms = ?3,
                updated_unix_ms = ?3
            WHERE job_id = ?1
            "#,
            params![job_id, error, ms_to_db(now_unix_ms)],
        )?;
        Ok(())
    }

    async fn retry_job(&self, job_id: &str, now_unix_ms: u64) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let current = self.load_job(&connection, job_id)?;
        if current.status != WebformJobStatus::Failed {
            return Err(WebformStoreError::InvalidTransition {
                from: current.status,
                to: WebformJobStatus::Queued,
            });
        }
        connection.execute(
            r#"
            UPDATE webform_jobs
            SET status = 'queued', attempt = 0, scheduled_at_unix_ms = ?2,
                completed_at_unix_ms = NULL, last_error = NULL, updated_unix_ms = ?2
            WHERE job_id = ?1
            "#,
            params![job_id, ms_to_db(now_unix_ms)],
        )?;
        Ok(())
    }

    async fn cancel_job(&self, job_id: &str, reason: &str, now_unix_ms: u64) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let current = self.load_job(&connection, job_id)?;
        if current.status.is_terminal() {
            return Ok(false);
        }
        connection.execute(
            r#"
            UPDATE webform_jobs
            SET status = 'failed', last_error = ?2, completed_at_unix_ms = ?3,
                updated_unix_ms = ?3
            WHERE job_id = ?1
            "#,
            params![job_id, format!("cancelled: {reason}"), ms_to_db(now_unix_ms)],
        )?;
        Ok(true)
    }

    async fn get_job(&self, job_id: &str) -> StoreResult<Option<WebformJob>> {
        let connection = self.open_connection()?;
        match self.load_job(&connection, job_id) {
            Ok(job) => Ok(Some(job)),
            Err(WebformStoreError::JobNotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn failed_jobs_since(&self, since_unix_ms: u64) -> StoreResult<Vec<WebformJob>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(&format!(
            "{SELECT_JOB_COLUMNS} WHERE status = 'failed' AND updated_unix_ms >= ?1 ORDER BY job_id ASC"
        ))?;
        let rows = statement.query_map(params![ms_to_db(since_unix_ms)], row_to_job)?;
        let mut jobs = Vec::new();
        for raw in rows {
            jobs.push(raw?.into_job()?);
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::SqliteWebformJobStore;
    use crate::job_store::WebformJobStore;
    use crate::webform_job::{SubmissionPayload, WebformJob, WebformJobResult, WebformJobStatus};

    fn sample_job(job_id: &str, scheduled_at: u64) -> WebformJob {
        let mut job = WebformJob::new(
            job_id,
            format!("act-{job_id}"),
            "subj-1",
            "justdial",
            "https://justdial.com/x",
            SubmissionPayload::sanitized("J. D.", "j***@example.com", "", "Please remove."),
            1_000,
        );
        job.scheduled_at_unix_ms = scheduled_at;
        job
    }

    #[tokio::test]
    async fn integration_jobs_round_trip_through_sqlite() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteWebformJobStore::new(temp.path().join("queue/jobs.sqlite"))
            .expect("open store");
        store.enqueue_job(sample_job("a", 2_000)).await.expect("enqueue");

        let claimed = store.claim_due_jobs(3_000, 10).await.expect("claim");
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempt, 1);
        assert_eq!(claimed[0].status, WebformJobStatus::Running);

        store
            .complete_job(
                "a",
                WebformJobResult {
                    confirmation_excerpt: "Thank you, reference VR-1001".to_string(),
                    ticket_reference: Some("VR-1001".to_string()),
                    artifact_paths: vec!["a/page.html".to_string()],
                    artifact_hashes: vec!["deadbeef".to_string()],
                },
                4_000,
            )
            .await
            .expect("complete");

        let job = store.get_job("a").await.expect("get").expect("exists");
        assert_eq!(job.status, WebformJobStatus::Succeeded);
        assert_eq!(job.completed_at_unix_ms, Some(4_000));
        assert_eq!(
            job.result.expect("result").ticket_reference.as_deref(),
            Some("VR-1001")
        );
    }

    #[tokio::test]
    async fn integration_retry_schedule_survives_reopen() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("jobs.sqlite");
        {
            let store = SqliteWebformJobStore::new(&db_path).expect("open store");
            store.enqueue_job(sample_job("a", 1_000)).await.expect("enqueue");
            store.claim_due_jobs(2_000, 1).await.expect("claim");
            store
                .reschedule_job("a", 120_000, "navigation timeout", 2_500)
                .await
                .expect("reschedule");
        }

        let reopened = SqliteWebformJobStore::new(&db_path).expect("reopen store");
        let early = reopened.claim_due_jobs(100_000, 10).await.expect("early poll");
        assert!(early.is_empty());
        let due = reopened.claim_due_jobs(130_000, 10).await.expect("due poll");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempt, 2);
    }

    #[tokio::test]
    async fn regression_claim_skips_jobs_scheduled_in_the_future() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteWebformJobStore::new(temp.path().join("jobs.sqlite"))
            .expect("open store");
        store.enqueue_job(sample_job("later", 90_000)).await.expect("enqueue");
        let claimed = store.claim_due_jobs(10_000, 10).await.expect("claim");
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn integration_cancel_and_rearm_round_trip() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteWebformJobStore::new(temp.path().join("jobs.sqlite"))
            .expect("open store");
        store.enqueue_job(sample_job("a", 1_000)).await.expect("enqueue");

        assert!(store.cancel_job("a", "operator request", 2_000).await.expect("cancel"));
        assert!(!store.cancel_job("a", "twice", 3_000).await.expect("cancel again"));

        store.retry_job("a", 4_000).await.expect("rearm");
        let job = store.get_job("a").await.expect("get").expect("exists");
        assert_eq!(job.status, WebformJobStatus::Queued);
        assert_eq!(job.attempt, 0);

        let failed = store.failed_jobs_since(0).await.expect("failed query");
        assert!(failed.is_empty());
    }
}
