//! Durable webform automation: job queue, polling worker, per-controller
//! handlers, artifact capture, and failure-spike alerting.
//!
//! The queue is the only coupling point with the dispatch router: dispatch
//! enqueues and returns, the worker drains independently. Claims are atomic
//! conditional updates so overlapping worker instances never double-process
//! a job.

pub mod artifact_store;
pub mod automation_session;
pub mod controller_profile;
pub mod failure_alerting;
pub mod handler_registry;
pub mod job_store;
mod sqlite;
pub mod webform_job;
pub mod worker;

pub use artifact_store::{ArtifactRef, ArtifactStore};
pub use automation_session::{
    AutomationSession, AutomationSessionFactory, AutomationStepError, ScriptedAutomationSession,
    ScriptedSessionFactory, StepResult,
};
pub use controller_profile::{
    builtin_controller_profiles, load_controller_profiles, ControllerProfile,
    ControllerProfileFile, ControllerProfileSet,
};
pub use failure_alerting::{
    evaluate_failure_spike, AlertSink, FailureSpikeConfig, FailureSpikeEvent, WebhookAlertSink,
    ALERT_TYPE_WEBFORM_FAILURE_SPIKE,
};
pub use handler_registry::{
    ControllerHandler, GenericFormHandler, HandlerOutcome, HandlerRegistry, JustdialHandler,
    SulekhaHandler,
};
pub use job_store::{
    InMemoryWebformJobStore, StoreResult, StoreWebformEnqueuer, WebformJobStore, WebformStoreError,
};
pub use sqlite::SqliteWebformJobStore;
pub use webform_job::{
    SubmissionPayload, WebformJob, WebformJobResult, WebformJobStatus, DEFAULT_JOB_MAX_ATTEMPTS,
};
pub use worker::{
    backoff_delay_ms, extract_ticket_reference, jittered_backoff_delay_ms, run_worker_batch,
    ActionTracker, WebformWorkerConfig, WorkerBatchReport,
};
