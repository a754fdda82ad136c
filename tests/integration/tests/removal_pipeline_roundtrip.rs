//! End-to-end pipeline coverage: discovery hits flow through candidate
//! selection, sealing, dispatch, and the webform worker against scripted
//! automation and in-memory stores.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use veil_contract::{ActionChannel, ActionEnvelope, ActionStatus, BrokerHit};
use veil_dispatch::{
    route_action, DirectSendError, DirectSendReceipt, DirectSendRequest, DirectSender,
    DispatchRouterConfig, DispatchState,
};
use veil_policy::{
    builtin_capability_table, resolve_effective_policy, select_auto_candidates,
    AutoCandidateConfig,
};
use veil_proof::{HmacProofSigner, ProofLedger};
use veil_webform::{
    run_worker_batch, ActionTracker, AlertSink, ArtifactStore, FailureSpikeConfig,
    FailureSpikeEvent, HandlerRegistry, InMemoryWebformJobStore, ScriptedAutomationSession,
    ScriptedSessionFactory, StoreWebformEnqueuer, WebformJobStatus, WebformJobStore,
    WebformWorkerConfig,
};

struct UnusedSender;

#[async_trait]
impl DirectSender for UnusedSender {
    fn is_channel_configured(&self, _channel: ActionChannel) -> bool {
        true
    }

    async fn send(
        &self,
        _channel: ActionChannel,
        _request: &DirectSendRequest,
    ) -> Result<DirectSendReceipt, DirectSendError> {
        Err(DirectSendError {
            reason_code: "provider_rejected".to_string(),
            detail: "direct sends are not expected in this scenario".to_string(),
            retryable: false,
            http_status: Some(422),
            retry_after_ms: None,
        })
    }
}

/// Tracks parent-action transitions the way the persistence collaborator
/// would, enforcing the envelope state machine.
#[derive(Default)]
struct EnvelopeTracker {
    envelopes: Mutex<Vec<ActionEnvelope>>,
}

impl EnvelopeTracker {
    fn adopt(&self, envelope: ActionEnvelope) {
        self.envelopes.lock().expect("tracker lock").push(envelope);
    }

    fn status_of(&self, action_id: &str) -> Option<ActionStatus> {
        self.envelopes
            .lock()
            .expect("tracker lock")
            .iter()
            .find(|envelope| envelope.action_id == action_id)
            .map(|envelope| envelope.status)
    }
}

#[async_trait]
impl ActionTracker for EnvelopeTracker {
    async fn action_sent(
        &self,
        action_id: &str,
        _job_id: &str,
        now_unix_ms: u64,
    ) -> anyhow::Result<()> {
        let mut envelopes = self.envelopes.lock().expect("tracker lock");
        let envelope = envelopes
            .iter_mut()
            .find(|envelope| envelope.action_id == action_id)
            .ok_or_else(|| anyhow::anyhow!("unknown action {action_id}"))?;
        envelope
            .transition(ActionStatus::Sent, now_unix_ms)
            .map_err(|error| anyhow::anyhow!("{error}"))?;
        Ok(())
    }

    async fn action_escalated(
        &self,
        action_id: &str,
        _next_attempt_at_unix_ms: u64,
        now_unix_ms: u64,
    ) -> anyhow::Result<()> {
        let mut envelopes = self.envelopes.lock().expect("tracker lock");
        let envelope = envelopes
            .iter_mut()
            .find(|envelope| envelope.action_id == action_id)
            .ok_or_else(|| anyhow::anyhow!("unknown action {action_id}"))?;
        // A webform dead-letter escalates an action that was never sent on a
        // direct channel; it reaches escalate_pending through sent.
        if envelope.status == ActionStatus::Prepared {
            envelope
                .transition(ActionStatus::Sent, now_unix_ms)
                .map_err(|error| anyhow::anyhow!("{error}"))?;
        }
        envelope
            .transition(ActionStatus::EscalatePending, now_unix_ms)
            .map_err(|error| anyhow::anyhow!("{error}"))?;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<FailureSpikeEvent>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn deliver(&self, event: &FailureSpikeEvent) -> anyhow::Result<()> {
        self.events.lock().expect("sink lock").push(event.clone());
        Ok(())
    }
}

fn envelope_for_candidate(hit: &BrokerHit, controller_id: &str, index: usize) -> ActionEnvelope {
    let mut envelope = ActionEnvelope::new_draft(
        format!("act-{index}"),
        controller_id,
        ActionChannel::Webform,
        "Removal request under applicable data protection law",
        "Please remove the linked listing for the named data subject.",
        vec![hit.url.clone()],
        1_000,
    );
    envelope.subject_ref = "subj-1".to_string();
    envelope.identity.name_preview = hit.preview.name.clone();
    envelope.identity.email_preview = hit.preview.email.clone();
    envelope
}

fn working_session() -> ScriptedAutomationSession {
    ScriptedAutomationSession::with_selectors(
        [
            "input[name=name]",
            "input[name=email]",
            "textarea[name=feedback]",
            "textarea[name=message]",
            "button[type=submit]",
        ],
        "<html>Thank you. Ticket Number: JD-7734</html>",
    )
}

fn failing_session() -> ScriptedAutomationSession {
    ScriptedAutomationSession::with_selectors(
        ["input[name=name]", "input[name=email]"],
        "<html></html>",
    )
}

#[tokio::test]
async fn integration_hit_to_sent_action_through_webform_queue() {
    let table = builtin_capability_table();
    let mut hit = BrokerHit::new("Justdial", "https://justdial.com/Mumbai/listing-1", 0.92);
    hit.preview.name = "J. D.".to_string();
    hit.preview.email = "j***@example.com".to_string();

    let report =
        select_auto_candidates(&[hit], &table, None, &AutoCandidateConfig::default());
    assert_eq!(report.accepted.len(), 1);
    let candidate = &report.accepted[0];

    // Seal before dispatch; the hash is the idempotency key for storage.
    let ledger = ProofLedger::in_memory();
    let signer = HmacProofSigner::new("ops-v1", b"integration-secret".to_vec()).expect("signer");
    let mut envelope = envelope_for_candidate(&candidate.hit, &candidate.controller_id, 0);
    let sealed = ledger.seal(&mut envelope, &signer, 1_500).expect("seal");
    assert!(!sealed.idempotent);

    // Idempotency: a second identical envelope resolves to the same record.
    let mut duplicate = envelope_for_candidate(&candidate.hit, &candidate.controller_id, 0);
    let replay = ledger.seal(&mut duplicate, &signer, 2_000).expect("reseal");
    assert!(replay.idempotent);
    assert_eq!(replay.record.content_hash, sealed.record.content_hash);

    let store = Arc::new(InMemoryWebformJobStore::new());
    let enqueuer = StoreWebformEnqueuer::new(store.clone());
    let policy = resolve_effective_policy(&table, None, &candidate.controller_id, None, None);
    let outcome = route_action(
        &mut envelope,
        &policy,
        &UnusedSender,
        &enqueuer,
        &DispatchRouterConfig::default(),
        2_500,
    )
    .await
    .expect("route");
    assert_eq!(outcome.state, DispatchState::Sent);
    let job_id = outcome.webform_job_id.expect("job id");
    assert_eq!(envelope.status, ActionStatus::Prepared);

    let tracker = EnvelopeTracker::default();
    tracker.adopt(envelope);

    let temp = tempfile::tempdir().expect("tempdir");
    let batch = run_worker_batch(
        store.as_ref(),
        &HandlerRegistry::builtin(),
        &veil_webform::builtin_controller_profiles(),
        &ScriptedSessionFactory::new(working_session()),
        &ArtifactStore::new(temp.path()),
        &tracker,
        &RecordingSink::default(),
        &WebformWorkerConfig::default(),
    )
    .await
    .expect("worker batch");
    assert_eq!(batch.claimed, 1);
    assert_eq!(batch.succeeded, 1);

    let job = store.get_job(&job_id).await.expect("get").expect("job");
    assert_eq!(job.status, WebformJobStatus::Succeeded);
    let result = job.result.expect("result");
    assert_eq!(result.ticket_reference.as_deref(), Some("JD-7734"));
    assert!(!result.artifact_paths.is_empty());
    assert_eq!(tracker.status_of("act-0"), Some(ActionStatus::Sent));
}

#[tokio::test]
async fn integration_exhausted_retries_escalate_and_trip_the_alert() {
    let table = builtin_capability_table();
    let store = Arc::new(InMemoryWebformJobStore::new());
    let enqueuer = StoreWebformEnqueuer::new(store.clone()).with_max_attempts(2);
    let tracker = EnvelopeTracker::default();
    let policy = resolve_effective_policy(&table, None, "justdial", None, None);

    let mut job_ids = Vec::new();
    for index in 0..3 {
        let hit = BrokerHit::new(
            "Justdial",
            format!("https://justdial.com/Mumbai/listing-{index}"),
            0.92,
        );
        let mut envelope = envelope_for_candidate(&hit, "justdial", index);
        let outcome = route_action(
            &mut envelope,
            &policy,
            &UnusedSender,
            &enqueuer,
            &DispatchRouterConfig::default(),
            2_500,
        )
        .await
        .expect("route");
        job_ids.push(outcome.webform_job_id.expect("job id"));
        tracker.adopt(envelope);
    }

    let sink = RecordingSink::default();
    let temp = tempfile::tempdir().expect("tempdir");
    let config = WebformWorkerConfig {
        batch_size: 10,
        base_backoff_ms: 1,
        backoff_cap_ms: 2,
        alerting: FailureSpikeConfig {
            window_minutes: 60,
            failure_threshold: 3,
        },
        ..WebformWorkerConfig::default()
    };
    let registry = HandlerRegistry::builtin();
    let profiles = veil_webform::builtin_controller_profiles();
    let factory = ScriptedSessionFactory::new(failing_session());
    let artifacts = ArtifactStore::new(temp.path());

    for _ in 0..6 {
        let report = run_worker_batch(
            store.as_ref(),
            &registry,
            &profiles,
            &factory,
            &artifacts,
            &tracker,
            &sink,
            &config,
        )
        .await
        .expect("worker batch");
        if report.claimed == 0 && !sink.events.lock().expect("lock").is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    for (index, job_id) in job_ids.iter().enumerate() {
        let job = store.get_job(job_id).await.expect("get").expect("job");
        assert_eq!(job.status, WebformJobStatus::Failed, "job {index}");
        assert_eq!(job.attempt, 2, "job {index} spent its budget");
        assert_eq!(
            tracker.status_of(&format!("act-{index}")),
            Some(ActionStatus::EscalatePending)
        );
    }

    let events = sink.events.lock().expect("lock");
    assert!(!events.is_empty(), "spike alert should have fired");
    let event = &events[0];
    assert_eq!(event.event_type, "WEBFORM_FAILURE_SPIKE");
    assert_eq!(event.total_failed, 3);
    assert_eq!(event.by_domain.get("justdial.com"), Some(&3));
}
