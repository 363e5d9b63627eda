//! Orchestrator - sequences one advice run
//!
//! SNAPSHOT → CLASSIFY → ROUTE → EXPERTS → SYNTHESIZE → DONE
//!
//! The client connection is checked at every stage boundary. An in-flight
//! stage always runs to completion; once the client is gone no further stage
//! starts and nothing else is emitted.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{snapshot_fingerprint, RunLog, RunRecord};
use crate::classifier::Classifier;
use crate::config::PipelinePolicy;
use crate::error::OrchestrationError;
use crate::experts::{ExpertExecutor, ExpertKind};
use crate::llm::{AnswerFragment, CompletionClient};
use crate::models::{AdviceRequest, Classification};
use crate::router::Router;
use crate::session::{SessionChannel, SessionEvent};
use crate::snapshot::SnapshotProvider;
use crate::synthesizer::Synthesizer;
use crate::Result;

mod state;

pub use state::{RunState, SessionState, StageTiming};

/// Outcome of one run, as seen by the caller that spawned it.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub terminal: RunState,
    pub timings: Vec<StageTiming>,
    pub experts: Vec<ExpertKind>,
    pub degraded: usize,
    pub answer: String,
}

/// What a run has learned so far; feeds the ledger on every exit path.
#[derive(Default)]
struct RunProgress {
    snapshot_fingerprint: Option<String>,
    classification: Option<Classification>,
    experts: Vec<ExpertKind>,
    degraded: usize,
}

pub struct Orchestrator {
    snapshots: Arc<dyn SnapshotProvider>,
    classifier: Classifier,
    router: Router,
    executor: ExpertExecutor,
    synthesizer: Synthesizer,
    run_log: Arc<RunLog>,
}

impl Orchestrator {
    pub fn new(
        snapshots: Arc<dyn SnapshotProvider>,
        client: Arc<dyn CompletionClient>,
        policy: &PipelinePolicy,
        run_log: Arc<RunLog>,
    ) -> Self {
        Self {
            snapshots,
            classifier: Classifier::new(client.clone(), policy.classifier_timeout),
            router: Router::new(policy.max_experts),
            executor: ExpertExecutor::new(
                client.clone(),
                policy.expert_concurrency,
                policy.expert_timeout,
            ),
            synthesizer: Synthesizer::new(client),
            run_log,
        }
    }

    pub fn run_log(&self) -> &Arc<RunLog> {
        &self.run_log
    }

    /// Run the pipeline to a terminal state. The run is recorded and the
    /// channel closed exactly once before this returns, whatever the outcome.
    pub async fn run(&self, request: AdviceRequest, mut channel: SessionChannel) -> RunReport {
        let mut session = SessionState::new(Uuid::new_v4());
        let mut progress = RunProgress::default();

        info!(
            run_id = %session.run_id(),
            account_id = %request.account_id,
            question_len = request.question.len(),
            "Orchestrator: starting run"
        );

        let outcome = self
            .drive(&request, &channel, &mut session, &mut progress)
            .await;

        let mut answer = String::new();
        match outcome {
            Ok(text) => {
                if let Err(e) = session.advance(RunState::Done) {
                    warn!(run_id = %session.run_id(), error = %e, "Could not enter DONE");
                }
                channel.stop_heartbeat();

                let complete = SessionEvent::Complete {
                    done: true,
                    run_id: session.run_id(),
                    answer: text.clone(),
                    timings: session.stage_timings().to_vec(),
                };
                if channel.emit(complete).await.is_err() {
                    debug!(run_id = %session.run_id(), "Client left before completion event");
                }
                answer = text;
            }
            Err(OrchestrationError::ClientGone) => {
                let _ = session.advance(RunState::Aborted);
                channel.stop_heartbeat();
                info!(
                    run_id = %session.run_id(),
                    elapsed_ms = session.elapsed_ms(),
                    "Client disconnected, run aborted"
                );
            }
            Err(e) => {
                let failed_in = session.state();
                let _ = session.advance(RunState::Error);
                channel.stop_heartbeat();
                error!(
                    run_id = %session.run_id(),
                    stage = ?failed_in,
                    error = %e,
                    "Run failed"
                );

                if e.is_user_visible() && !channel.is_client_gone() {
                    let _ = channel
                        .emit(SessionEvent::Error {
                            error: e.client_message(),
                        })
                        .await;
                }
            }
        }

        let timings = session.stage_timings().to_vec();
        self.run_log
            .record(RunRecord {
                run_id: session.run_id(),
                account_id: request.account_id.clone(),
                snapshot_fingerprint: progress.snapshot_fingerprint,
                classification: progress.classification,
                experts: progress.experts.clone(),
                degraded_experts: progress.degraded,
                terminal_state: session.state(),
                stage_timings: timings.clone(),
                created_at: chrono::Utc::now(),
                elapsed_ms: session.elapsed_ms(),
            })
            .await;

        // Recorded before closing so a finished stream implies a ledger entry.
        channel.close();

        info!(
            run_id = %session.run_id(),
            terminal = ?session.state(),
            aborted = session.is_aborted(),
            elapsed_ms = session.elapsed_ms(),
            "Orchestrator: run finished"
        );

        RunReport {
            run_id: session.run_id(),
            terminal: session.state(),
            timings,
            experts: progress.experts,
            degraded: progress.degraded,
            answer,
        }
    }

    /// Every stage up to the end of synthesis. Returns the full answer text.
    async fn drive(
        &self,
        request: &AdviceRequest,
        channel: &SessionChannel,
        session: &mut SessionState,
        progress: &mut RunProgress,
    ) -> Result<String> {
        request.validate()?;
        let question = request.question.trim();

        // === SNAPSHOT ===
        enter(session, channel, RunState::Snapshot)?;
        channel
            .emit(SessionEvent::status(
                RunState::Snapshot,
                "Loading your financial snapshot",
            ))
            .await?;

        let snapshot = self.snapshots.fetch_snapshot(&request.account_id).await?;
        progress.snapshot_fingerprint = Some(snapshot_fingerprint(&snapshot));
        debug!(
            run_id = %session.run_id(),
            items = snapshot.item_count(),
            "Snapshot loaded"
        );

        // === CLASSIFY ===
        enter(session, channel, RunState::Classify)?;
        let classification = self.classifier.classify(question, snapshot.totals()).await?;
        progress.classification = Some(classification);

        channel
            .emit(SessionEvent::status(
                RunState::Classify,
                format!(
                    "Treating this as a {} question ({})",
                    classification.question_type, classification.emotional_state
                ),
            ))
            .await?;

        // === ROUTE ===
        enter(session, channel, RunState::Route)?;
        let selection = self.router.route(question, &classification, &snapshot);
        progress.experts = selection.experts().to_vec();

        let names: Vec<&str> = selection
            .experts()
            .iter()
            .map(|kind| kind.spec().display_name)
            .collect();
        channel
            .emit(SessionEvent::status(
                RunState::Route,
                format!("Consulting {}", names.join(", ")),
            ))
            .await?;

        // === EXPERTS ===
        enter(session, channel, RunState::Experts)?;
        let results = self
            .executor
            .run_all(&selection, question, &classification, &snapshot, channel)
            .await;
        progress.degraded = results.iter().filter(|r| r.degraded).count();

        if progress.degraded > 0 {
            warn!(
                run_id = %session.run_id(),
                degraded = progress.degraded,
                experts = results.len(),
                "Continuing with degraded expert output"
            );
        }

        // === SYNTHESIZE ===
        enter(session, channel, RunState::Synthesize)?;
        channel
            .emit(SessionEvent::status(
                RunState::Synthesize,
                "Putting your answer together",
            ))
            .await?;

        let mut stream = self
            .synthesizer
            .synthesize(&snapshot, question, &classification, &results)
            .await
            .map_err(as_stream_error)?;

        let mut answer = String::new();
        let mut finished = false;

        while let Some(fragment) = stream.next().await {
            match fragment.map_err(as_stream_error)? {
                AnswerFragment::Text(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    answer.push_str(&text);
                    channel.emit(SessionEvent::Delta { delta: text }).await?;
                }
                AnswerFragment::End { finish_reason } => {
                    debug!(
                        run_id = %session.run_id(),
                        finish_reason = ?finish_reason,
                        answer_len = answer.len(),
                        "Synthesis stream finished"
                    );
                    finished = true;
                    break;
                }
            }
        }

        if !finished {
            return Err(OrchestrationError::Stream(
                "answer stream ended without a completion marker".to_string(),
            ));
        }

        Ok(answer)
    }
}

/// Stage boundary: stop if the client is gone, otherwise advance.
fn enter(session: &mut SessionState, channel: &SessionChannel, next: RunState) -> Result<()> {
    if channel.is_client_gone() {
        return Err(OrchestrationError::ClientGone);
    }

    session.advance(next)?;
    info!(run_id = %session.run_id(), stage = ?next, "Stage entered");
    Ok(())
}

fn as_stream_error(e: OrchestrationError) -> OrchestrationError {
    match e {
        OrchestrationError::ClientGone | OrchestrationError::Stream(_) => e,
        other => OrchestrationError::Stream(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::StreamScript;
    use crate::llm::ScriptedCompletionClient;
    use crate::models::FinancialSnapshot;
    use crate::snapshot::InMemorySnapshotProvider;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    async fn orchestrator(client: Arc<ScriptedCompletionClient>) -> Orchestrator {
        let snapshots = Arc::new(InMemorySnapshotProvider::with_demo_account().await);
        Orchestrator::new(
            snapshots,
            client,
            &PipelinePolicy::default(),
            Arc::new(RunLog::new()),
        )
    }

    async fn drain(mut rx: mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            if event != SessionEvent::KeepAlive {
                events.push(event);
            }
        }
        events
    }

    fn open() -> (SessionChannel, mpsc::Receiver<SessionEvent>) {
        SessionChannel::pair(64, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_events_arrive_in_stage_order() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let orchestrator = orchestrator(client.clone()).await;
        let (channel, rx) = open();

        let report = orchestrator
            .run(AdviceRequest::new("Should I pay off my card first?", "demo"), channel)
            .await;
        let events = drain(rx).await;

        assert_eq!(report.terminal, RunState::Done);
        assert_eq!(report.answer, "Here is where you stand today.");

        assert!(matches!(
            events[0],
            SessionEvent::Status { stage: RunState::Snapshot, .. }
        ));
        assert!(matches!(
            events[1],
            SessionEvent::Status { stage: RunState::Classify, .. }
        ));

        for kind in &report.experts {
            let start = events
                .iter()
                .position(|e| matches!(e, SessionEvent::ExpertStart { agent, .. } if agent == kind))
                .unwrap();
            let done = events
                .iter()
                .position(|e| matches!(e, SessionEvent::ExpertComplete { agent, .. } if agent == kind))
                .unwrap();
            assert!(start < done);
        }

        let first_delta = events
            .iter()
            .position(|e| matches!(e, SessionEvent::Delta { .. }))
            .unwrap();
        let last_expert = events
            .iter()
            .rposition(|e| matches!(e, SessionEvent::ExpertComplete { .. }))
            .unwrap();
        assert!(last_expert < first_delta);

        match events.last().unwrap() {
            SessionEvent::Complete { done, answer, timings, run_id } => {
                assert!(*done);
                assert_eq!(answer, &report.answer);
                assert_eq!(*run_id, report.run_id);
                assert_eq!(timings.len(), 5);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(client.expert_calls(), report.experts.len());

        let record = orchestrator.run_log().get(report.run_id).await.unwrap();
        assert_eq!(record.terminal_state, RunState::Done);
        assert!(record.snapshot_fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_degraded_expert_still_completes() {
        let client = Arc::new(
            ScriptedCompletionClient::new().failing("expert:financial_analyst"),
        );
        let orchestrator = orchestrator(client).await;
        let (channel, rx) = open();

        let report = orchestrator
            .run(AdviceRequest::new("What should I do with my savings?", "demo"), channel)
            .await;
        let events = drain(rx).await;

        assert_eq!(report.terminal, RunState::Done);
        assert_eq!(report.degraded, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::ExpertComplete { agent: ExpertKind::FinancialAnalyst, degraded: true, .. }
        )));
        assert!(matches!(events.last(), Some(SessionEvent::Complete { .. })));
    }

    struct CancellingProvider {
        inner: InMemorySnapshotProvider,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl SnapshotProvider for CancellingProvider {
        async fn fetch_snapshot(&self, account_id: &str) -> Result<FinancialSnapshot> {
            self.cancel.cancel();
            self.inner.fetch_snapshot(account_id).await
        }
    }

    #[tokio::test]
    async fn test_disconnect_before_experts_aborts_without_expert_calls() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let channel = SessionChannel::open(tx, cancel.clone(), Duration::from_secs(60));

        let provider = Arc::new(CancellingProvider {
            inner: InMemorySnapshotProvider::with_demo_account().await,
            cancel,
        });
        let orchestrator = Orchestrator::new(
            provider,
            client.clone(),
            &PipelinePolicy::default(),
            Arc::new(RunLog::new()),
        );

        let report = orchestrator
            .run(AdviceRequest::new("Am I on track?", "demo"), channel)
            .await;
        let events = drain(rx).await;

        assert_eq!(report.terminal, RunState::Aborted);
        assert_eq!(client.expert_calls(), 0);
        assert!(client.calls().is_empty());
        assert_eq!(events.len(), 1);
        assert!(!events.iter().any(SessionEvent::is_terminal));
    }

    #[tokio::test]
    async fn test_dropped_receiver_aborts() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let orchestrator = orchestrator(client.clone()).await;
        let (channel, rx) = open();
        drop(rx);

        let report = orchestrator
            .run(AdviceRequest::new("Am I on track?", "demo"), channel)
            .await;

        assert_eq!(report.terminal, RunState::Aborted);
        assert!(client.calls().is_empty());

        let record = orchestrator.run_log().get(report.run_id).await.unwrap();
        assert_eq!(record.terminal_state, RunState::Aborted);
    }

    async fn expect_single_error(
        client: ScriptedCompletionClient,
        account_id: &str,
    ) -> (RunReport, Vec<SessionEvent>) {
        let orchestrator = orchestrator(Arc::new(client)).await;
        let (channel, rx) = open();

        let report = orchestrator
            .run(AdviceRequest::new("How am I doing?", account_id), channel)
            .await;
        let events = drain(rx).await;

        assert_eq!(report.terminal, RunState::Error);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(matches!(events.last(), Some(SessionEvent::Error { .. })));
        (report, events)
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_terminal_error() {
        let (report, events) =
            expect_single_error(ScriptedCompletionClient::new(), "no-such-account").await;
        assert!(report.experts.is_empty());
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_classification_failure_is_terminal_error() {
        let client = ScriptedCompletionClient::new()
            .with_classification(r#"{"question_type":"gossip","emotional_state":"calm"}"#);
        let (report, events) = expect_single_error(client, "demo").await;

        assert!(report.experts.is_empty());
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::ExpertStart { .. })));
    }

    #[tokio::test]
    async fn test_stream_failure_midway_is_terminal_error() {
        let client = ScriptedCompletionClient::new().with_stream_script(StreamScript::FailMidway);
        let (report, events) = expect_single_error(client, "demo").await;

        assert!(report.answer.is_empty());
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SessionEvent::Delta { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_end_marker_is_terminal_error() {
        let client = ScriptedCompletionClient::new().with_stream_script(StreamScript::Truncated);
        let (_, events) = expect_single_error(client, "demo").await;

        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn test_invalid_request_never_opens_a_stage() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let orchestrator = orchestrator(client.clone()).await;
        let (channel, rx) = open();

        let report = orchestrator
            .run(AdviceRequest::new("   ", "demo"), channel)
            .await;
        let events = drain(rx).await;

        assert_eq!(report.terminal, RunState::Error);
        assert!(report.timings.is_empty());
        assert_eq!(events.len(), 1);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_mid_synthesis_aborts() {
        let client = Arc::new(
            ScriptedCompletionClient::new().with_tokens(&["One ", "two ", "three ", "four."]),
        );
        let orchestrator = orchestrator(client.clone()).await;
        let (channel, mut rx) = SessionChannel::pair(1, Duration::from_secs(60));

        // Reader leaves right after the first answer fragment.
        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                let is_delta = matches!(event, SessionEvent::Delta { .. });
                seen.push(event);
                if is_delta {
                    break;
                }
            }
            seen
        });

        let report = orchestrator
            .run(AdviceRequest::new("Should I pay off my card first?", "demo"), channel)
            .await;
        let seen = reader.await.unwrap();

        assert_eq!(report.terminal, RunState::Aborted);
        assert!(report.answer.is_empty());
        assert!(matches!(seen.last(), Some(SessionEvent::Delta { .. })));
        assert!(!seen.iter().any(SessionEvent::is_terminal));
        assert_eq!(client.expert_calls(), report.experts.len());
        assert_eq!(client.calls().last().map(String::as_str), Some("synthesizer"));

        let record = orchestrator.run_log().get(report.run_id).await.unwrap();
        assert_eq!(record.terminal_state, RunState::Aborted);
        assert_eq!(
            record.stage_timings.last().map(|t| t.stage),
            Some(RunState::Synthesize)
        );
    }
}
