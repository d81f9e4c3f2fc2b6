//! Drives workflow runs end-to-end and exposes the engine boundary.
//!
//! `RunOrchestrator` sequences one run through the state machine: validate
//! input → OCR with bounded backoff retries → dispatch an extraction job and
//! suspend on a completion token → finalize. `WorkflowEngine` is the engine
//! interface the rest of the system talks to: it starts runs as independent
//! tasks and owns the run store, the stand-in for the engine's durable state
//! storage. Suspension never blocks a thread; the run task awaits the
//! completion receiver under a timeout while the "waiting on token X" fact
//! lives on the persisted run record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use uuid::Uuid;

use crate::completion::{CompletionChannel, CompletionOutcome, FailureCode};
use crate::error::FeiraError;
use crate::ingest::RunStarter;
use crate::ocr::TextExtractor;
use crate::queue::{DispatchQueue, ExtractionJob};
use crate::run::{
    DocumentRef, FailureKind, RetryConfig, RunMachine, RunReport, RunResult, RunState,
    StageOutcome, Transition, WorkflowRun,
};

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retry: RetryConfig,
    /// How long a dispatched run waits for its completion signal.
    pub suspension_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            suspension_timeout: Duration::from_secs(300),
        }
    }
}

/// In-memory stand-in for the engine's durable run storage. One record per
/// run, keyed by run id, kept after terminal states for downstream queries.
#[derive(Clone, Default)]
pub struct RunStore {
    inner: Arc<Mutex<HashMap<String, WorkflowRun>>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persist(&self, run: &WorkflowRun) {
        self.inner
            .lock()
            .expect("run store lock poisoned")
            .insert(run.id.clone(), run.clone());
    }

    pub fn get(&self, run_id: &str) -> Option<WorkflowRun> {
        self.inner
            .lock()
            .expect("run store lock poisoned")
            .get(run_id)
            .cloned()
    }
}

/// Sequences one run through its states, persisting a snapshot at every
/// transition.
pub struct RunOrchestrator {
    ocr: Arc<dyn TextExtractor>,
    queue: DispatchQueue,
    channel: CompletionChannel,
    store: RunStore,
    config: PipelineConfig,
}

impl RunOrchestrator {
    pub fn new(
        ocr: Arc<dyn TextExtractor>,
        queue: DispatchQueue,
        channel: CompletionChannel,
        store: RunStore,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ocr,
            queue,
            channel,
            store,
            config,
        }
    }

    /// Drive `run` to a terminal state and return its report.
    pub async fn execute(&self, run: &mut WorkflowRun) -> Result<RunReport> {
        // PENDING_VALIDATION
        let transition = RunMachine::next(run, validate_input(&run.input));
        match transition {
            Transition::Next(RunState::OcrRunning) => self.store.persist(run),
            Transition::Complete(StageOutcome::Failure(kind)) => return Ok(self.fail(run, kind)),
            other => bail!("unexpected transition from PendingValidation: {other:?}"),
        }

        // OCR_RUNNING, with bounded retries and exponential backoff.
        let text = loop {
            match self.ocr.extract_text(&run.input).await {
                Ok(text) if text.trim().is_empty() => {
                    // Re-running OCR on a blank document cannot change it.
                    let kind = FailureKind::Input("document produced no text".into());
                    match RunMachine::next(run, StageOutcome::Failure(kind)) {
                        Transition::Complete(StageOutcome::Failure(kind)) => {
                            return Ok(self.fail(run, kind));
                        }
                        other => bail!("unexpected transition from OcrRunning: {other:?}"),
                    }
                }
                Ok(text) => {
                    let transition = RunMachine::next(run, StageOutcome::Success);
                    if !matches!(
                        transition,
                        Transition::Next(RunState::DispatchedAwaitingExtraction)
                    ) {
                        bail!("unexpected transition from OcrRunning: {transition:?}");
                    }
                    break text;
                }
                Err(e) => {
                    let kind = FailureKind::Transient(e.to_string());
                    match RunMachine::next(run, StageOutcome::Failure(kind)) {
                        Transition::Retry { reason, .. } => {
                            let delay_ms = run.retry_config.delay_for_attempt(run.retry_count);
                            warn!(
                                run_id = %run.id,
                                attempt = run.retry_count,
                                max = run.retry_config.max_retries,
                                %reason,
                                delay_ms,
                                "OCR failed; retrying"
                            );
                            self.store.persist(run);
                            sleep(Duration::from_millis(delay_ms)).await;
                        }
                        Transition::Complete(StageOutcome::Failure(kind)) => {
                            return Ok(self.fail(run, kind));
                        }
                        other => bail!("unexpected transition from OcrRunning: {other:?}"),
                    }
                }
            }
        };
        run.ocr_text = Some(text.clone());
        self.store.persist(run);

        // DISPATCHED_AWAITING_EXTRACTION: register the token before the job
        // can possibly be delivered, persist the suspended snapshot, then
        // dispatch and await.
        let token = Uuid::new_v4().to_string();
        run.completion_token = Some(token.clone());
        let mut receiver = self.channel.register(&token);
        self.store.persist(run);
        self.queue
            .enqueue(ExtractionJob::new(run.id.clone(), text, token.clone()));
        info!(run_id = %run.id, "run suspended awaiting completion signal");

        let outcome = match timeout(self.config.suspension_timeout, &mut receiver).await {
            Ok(Ok(signal)) => classify_completion(run, signal),
            Ok(Err(_)) => {
                StageOutcome::Failure(FailureKind::Transient("suspension channel closed".into()))
            }
            Err(_) => {
                self.channel.expire(&token);
                // A signal that raced the deadline and won the channel still counts.
                match receiver.try_recv() {
                    Ok(signal) => classify_completion(run, signal),
                    Err(_) => {
                        warn!(
                            run_id = %run.id,
                            timeout_secs = self.config.suspension_timeout.as_secs(),
                            "no completion signal before the suspension timeout"
                        );
                        StageOutcome::Failure(FailureKind::Timeout)
                    }
                }
            }
        };

        match RunMachine::next(run, outcome) {
            Transition::Next(RunState::Succeeded) => {
                info!(run_id = %run.id, "run succeeded");
                self.store.persist(run);
                Ok(RunReport::from_run(run))
            }
            Transition::Complete(StageOutcome::Failure(kind)) => Ok(self.fail(run, kind)),
            other => bail!("unexpected transition from DispatchedAwaitingExtraction: {other:?}"),
        }
    }

    fn fail(&self, run: &mut WorkflowRun, kind: FailureKind) -> RunReport {
        warn!(run_id = %run.id, code = kind.code(), %kind, "run failed");
        run.result = Some(RunResult::Failure(kind));
        self.store.persist(run);
        RunReport::from_run(run)
    }
}

fn validate_input(input: &DocumentRef) -> StageOutcome {
    if input.bucket.trim().is_empty() {
        return StageOutcome::Failure(FailureKind::Input("bucket must not be empty".into()));
    }
    if input.key.trim().is_empty() {
        return StageOutcome::Failure(FailureKind::Input("object key must not be empty".into()));
    }
    StageOutcome::Success
}

/// Map a completion outcome onto the state machine, storing the item list
/// on success. An empty-but-successful payload is semantically "no list".
fn classify_completion(run: &mut WorkflowRun, outcome: CompletionOutcome) -> StageOutcome {
    match outcome {
        CompletionOutcome::Success { items } if !items.is_empty() => {
            run.result = Some(RunResult::Success(items));
            StageOutcome::Success
        }
        CompletionOutcome::Success { .. } => StageOutcome::Failure(FailureKind::NoListFound),
        CompletionOutcome::Failure {
            code: FailureCode::NoListFound,
            ..
        } => StageOutcome::Failure(FailureKind::NoListFound),
        CompletionOutcome::Failure { code, message } => StageOutcome::Failure(
            FailureKind::Inference {
                code: code.as_str().to_string(),
                message,
            },
        ),
    }
}

/// The workflow engine boundary: starts runs, stores their state, and joins
/// their results.
pub struct WorkflowEngine {
    orchestrator: Arc<RunOrchestrator>,
    config: PipelineConfig,
    store: RunStore,
    handles: Mutex<HashMap<String, JoinHandle<Result<RunReport>>>>,
}

impl WorkflowEngine {
    pub fn new(
        ocr: Arc<dyn TextExtractor>,
        queue: DispatchQueue,
        channel: CompletionChannel,
        config: PipelineConfig,
    ) -> Self {
        let store = RunStore::new();
        Self {
            orchestrator: Arc::new(RunOrchestrator::new(
                ocr,
                queue,
                channel,
                store.clone(),
                config.clone(),
            )),
            config,
            store,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Latest persisted snapshot of a run.
    pub fn status(&self, run_id: &str) -> Option<WorkflowRun> {
        self.store.get(run_id)
    }

    /// Wait for a started run to reach a terminal state.
    pub async fn join_run(&self, run_id: &str) -> Result<RunReport> {
        let handle = self
            .handles
            .lock()
            .expect("engine handle map lock poisoned")
            .remove(run_id)
            .ok_or_else(|| FeiraError::RunNotFound(run_id.to_string()))?;
        handle.await?
    }
}

#[async_trait]
impl RunStarter for WorkflowEngine {
    async fn start_run(&self, input: DocumentRef) -> Result<String> {
        let mut run = WorkflowRun::new(input, self.config.retry.clone());
        let run_id = run.id.clone();
        self.store.persist(&run);

        let orchestrator = Arc::clone(&self.orchestrator);
        let handle = tokio::spawn(async move { orchestrator.execute(&mut run).await });
        self.handles
            .lock()
            .expect("engine handle map lock poisoned")
            .insert(run_id.clone(), handle);

        info!(%run_id, "workflow run started");
        Ok(run_id)
    }
}
