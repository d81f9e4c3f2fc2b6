use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::RunState;

/// Document formats accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Png,
    Jpg,
    Jpeg,
}

impl FileKind {
    /// Map a file extension (without the dot, any case) to a kind.
    /// Returns `None` for anything outside the allow-list.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(FileKind::Pdf),
            "png" => Some(FileKind::Png),
            "jpg" => Some(FileKind::Jpg),
            "jpeg" => Some(FileKind::Jpeg),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Pdf => write!(f, "pdf"),
            FileKind::Png => write!(f, "png"),
            FileKind::Jpg => write!(f, "jpg"),
            FileKind::Jpeg => write!(f, "jpeg"),
        }
    }
}

/// Object-storage locator for an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub bucket: String,
    pub key: String,
    pub kind: FileKind,
}

/// Terminal failure classification for a run.
///
/// Only `Transient` failures are retried; everything else is terminal the
/// first time it is observed. Inference failures stay terminal so a service
/// outage surfaces as such instead of hiding behind per-document retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Malformed or unsupported input. Never retried.
    Input(String),
    /// Infrastructure failed (OCR call, queue unavailable). Retried with backoff.
    Transient(String),
    /// The document does not contain a list. Retrying cannot change its content.
    NoListFound,
    /// The inference service failed while processing the job.
    Inference { code: String, message: String },
    /// No completion signal arrived within the suspension window.
    Timeout,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient(_))
    }

    /// Stable operator-facing error code recorded on the run.
    pub fn code(&self) -> &str {
        match self {
            FailureKind::Input(_) => "INVALID_INPUT",
            FailureKind::Transient(_) => "RETRIES_EXHAUSTED",
            FailureKind::NoListFound => "NO_LIST_FOUND",
            FailureKind::Inference { code, .. } => code,
            FailureKind::Timeout => "SUSPENSION_TIMEOUT",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Input(msg) => write!(f, "invalid input: {msg}"),
            FailureKind::Transient(msg) => write!(f, "transient failure: {msg}"),
            FailureKind::NoListFound => write!(f, "no grocery list found in document"),
            FailureKind::Inference { code, message } => {
                write!(f, "inference failure ({code}): {message}")
            }
            FailureKind::Timeout => write!(f, "no completion signal before the suspension timeout"),
        }
    }
}

/// The result of executing one stage of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    Success,
    Failure(FailureKind),
}

/// A single extracted list entry. Never partially constructed: a record
/// without a name or a positive quantity is dropped upstream, not stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub quantity: u32,
    pub unit: Option<String>,
}

/// Terminal payload of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunResult {
    Success(Vec<Item>),
    Failure(FailureKind),
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries before a retryable stage fails the run.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given retry attempt using exponential backoff.
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms * 2u64.pow(attempt.saturating_sub(1))
    }
}

/// One execution of the document-to-item-list workflow.
///
/// Mutated only through [`RunMachine`](super::state::RunMachine) transitions;
/// a snapshot is persisted to the run store at every transition so the
/// "waiting on token X" fact survives outside the executing task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub input: DocumentRef,
    pub state: RunState,
    pub state_history: Vec<RunState>,
    pub ocr_text: Option<String>,
    pub completion_token: Option<String>,
    pub result: Option<RunResult>,
    pub retry_count: u32,
    pub retry_config: RetryConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(input: DocumentRef, retry_config: RetryConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            input,
            state: RunState::PendingValidation,
            state_history: Vec::new(),
            ocr_text: None,
            completion_token: None,
            result: None,
            retry_count: 0,
            retry_config,
            created_at: now,
            updated_at: now,
        }
    }

    /// The terminal failure, if the run has one recorded.
    pub fn failure(&self) -> Option<&FailureKind> {
        match &self.result {
            Some(RunResult::Failure(kind)) => Some(kind),
            _ => None,
        }
    }
}

/// Structured summary produced when a run reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub bucket: String,
    pub key: String,
    pub state: RunState,
    pub state_transitions: Vec<RunState>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub item_count: Option<usize>,
    pub error_code: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RunReport {
    /// Generate a report from a terminal (or failed-early) run.
    pub fn from_run(run: &WorkflowRun) -> Self {
        let mut transitions = run.state_history.clone();
        transitions.push(run.state);

        let (item_count, error_code, error) = match &run.result {
            Some(RunResult::Success(items)) => (Some(items.len()), None, None),
            Some(RunResult::Failure(kind)) => {
                (None, Some(kind.code().to_string()), Some(kind.to_string()))
            }
            None => (None, None, None),
        };

        Self {
            run_id: run.id.clone(),
            bucket: run.input.bucket.clone(),
            key: run.input.key.clone(),
            state: run.state,
            state_transitions: transitions,
            retry_count: run.retry_count,
            max_retries: run.retry_config.max_retries,
            item_count,
            error_code,
            error,
            started_at: run.created_at,
            completed_at: run.updated_at,
            duration_ms: (run.updated_at - run.created_at).num_milliseconds(),
        }
    }
}
