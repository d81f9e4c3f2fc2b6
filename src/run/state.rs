use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::record::{FailureKind, StageOutcome, WorkflowRun};

/// The five states of the workflow run state machine.
///
/// Each run flows through:
/// PENDING_VALIDATION → OCR_RUNNING → DISPATCHED_AWAITING_EXTRACTION → SUCCEEDED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    PendingValidation,
    OcrRunning,
    DispatchedAwaitingExtraction,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::PendingValidation => write!(f, "PENDING_VALIDATION"),
            RunState::OcrRunning => write!(f, "OCR_RUNNING"),
            RunState::DispatchedAwaitingExtraction => write!(f, "DISPATCHED_AWAITING_EXTRACTION"),
            RunState::Succeeded => write!(f, "SUCCEEDED"),
            RunState::Failed => write!(f, "FAILED"),
        }
    }
}

/// The result of evaluating a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Advance to the next state.
    Next(RunState),
    /// Retry the current state due to a retryable failure.
    Retry { state: RunState, reason: FailureKind },
    /// The run has reached a terminal state.
    Complete(StageOutcome),
}

/// Drives a `WorkflowRun` through the state machine.
pub struct RunMachine;

impl RunMachine {
    /// Compute the next transition for the given run based on its current
    /// state and the provided stage outcome.
    ///
    /// - `PendingValidation`: failures are input errors and fail fast.
    /// - `OcrRunning`: retryable failures retry while budget remains, with
    ///   the count tracked on the run; exhaustion or a non-retryable failure
    ///   completes the run as failed.
    /// - `DispatchedAwaitingExtraction`: completion failures are terminal —
    ///   a document that has no list will not grow one on retry.
    /// - Terminal states absorb further events as no-op `Complete`s.
    pub fn next(run: &mut WorkflowRun, outcome: StageOutcome) -> Transition {
        let transition = match run.state {
            RunState::PendingValidation => match &outcome {
                StageOutcome::Success => Transition::Next(RunState::OcrRunning),
                StageOutcome::Failure(kind) => {
                    Transition::Complete(StageOutcome::Failure(kind.clone()))
                }
            },
            RunState::OcrRunning => match &outcome {
                StageOutcome::Success => Transition::Next(RunState::DispatchedAwaitingExtraction),
                StageOutcome::Failure(kind) => Self::handle_failure(run, kind.clone()),
            },
            RunState::DispatchedAwaitingExtraction => match &outcome {
                StageOutcome::Success => Transition::Next(RunState::Succeeded),
                StageOutcome::Failure(kind) => {
                    Transition::Complete(StageOutcome::Failure(kind.clone()))
                }
            },
            RunState::Succeeded => Transition::Complete(StageOutcome::Success),
            RunState::Failed => Transition::Complete(StageOutcome::Failure(
                run.failure()
                    .cloned()
                    .unwrap_or_else(|| FailureKind::Input("run already failed".into())),
            )),
        };

        // Apply the transition to the run.
        match &transition {
            Transition::Next(next_state) => {
                run.state_history.push(run.state);
                run.state = *next_state;
            }
            Transition::Retry { state, .. } => {
                // State stays the same; retry count was already incremented
                // in handle_failure.
                run.state_history.push(*state);
            }
            Transition::Complete(outcome) => {
                if !run.state.is_terminal() {
                    run.state_history.push(run.state);
                    run.state = match outcome {
                        StageOutcome::Success => RunState::Succeeded,
                        StageOutcome::Failure(_) => RunState::Failed,
                    };
                }
            }
        }
        run.updated_at = Utc::now();

        transition
    }

    fn handle_failure(run: &mut WorkflowRun, kind: FailureKind) -> Transition {
        if !kind.is_retryable() {
            return Transition::Complete(StageOutcome::Failure(kind));
        }
        run.retry_count += 1;
        if run.retry_count <= run.retry_config.max_retries {
            Transition::Retry {
                state: run.state,
                reason: kind,
            }
        } else {
            Transition::Complete(StageOutcome::Failure(kind))
        }
    }
}
