//! Completion channel bridging extraction workers to suspended runs.
//!
//! A run entering the suspended state registers its completion token here
//! and receives a one-shot receiver; an extraction worker later resolves the
//! token with a [`CompletionSignal`]. Delivery is at-least-once upstream, so
//! resolution is idempotent: the first signal for a token wins, every later
//! one (duplicate, expired, or unknown) is absorbed as a logged no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::run::Item;

/// Error codes an extraction worker can attach to a failure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCode {
    NoListFound,
    InferenceError,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::NoListFound => "NO_LIST_FOUND",
            FailureCode::InferenceError => "INFERENCE_ERROR",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to a suspended run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionOutcome {
    Success { items: Vec<Item> },
    Failure { code: FailureCode, message: String },
}

/// A worker's resolution of one extraction job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSignal {
    pub token: String,
    pub outcome: CompletionOutcome,
}

/// Maps completion tokens to pending suspensions.
///
/// Removing the sender from the map under the lock is what makes resolution
/// atomic: under concurrent attempts for the same token, exactly one caller
/// gets the sender and wins.
#[derive(Clone, Default)]
pub struct CompletionChannel {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<CompletionOutcome>>>>,
}

impl CompletionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh suspension under `token` and return the receiver the
    /// suspended run awaits.
    pub fn register(&self, token: &str) -> oneshot::Receiver<CompletionOutcome> {
        let (tx, rx) = oneshot::channel();
        let previous = self
            .pending
            .lock()
            .expect("completion channel lock poisoned")
            .insert(token.to_string(), tx);
        if previous.is_some() {
            warn!(%token, "token re-registered; previous suspension dropped");
        }
        rx
    }

    /// Deliver `signal` to the suspension matching its token. Returns whether
    /// the resolution was applied; unknown or already-resolved tokens return
    /// `false` and are only logged.
    pub fn resolve(&self, signal: CompletionSignal) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("completion channel lock poisoned")
            .remove(&signal.token);

        match sender {
            Some(tx) => {
                if tx.send(signal.outcome).is_ok() {
                    debug!(token = %signal.token, "completion signal applied");
                    true
                } else {
                    warn!(token = %signal.token, "suspension receiver dropped before resolution");
                    false
                }
            }
            None => {
                warn!(token = %signal.token, "ignoring signal for unknown or already-resolved token");
                false
            }
        }
    }

    /// Withdraw a suspension whose wait timed out. Signals arriving for the
    /// token afterwards are rejected as unknown.
    pub fn expire(&self, token: &str) -> bool {
        self.pending
            .lock()
            .expect("completion channel lock poisoned")
            .remove(token)
            .is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .expect("completion channel lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_signal(token: &str) -> CompletionSignal {
        CompletionSignal {
            token: token.into(),
            outcome: CompletionOutcome::Success {
                items: vec![Item {
                    name: "apples".into(),
                    quantity: 2,
                    unit: None,
                }],
            },
        }
    }

    #[tokio::test]
    async fn resolve_delivers_to_registered_receiver() {
        let channel = CompletionChannel::new();
        let rx = channel.register("tok-1");

        assert!(channel.resolve(success_signal("tok-1")));
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, CompletionOutcome::Success { items } if items.len() == 1));
    }

    #[tokio::test]
    async fn duplicate_resolution_is_a_noop() {
        let channel = CompletionChannel::new();
        let _rx = channel.register("tok-1");

        assert!(channel.resolve(success_signal("tok-1")));
        assert!(!channel.resolve(success_signal("tok-1")));
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let channel = CompletionChannel::new();
        assert!(!channel.resolve(success_signal("never-registered")));
    }

    #[tokio::test]
    async fn expired_token_rejects_late_signals() {
        let channel = CompletionChannel::new();
        let _rx = channel.register("tok-1");

        assert!(channel.expire("tok-1"));
        assert!(!channel.expire("tok-1"));
        assert!(!channel.resolve(success_signal("tok-1")));
    }

    #[tokio::test]
    async fn concurrent_resolution_has_exactly_one_winner() {
        let channel = CompletionChannel::new();
        let rx = channel.register("tok-1");

        let a = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.resolve(success_signal("tok-1")) })
        };
        let b = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.resolve(success_signal("tok-1")) })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a ^ b, "exactly one resolution must win, got {a} and {b}");
        assert!(rx.await.is_ok());
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn failure_code_display() {
        assert_eq!(FailureCode::NoListFound.to_string(), "NO_LIST_FOUND");
        assert_eq!(FailureCode::InferenceError.to_string(), "INFERENCE_ERROR");
    }
}
