//! Extraction worker: consumes queued jobs, invokes the inference
//! capability, and resolves the completion channel.
//!
//! Workers pull from the dispatch queue independently; any number may run in
//! parallel, each handling one job end-to-end. A job that fails gracefully
//! (inference error, no list in the document) still resolves its token with
//! a failure signal and is acknowledged — only a worker that dies outright
//! leaves the job to redeliver and, eventually, dead-letter.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::completion::{CompletionChannel, CompletionOutcome, CompletionSignal, FailureCode};
use crate::inference::ModelInvoker;
use crate::queue::{DeliveryHandle, DispatchQueue, ExtractionJob};
use crate::run::Item;

/// Marker the model is instructed to emit when the text holds no list.
pub const NO_LIST_SENTINEL: &str = "No grocery list found.";

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const LEASE_EXTENSION: Duration = Duration::from_secs(120);

pub struct ExtractionWorker {
    inference: Arc<dyn ModelInvoker>,
    queue: DispatchQueue,
    channel: CompletionChannel,
}

impl ExtractionWorker {
    pub fn new(
        inference: Arc<dyn ModelInvoker>,
        queue: DispatchQueue,
        channel: CompletionChannel,
    ) -> Self {
        Self {
            inference,
            queue,
            channel,
        }
    }

    /// Poll the dispatch queue until the owning task is aborted.
    pub async fn run(self) {
        loop {
            match self.queue.receive() {
                Some((job, handle)) => self.handle_delivery(job, &handle).await,
                None => sleep(POLL_INTERVAL).await,
            }
        }
    }

    /// One delivery end-to-end. The lease is renewed before the inference
    /// call and released by acknowledgment only after the signal has been
    /// handed to the completion channel — never the other way around.
    async fn handle_delivery(&self, job: ExtractionJob, handle: &DeliveryHandle) {
        debug!(run_id = %job.run_id, attempt = job.receive_count, "processing extraction job");
        self.queue.extend_visibility(handle, LEASE_EXTENSION);

        let signal = self.process(&job).await;
        if !self.channel.resolve(signal) {
            warn!(run_id = %job.run_id, "completion signal was not applied");
        }
        self.queue.acknowledge(handle);
    }

    /// Classify one job into a completion signal.
    pub async fn process(&self, job: &ExtractionJob) -> CompletionSignal {
        let prompt = build_prompt(&job.text);
        let outcome = match self.inference.infer(&prompt).await {
            Ok(output) if output.contains(NO_LIST_SENTINEL) => {
                info!(run_id = %job.run_id, "model reported no list in the extracted text");
                CompletionOutcome::Failure {
                    code: FailureCode::NoListFound,
                    message: "the input text does not contain a grocery list".into(),
                }
            }
            Ok(output) => CompletionOutcome::Success {
                items: parse_items(&output),
            },
            Err(e) => {
                warn!(run_id = %job.run_id, error = %e, "inference call failed");
                CompletionOutcome::Failure {
                    code: FailureCode::InferenceError,
                    message: e.to_string(),
                }
            }
        };
        CompletionSignal {
            token: job.completion_token.clone(),
            outcome,
        }
    }
}

/// Fixed-format instruction embedding the job's raw text, with the explicit
/// negative-result sentinel the model must emit when no list is present.
fn build_prompt(text: &str) -> String {
    format!(
        "You are a helpful assistant that extracts grocery items alongside their \
         quantities and unit from text.\n\
         If the text contains a grocery list, respond with ONLY the list of items \
         alongside their quantity and unit in this format:\n\
         - 2 Item, kg\n\
         - 1 Item, liter\n\
         \n\
         If the text does NOT contain a grocery list, respond with: \"{NO_LIST_SENTINEL}\"\n\
         \n\
         Here is the text:\n\
         {text}"
    )
}

/// Tolerant parse of the model's line format. Lines that do not carry a
/// bullet, a name, and a positive quantity are skipped, never fatal.
pub fn parse_items(output: &str) -> Vec<Item> {
    output
        .lines()
        .filter_map(|line| {
            let item = parse_line(line);
            if item.is_none() && !line.trim().is_empty() {
                debug!(line = line.trim(), "skipping line with no parsable item");
            }
            item
        })
        .collect()
}

fn parse_line(line: &str) -> Option<Item> {
    let trimmed = line.trim();
    let body = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))?;

    // First comma splits the name segment from the optional unit.
    let (head, unit) = match body.split_once(',') {
        Some((head, unit)) => (head.trim(), Some(unit.trim())),
        None => (body.trim(), None),
    };

    // The first integer token is the quantity; the rest is the name.
    let mut quantity: Option<u32> = None;
    let mut name_parts: Vec<&str> = Vec::new();
    for word in head.split_whitespace() {
        if quantity.is_none()
            && let Ok(parsed) = word.parse::<u32>()
        {
            quantity = Some(parsed);
        } else {
            name_parts.push(word);
        }
    }

    let quantity = quantity.filter(|q| *q > 0)?;
    let name = name_parts.join(" ");
    if name.is_empty() {
        return None;
    }
    let unit = unit.filter(|u| !u.is_empty()).map(str::to_string);

    Some(Item {
        name,
        quantity,
        unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InferenceError;
    use crate::queue::QueueConfig;
    use async_trait::async_trait;

    struct MockInvoker {
        response: Result<String, String>,
    }

    impl MockInvoker {
        fn ok(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
            }
        }
        fn err(message: &str) -> Self {
            Self {
                response: Err(message.to_string()),
            }
        }
    }

    #[async_trait]
    impl ModelInvoker for MockInvoker {
        async fn infer(&self, _prompt: &str) -> Result<String, InferenceError> {
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(message) => Err(InferenceError::Api {
                    status: 500,
                    message: message.clone(),
                }),
            }
        }
    }

    fn worker_with(invoker: MockInvoker) -> (ExtractionWorker, DispatchQueue, CompletionChannel) {
        let queue = DispatchQueue::new(QueueConfig::default());
        let channel = CompletionChannel::new();
        let worker = ExtractionWorker::new(Arc::new(invoker), queue.clone(), channel.clone());
        (worker, queue, channel)
    }

    fn job(token: &str) -> ExtractionJob {
        ExtractionJob::new("run-1".into(), "2 apples, 1 loaf bread".into(), token.into())
    }

    #[test]
    fn parsing_is_tolerant_of_garbage_lines() {
        let items = parse_items("- 2 Milk, liter\n- garbage line\n- 12 Eggs, dozen");
        assert_eq!(
            items,
            vec![
                Item {
                    name: "Milk".into(),
                    quantity: 2,
                    unit: Some("liter".into()),
                },
                Item {
                    name: "Eggs".into(),
                    quantity: 12,
                    unit: Some("dozen".into()),
                },
            ]
        );
    }

    #[test]
    fn parse_line_variants() {
        // Unit is optional.
        assert_eq!(
            parse_line("- 2 apples"),
            Some(Item {
                name: "apples".into(),
                quantity: 2,
                unit: None,
            })
        );
        // Star bullets are accepted.
        assert_eq!(
            parse_line("* 3 onions, kg"),
            Some(Item {
                name: "onions".into(),
                quantity: 3,
                unit: Some("kg".into()),
            })
        );
        // Multi-word names keep their spacing.
        assert_eq!(
            parse_line("- 1 loaf bread, count"),
            Some(Item {
                name: "loaf bread".into(),
                quantity: 1,
                unit: Some("count".into()),
            })
        );
        // No quantity → never a partial item.
        assert_eq!(parse_line("- Milk, liter"), None);
        // Zero quantity is not a positive integer.
        assert_eq!(parse_line("- 0 milk, liter"), None);
        // Quantity with no name is equally partial.
        assert_eq!(parse_line("- 4, kg"), None);
        // Not a bullet at all.
        assert_eq!(parse_line("buy some milk"), None);
    }

    #[tokio::test]
    async fn process_parses_successful_output() {
        let (worker, _queue, _channel) = worker_with(MockInvoker::ok("- 2 apples\n- 1 bread"));
        let signal = worker.process(&job("tok-1")).await;

        assert_eq!(signal.token, "tok-1");
        match signal.outcome {
            CompletionOutcome::Success { items } => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].name, "apples");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sentinel_output_signals_no_list_found() {
        let (worker, _queue, _channel) = worker_with(MockInvoker::ok("No grocery list found."));
        let signal = worker.process(&job("tok-1")).await;

        match signal.outcome {
            CompletionOutcome::Failure { code, .. } => {
                assert_eq!(code, FailureCode::NoListFound);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn inference_failure_signals_inference_error() {
        let (worker, _queue, _channel) = worker_with(MockInvoker::err("bedrock unavailable"));
        let signal = worker.process(&job("tok-1")).await;

        match signal.outcome {
            CompletionOutcome::Failure { code, message } => {
                assert_eq!(code, FailureCode::InferenceError);
                assert!(message.contains("bedrock unavailable"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivery_resolves_channel_before_acknowledging() {
        let (worker, queue, channel) = worker_with(MockInvoker::ok("- 2 apples"));
        let rx = channel.register("tok-1");
        queue.enqueue(job("tok-1"));

        let (received, handle) = queue.receive().unwrap();
        worker.handle_delivery(received, &handle).await;

        // Signal landed and the delivery was acknowledged.
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, CompletionOutcome::Success { .. }));
        assert_eq!(queue.in_flight_len(), 0);
        assert!(queue.receive().is_none());
    }

    #[tokio::test]
    async fn duplicate_delivery_is_absorbed() {
        let (worker, queue, channel) = worker_with(MockInvoker::ok("- 2 apples"));
        let rx = channel.register("tok-1");
        queue.enqueue(job("tok-1"));
        queue.enqueue(job("tok-1")); // duplicate delivery of the same token

        let (first, h1) = queue.receive().unwrap();
        let (second, h2) = queue.receive().unwrap();
        worker.handle_delivery(first, &h1).await;
        // The second resolution is a no-op; the job is still acknowledged.
        worker.handle_delivery(second, &h2).await;

        assert!(rx.await.is_ok());
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(channel.pending_count(), 0);
    }
}
