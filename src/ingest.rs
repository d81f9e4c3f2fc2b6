//! Ingestion trigger: object-storage notifications become workflow runs.
//!
//! The handler is the normalized boundary the event source adapts to: it
//! receives one `ObjectEvent` and returns an HTTP-shaped response. Rejected
//! uploads are a hard early-exit, not an error — the upstream delivery
//! mechanism only retries when the handler itself fails to start a run.

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::run::{DocumentRef, FileKind};

/// Notification that an object changed in storage.
#[derive(Debug, Clone)]
pub struct ObjectEvent {
    pub bucket: String,
    pub key: String,
    pub event_type: String,
}

/// HTTP-shaped handler result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResponse {
    pub status_code: u16,
    pub body: String,
}

/// Engine seam: anything that can start a workflow run for a document.
#[async_trait]
pub trait RunStarter: Send + Sync {
    async fn start_run(&self, input: DocumentRef) -> Result<String>;
}

#[async_trait]
impl<S: RunStarter + ?Sized> RunStarter for Arc<S> {
    async fn start_run(&self, input: DocumentRef) -> Result<String> {
        (**self).start_run(input).await
    }
}

pub struct IngestionTrigger<S> {
    engine: S,
}

impl<S: RunStarter> IngestionTrigger<S> {
    pub fn new(engine: S) -> Self {
        Self { engine }
    }

    /// Handle one storage notification.
    ///
    /// Only object-created events start runs. The key is URL-decoded before
    /// extension detection; an extension outside {pdf, png, jpg, jpeg}
    /// rejects with 400 without starting anything. A failure to start the
    /// run propagates as `Err` so the upstream delivery mechanism retries.
    pub async fn handle(&self, event: &ObjectEvent) -> Result<HandlerResponse> {
        if !event.event_type.starts_with("ObjectCreated") {
            return Ok(HandlerResponse {
                status_code: 204,
                body: format!("Ignored event type {}", event.event_type),
            });
        }

        let key = decode_key(&event.key);
        let kind = key
            .rsplit_once('.')
            .and_then(|(_, extension)| FileKind::from_extension(extension));
        let Some(kind) = kind else {
            warn!(bucket = %event.bucket, key = %key, "unsupported file type; not starting a run");
            return Ok(HandlerResponse {
                status_code: 400,
                body: "Unsupported file type".into(),
            });
        };

        info!(bucket = %event.bucket, key = %key, %kind, "starting workflow run");
        let run_id = self
            .engine
            .start_run(DocumentRef {
                bucket: event.bucket.clone(),
                key: key.into_owned(),
                kind,
            })
            .await?;

        Ok(HandlerResponse {
            status_code: 200,
            body: format!("Started workflow run {run_id}"),
        })
    }
}

/// Object keys arrive percent-encoded with `+` standing for spaces.
fn decode_key(raw: &str) -> Cow<'_, str> {
    let plus_decoded = raw.replace('+', " ");
    match urlencoding::decode(&plus_decoded) {
        Ok(decoded) => Cow::Owned(decoded.into_owned()),
        Err(_) => Cow::Borrowed(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStarter {
        started: AtomicUsize,
        inputs: Mutex<Vec<DocumentRef>>,
    }

    #[async_trait]
    impl RunStarter for CountingStarter {
        async fn start_run(&self, input: DocumentRef) -> Result<String> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().unwrap().push(input);
            Ok("run-42".into())
        }
    }

    struct FailingStarter;

    #[async_trait]
    impl RunStarter for FailingStarter {
        async fn start_run(&self, _input: DocumentRef) -> Result<String> {
            anyhow::bail!("workflow engine unavailable")
        }
    }

    fn event(key: &str) -> ObjectEvent {
        ObjectEvent {
            bucket: "grocery-uploads".into(),
            key: key.into(),
            event_type: "ObjectCreated:Put".into(),
        }
    }

    #[tokio::test]
    async fn supported_extensions_start_exactly_one_run() {
        for key in ["list.pdf", "scan.png", "receipt.jpg", "photo.jpeg", "UP.JPG"] {
            let trigger = IngestionTrigger::new(CountingStarter::default());
            let response = trigger.handle(&event(key)).await.unwrap();

            assert_eq!(response.status_code, 200, "key {key}");
            assert!(response.body.contains("run-42"));
            assert_eq!(trigger.engine.started.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn unsupported_extensions_reject_with_400_and_zero_runs() {
        for key in ["notes.txt", "archive.tar.gz", "binary.exe", "no-extension"] {
            let trigger = IngestionTrigger::new(CountingStarter::default());
            let response = trigger.handle(&event(key)).await.unwrap();

            assert_eq!(response.status_code, 400, "key {key}");
            assert_eq!(response.body, "Unsupported file type");
            assert_eq!(trigger.engine.started.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn object_key_is_url_decoded() {
        let trigger = IngestionTrigger::new(CountingStarter::default());
        let response = trigger
            .handle(&event("my+receipt%20scan.jpg"))
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        let inputs = trigger.engine.inputs.lock().unwrap();
        assert_eq!(inputs[0].key, "my receipt scan.jpg");
        assert_eq!(inputs[0].kind, FileKind::Jpg);
    }

    #[tokio::test]
    async fn non_created_events_are_ignored() {
        let trigger = IngestionTrigger::new(CountingStarter::default());
        let removed = ObjectEvent {
            event_type: "ObjectRemoved:Delete".into(),
            ..event("receipt.jpg")
        };
        let response = trigger.handle(&removed).await.unwrap();

        assert_eq!(response.status_code, 204);
        assert_eq!(trigger.engine.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn engine_failure_propagates_to_the_caller() {
        let trigger = IngestionTrigger::new(FailingStarter);
        let result = trigger.handle(&event("receipt.jpg")).await;
        assert!(result.is_err());
    }
}
