mod cli;
mod completion;
mod config;
mod error;
mod inference;
mod ingest;
mod ocr;
mod pipeline;
mod queue;
mod run;
mod ui;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use completion::CompletionChannel;
use config::FeiraConfig;
use error::FeiraError;
use inference::{InferenceClient, InferenceError, ModelInvoker};
use ingest::{IngestionTrigger, ObjectEvent};
use ocr::{OcrClient, OcrError, TextExtractor};
use pipeline::{PipelineConfig, WorkflowEngine};
use queue::{DispatchQueue, QueueConfig};
use run::{DocumentRef, RetryConfig};
use ui::RunProgress;
use worker::ExtractionWorker;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = FeiraConfig::load()?;
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        config.suspension_timeout_secs = timeout_secs;
    }

    match cli.command {
        Command::Run { bucket, key } => {
            if config.api_key.is_empty() {
                return Err(FeiraError::Config(
                    "no API key; set ANTHROPIC_API_KEY or api_key in feira.toml".into(),
                )
                .into());
            }
            let ocr: Arc<dyn TextExtractor> = Arc::new(OcrClient::new(config.ocr_base_url.clone()));
            let inference: Arc<dyn ModelInvoker> = Arc::new(InferenceClient::new(
                config.api_key.clone(),
                config.model.clone(),
            ));
            process_document(&config, ocr, inference, bucket, key).await
        }
        Command::Demo => {
            let ocr: Arc<dyn TextExtractor> = Arc::new(DemoExtractor);
            let inference: Arc<dyn ModelInvoker> = Arc::new(DemoInvoker);
            process_document(&config, ocr, inference, "demo-bucket".into(), "receipt.jpg".into())
                .await
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "feira=debug" } else { "feira=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Wire the pipeline, feed one object-created event through the ingestion
/// trigger, and wait for the run to reach a terminal state.
async fn process_document(
    config: &FeiraConfig,
    ocr: Arc<dyn TextExtractor>,
    inference: Arc<dyn ModelInvoker>,
    bucket: String,
    key: String,
) -> Result<()> {
    let queue = DispatchQueue::new(QueueConfig {
        max_receive_count: config.max_receive_count,
        dead_letter_retention: chrono::Duration::days(config.dead_letter_retention_days),
        ..QueueConfig::default()
    });
    let channel = CompletionChannel::new();
    let engine = Arc::new(WorkflowEngine::new(
        ocr,
        queue.clone(),
        channel.clone(),
        PipelineConfig {
            retry: RetryConfig {
                max_retries: config.max_retries,
                base_delay_ms: config.base_delay_ms,
            },
            suspension_timeout: Duration::from_secs(config.suspension_timeout_secs),
        },
    ));

    let workers: Vec<_> = (0..config.worker_count)
        .map(|_| {
            tokio::spawn(
                ExtractionWorker::new(Arc::clone(&inference), queue.clone(), channel.clone())
                    .run(),
            )
        })
        .collect();

    let trigger = IngestionTrigger::new(Arc::clone(&engine));
    let progress = RunProgress::start(&key);

    let event = ObjectEvent {
        bucket,
        key,
        event_type: "ObjectCreated:Put".into(),
    };
    let response = trigger.handle(&event).await?;
    if response.status_code != 200 {
        progress.reject(&response.body);
        for worker in workers {
            worker.abort();
        }
        bail!("{}", response.body);
    }

    // The confirmation body ends with the run id.
    let run_id = response
        .body
        .rsplit(' ')
        .next()
        .unwrap_or_default()
        .to_string();
    let report = engine.join_run(&run_id).await?;
    progress.complete(&report);
    progress.print_report(&report);

    let dead = queue.dead_letters();
    if !dead.is_empty() {
        warn!(count = dead.len(), "jobs left in the dead-letter store");
    }
    for worker in workers {
        worker.abort();
    }
    Ok(())
}

// Stub capabilities for the built-in demo: a fixed receipt and a canned
// model response, so the whole pipeline runs without external services.
struct DemoExtractor;

#[async_trait::async_trait]
impl TextExtractor for DemoExtractor {
    async fn extract_text(&self, _doc: &DocumentRef) -> Result<String, OcrError> {
        Ok("2 apples, 1 loaf bread, 3 liters milk".to_string())
    }
}

struct DemoInvoker;

#[async_trait::async_trait]
impl ModelInvoker for DemoInvoker {
    async fn infer(&self, _prompt: &str) -> Result<String, InferenceError> {
        Ok("- 2 apples, count\n- 1 loaf bread, count\n- 3 milk, liter".to_string())
    }
}
