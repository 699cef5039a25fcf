//! Job Status Demo
//!
//! Sends file import jobs through an in-memory pipeline and polls each job's
//! outcome, the way an HTTP endpoint would answer `GET /jobs/{id}`:
//!
//! - `orders.csv` is accepted, then finishes with a row count
//! - `payload.exe` is rejected by a domain event (422)
//! - `corrupt.csv` makes the handler fail, which surfaces as a technical error (500)
//!
//! # Running the Example
//!
//! ```bash
//! RUST_LOG=debug cargo run -p job-status-demo
//! ```

#![allow(missing_docs)]

use msgpoll_core::message::{Message, MessageId, TransportMessage};
use msgpoll_core::pipeline::{HandlerError, MessageContext, MessageHandler, Pipeline};
use msgpoll_core::problem::ProblemDetails;
use msgpoll_core::result::{PollingStatus, ResultData};
use msgpoll_runtime::metrics::MetricsServer;
use msgpoll_runtime::{
    AcceptedCorrelation, DefaultPoller, FailedCompletionCorrelation, PollerWithTimeout,
    PollingConfig, SuccessfulCompletionCorrelation,
};
use msgpoll_testing::InMemoryPipeline;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Commands and events

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImportFile {
    file: String,
    rows: u64,
}

impl Message for ImportFile {
    const MESSAGE_TYPE: &'static str = "ImportFile.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImportStarted {
    file: String,
}

impl Message for ImportStarted {
    const MESSAGE_TYPE: &'static str = "ImportStarted.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImportFinished {
    file: String,
    rows: u64,
}

impl Message for ImportFinished {
    const MESSAGE_TYPE: &'static str = "ImportFinished.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImportRejected {
    file: String,
    reason: String,
}

impl Message for ImportRejected {
    const MESSAGE_TYPE: &'static str = "ImportRejected.v1";
}

#[derive(Debug, thiserror::Error)]
enum ImportError {
    #[error("Unreadable file '{0}': checksum mismatch at byte 4096")]
    Corrupt(String),
}

// Handler

struct ImportHandler;

impl ImportHandler {
    async fn import(command: ImportFile, context: &MessageContext) -> Result<(), HandlerError> {
        if command.file.ends_with(".exe") {
            context
                .publish(&ImportRejected {
                    file: command.file,
                    reason: "Executables cannot be imported".to_string(),
                })
                .await?;
            return Ok(());
        }
        if command.file.starts_with("corrupt") {
            return Err(ImportError::Corrupt(command.file).into());
        }

        context
            .publish(&ImportStarted {
                file: command.file.clone(),
            })
            .await?;
        tokio::time::sleep(Duration::from_millis(150)).await;
        context
            .publish(&ImportFinished {
                file: command.file,
                rows: command.rows,
            })
            .await?;
        Ok(())
    }
}

impl MessageHandler for ImportHandler {
    fn handle<'a>(
        &'a self,
        message: &'a TransportMessage,
        context: &'a MessageContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        Box::pin(async move { Self::import(message.decode::<ImportFile>()?, context).await })
    }
}

fn import_summary(event: &ImportFinished) -> ResultData {
    ResultData::from([
        ("file".to_string(), event.file.clone().into()),
        ("rows".to_string(), event.rows.into()),
    ])
}

fn rejected_file(event: &ImportRejected) -> ProblemDetails {
    ProblemDetails::new(
        "https://api.example.com/problems/rejected-file",
        "Rejected File",
        422,
    )
    .with_detail(event.reason.clone())
    .with_extension("file", event.file.clone())
}

fn polling_config(poller: DefaultPoller) -> anyhow::Result<PollingConfig> {
    Ok(PollingConfig::builder(poller)
        .accepted(AcceptedCorrelation::<ImportStarted>::new())
        .succeeded(
            SuccessfulCompletionCorrelation::<ImportFinished>::new()
                .with_data_builder(import_summary),
        )
        .failed(
            FailedCompletionCorrelation::<ImportRejected>::new()
                .with_problem_builder(rejected_file),
        )
        .exclude_from_completion_events::<ImportFile>()
        .build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,msgpoll_runtime=debug,job_status_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Job Status Demo");

    // 2. Install the Prometheus recorder
    let mut metrics = MetricsServer::new("127.0.0.1:9000".parse()?);
    metrics.start()?;

    // 3. Wire polling into the pipeline
    let poller = DefaultPoller::new();
    let mut pipeline = InMemoryPipeline::new().with_max_attempts(2);
    pipeline.register_handler(ImportFile::MESSAGE_TYPE, Arc::new(ImportHandler));
    polling_config(poller.clone())?
        .plugin()
        .install(&mut pipeline);
    let running = pipeline.start();

    tracing::info!("✓ Pipeline started");

    // 4. Submit jobs
    let jobs = [
        ("orders.csv", 1_250),
        ("payload.exe", 0),
        ("corrupt.csv", 10),
    ];
    let mut submitted = Vec::with_capacity(jobs.len());
    for (file, rows) in jobs {
        let message_id = running
            .send(&ImportFile {
                file: file.to_string(),
                rows,
            })
            .await?;
        tracing::info!(%message_id, file, "Job submitted");
        submitted.push((file, message_id));
    }

    // 5. Report status as a client would see it
    let timed = PollerWithTimeout::new(poller.clone()).with_default_timeout(Duration::from_secs(5));
    for (file, message_id) in &submitted {
        if let Some(early) = timed.peek(*message_id, &[]).await {
            tracing::info!(file, status = %early.status, "Current status");
        }

        let result = timed
            .poll_with_default(*message_id, &[PollingStatus::Accepted])
            .await?;
        tracing::info!(file, status = %result.status, "Final status");
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    // 6. A job nobody sent never resolves
    let unknown = MessageId::new();
    match timed.poll(unknown, Duration::from_millis(200), &[]).await {
        Ok(result) => tracing::warn!(status = %result.status, "Unexpected result"),
        Err(err) => tracing::info!(%err, "Unknown job still pending"),
    }
    tracing::info!(stored_results = poller.len(), "Poller state");

    // 7. Show what Prometheus would scrape
    if let Some(rendered) = metrics.render() {
        for line in rendered.lines().filter(|line| line.starts_with("polling_")) {
            println!("{line}");
        }
    }

    running.shutdown().await;
    tracing::info!("✓ Clean shutdown complete");

    Ok(())
}
