//! Processing worker: consumes commands and applies transformations.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::application::channel::{ChannelError, Delivery, MessageChannel};
use crate::application::repos::TasksRepo;
use crate::application::retry::RetryPolicy;
use crate::application::transform::ImageTransformer;
use crate::domain::entities::ProcessingCommand;
use crate::domain::paths::derived_path;
use crate::domain::types::{Operation, TaskStatus};

/// How the final status of a pass is chosen once any operation has failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusPolicy {
    /// The end of every pass writes COMPLETE, overwriting an earlier FAILED.
    #[default]
    LastWriteWins,
    /// A pass with any failed operation leaves the task FAILED.
    WorstStatusWins,
}

impl StatusPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusPolicy::LastWriteWins => "last_write_wins",
            StatusPolicy::WorstStatusWins => "worst_status_wins",
        }
    }
}

impl fmt::Display for StatusPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "last_write_wins" => Ok(StatusPolicy::LastWriteWins),
            "worst_status_wins" => Ok(StatusPolicy::WorstStatusWins),
            other => Err(format!(
                "unknown status policy `{other}` (expected last_write_wins or worst_status_wins)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub resize: Dimensions,
    pub thumbnail: Dimensions,
    pub status_policy: StatusPolicy,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            resize: Dimensions {
                width: 1024,
                height: 768,
            },
            thumbnail: Dimensions {
                width: 128,
                height: 128,
            },
            status_policy: StatusPolicy::default(),
        }
    }
}

/// What one processing pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub task_id: Uuid,
    pub succeeded: Vec<Operation>,
    pub failed: Vec<Operation>,
    pub skipped: Vec<String>,
    /// Status written at the end of the pass, if any.
    pub final_status: Option<TaskStatus>,
}

/// Outcome of a single worker iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// Nothing to fetch.
    Idle,
    /// Fetch failed with a transport error after retries.
    FetchFailed,
    /// The payload could not be decoded; it was committed and dropped.
    Poisoned { delivery_id: i64 },
    Processed(PassReport),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("message channel closed")]
    ChannelClosed,
}

pub struct ProcessingWorker {
    channel: Arc<dyn MessageChannel>,
    tasks: Arc<dyn TasksRepo>,
    transformer: Arc<dyn ImageTransformer>,
    retry: RetryPolicy,
    options: WorkerOptions,
}

impl ProcessingWorker {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        tasks: Arc<dyn TasksRepo>,
        transformer: Arc<dyn ImageTransformer>,
        retry: RetryPolicy,
        options: WorkerOptions,
    ) -> Self {
        Self {
            channel,
            tasks,
            transformer,
            retry,
            options,
        }
    }

    /// Loop until `shutdown` is cancelled or the channel closes.
    ///
    /// Cancellation interrupts waiting for a message or the pause after a failed
    /// fetch, never a pass in progress.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        info!(
            status_policy = %self.options.status_policy,
            "processing worker started"
        );
        loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                fetched = self.fetch() => fetched,
            };
            let iteration = self.dispatch(fetched).await?;
            if iteration == Iteration::FetchFailed {
                // Back off for one full retry delay before polling again.
                let pause = self.retry.delay_after(self.retry.attempts());
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
        info!("processing worker stopped");
        Ok(())
    }

    /// Fetch and handle at most one message.
    pub async fn process_next(&self) -> Result<Iteration, WorkerError> {
        let fetched = self.fetch().await;
        self.dispatch(fetched).await
    }

    async fn fetch(&self) -> Result<Option<Delivery>, ChannelError> {
        self.retry
            .run("channel.fetch", || self.channel.fetch())
            .await
    }

    async fn dispatch(
        &self,
        fetched: Result<Option<Delivery>, ChannelError>,
    ) -> Result<Iteration, WorkerError> {
        match fetched {
            Ok(Some(delivery)) => Ok(self.handle(delivery).await),
            Ok(None) => Ok(Iteration::Idle),
            Err(ChannelError::Closed) => {
                error!("message channel closed, stopping worker");
                Err(WorkerError::ChannelClosed)
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch message");
                Ok(Iteration::FetchFailed)
            }
        }
    }

    #[instrument(skip(self, delivery), fields(delivery_id = delivery.id, key = %delivery.key, attempt = delivery.attempt))]
    async fn handle(&self, delivery: Delivery) -> Iteration {
        let command = match ProcessingCommand::decode(&delivery.payload) {
            Ok(command) => command,
            Err(err) => {
                error!(error = %err, "dropping undecodable message");
                metrics::counter!("imgproc_worker_deliveries_total", "outcome" => "poisoned")
                    .increment(1);
                self.commit(&delivery).await;
                return Iteration::Poisoned {
                    delivery_id: delivery.id,
                };
            }
        };

        let mut report = self.apply(&command).await;
        self.commit(&delivery).await;

        let final_status = match self.options.status_policy {
            StatusPolicy::LastWriteWins => Some(TaskStatus::Complete),
            StatusPolicy::WorstStatusWins if report.failed.is_empty() => {
                Some(TaskStatus::Complete)
            }
            StatusPolicy::WorstStatusWins => None,
        };
        if let Some(status) = final_status {
            if self.set_status(command.id, status).await {
                report.final_status = Some(status);
            }
        }

        metrics::counter!("imgproc_worker_deliveries_total", "outcome" => "processed")
            .increment(1);
        info!(
            task_id = %command.id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "processing pass finished"
        );
        Iteration::Processed(report)
    }

    async fn apply(&self, command: &ProcessingCommand) -> PassReport {
        let mut report = PassReport {
            task_id: command.id,
            ..PassReport::default()
        };
        let source = command.original_path.as_str();

        for name in &command.requested_operations {
            let Ok(operation) = Operation::try_from(name.as_str()) else {
                debug!(task_id = %command.id, operation = %name, "skipping unknown operation");
                report.skipped.push(name.clone());
                continue;
            };

            let target = derived_path(operation, source);
            let result = match operation {
                Operation::Resize => {
                    let Dimensions { width, height } = self.options.resize;
                    self.transformer.resize(source, &target, width, height).await
                }
                Operation::Thumbnail => {
                    let Dimensions { width, height } = self.options.thumbnail;
                    self.transformer
                        .thumbnail(source, &target, width, height)
                        .await
                }
                Operation::Watermark => self.transformer.watermark(source, &target).await,
            };

            match result {
                Ok(()) => {
                    info!(task_id = %command.id, %operation, target = %target, "operation applied");
                    metrics::counter!(
                        "imgproc_worker_operations_total",
                        "operation" => operation.as_str(),
                        "outcome" => "ok"
                    )
                    .increment(1);
                    report.succeeded.push(operation);
                }
                Err(err) => {
                    error!(task_id = %command.id, %operation, error = %err, "operation failed");
                    metrics::counter!(
                        "imgproc_worker_operations_total",
                        "operation" => operation.as_str(),
                        "outcome" => "error"
                    )
                    .increment(1);
                    self.set_status(command.id, TaskStatus::Failed).await;
                    report.failed.push(operation);
                }
            }
        }

        report
    }

    async fn commit(&self, delivery: &Delivery) {
        if let Err(err) = self
            .retry
            .run("channel.commit", || self.channel.commit(delivery))
            .await
        {
            error!(delivery_id = delivery.id, error = %err, "failed to commit message");
        }
    }

    async fn set_status(&self, id: Uuid, status: TaskStatus) -> bool {
        match self
            .retry
            .run("tasks.update_status", || self.tasks.update_status(id, status))
            .await
        {
            Ok(()) => true,
            Err(err) => {
                error!(task_id = %id, %status, error = %err, "failed to update task status");
                false
            }
        }
    }
}
