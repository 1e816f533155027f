//! Upload saga and task lifecycle.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::blobs::{BlobError, BlobStore};
use crate::application::channel::{ChannelError, MessageChannel};
use crate::application::repos::{RepoError, TasksRepo};
use crate::application::retry::RetryPolicy;
use crate::application::saga::{Saga, compensation};
use crate::domain::entities::TaskRecord;
use crate::domain::error::DomainError;
use crate::domain::paths::{derived_path, normalize_extension, original_path};
use crate::domain::types::{DEFAULT_PIPELINE, Operation};

#[derive(Debug, Error)]
pub enum TaskServiceError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("failed to save image")]
    Storage(#[source] BlobError),
    #[error("failed to persist task")]
    Persistence(#[source] RepoError),
    #[error("failed to publish processing command")]
    Transport(#[source] ChannelError),
    #[error("task not found")]
    NotFound,
}

#[derive(Clone)]
pub struct TaskService {
    tasks: Arc<dyn TasksRepo>,
    blobs: Arc<dyn BlobStore>,
    channel: Arc<dyn MessageChannel>,
    retry: RetryPolicy,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TasksRepo>,
        blobs: Arc<dyn BlobStore>,
        channel: Arc<dyn MessageChannel>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tasks,
            blobs,
            channel,
            retry,
        }
    }

    /// Store the original, record a PROCESSING task, and publish its command.
    ///
    /// Any failure undoes the steps that already completed, so a failed
    /// submission leaves neither a blob nor a record behind.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn submit(&self, data: Bytes, extension: &str) -> Result<Uuid, TaskServiceError> {
        if data.is_empty() {
            return Err(DomainError::EmptyPayload.into());
        }
        let extension = normalize_extension(extension)?;

        let id = Uuid::new_v4();
        let path = original_path(id, &extension);
        let task = TaskRecord::processing(
            id,
            path.clone(),
            &DEFAULT_PIPELINE,
            OffsetDateTime::now_utc(),
        );

        let mut saga = Saga::new("upload");

        let blobs = Arc::clone(&self.blobs);
        let blob_path = path.clone();
        saga.step(
            "save_original",
            self.blobs.save(&path, data),
            Some(compensation(move || async move {
                blobs.delete(&blob_path).await
            })),
        )
        .await
        .map_err(TaskServiceError::Storage)?;

        // A commit whose acknowledgement was lost surfaces as an error on retry,
        // so a failed create still removes any row it may have written.
        let create = async {
            let created = self
                .retry
                .run("tasks.create", || self.tasks.create_task(&task))
                .await;
            if created.is_err() {
                if let Err(err) = self
                    .retry
                    .run("tasks.delete", || self.tasks.delete_task(id))
                    .await
                {
                    warn!(task_id = %id, error = %err, "failed to remove partially created task");
                }
            }
            created
        };

        let tasks = Arc::clone(&self.tasks);
        let retry = self.retry;
        saga.step(
            "create_task",
            create,
            Some(compensation(move || async move {
                retry.run("tasks.delete", || tasks.delete_task(id)).await
            })),
        )
        .await
        .map_err(TaskServiceError::Persistence)?;

        let key = id.to_string();
        let publish = async {
            let payload = task
                .command()
                .encode()
                .map_err(|err| ChannelError::Encode(err.to_string()))?;
            let payload = Bytes::from(payload);
            self.retry
                .run("channel.publish", || {
                    self.channel.publish(&key, payload.clone())
                })
                .await
        };
        saga.step("publish_command", publish, None)
            .await
            .map_err(TaskServiceError::Transport)?;

        info!(task_id = %id, original_path = %path, "task submitted");
        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn get_task(&self, id: Uuid) -> Result<TaskRecord, TaskServiceError> {
        self.retry
            .run("tasks.find", || self.tasks.find_task(id))
            .await
            .map_err(TaskServiceError::Persistence)?
            .ok_or(TaskServiceError::NotFound)
    }

    /// Remove a task with its original and derived blobs.
    ///
    /// Unknown ids succeed. Blob deletion failures are logged and do not stop
    /// the record from being removed.
    #[instrument(skip(self))]
    pub async fn delete_task(&self, id: Uuid) -> Result<(), TaskServiceError> {
        let task = match self.get_task(id).await {
            Ok(task) => task,
            Err(TaskServiceError::NotFound) => {
                info!(task_id = %id, "task already absent");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let mut paths = vec![task.original_path.clone()];
        paths.extend(
            Operation::ALL
                .iter()
                .map(|operation| derived_path(*operation, &task.original_path)),
        );
        for path in &paths {
            if let Err(err) = self.blobs.delete(path).await {
                warn!(task_id = %id, path = %path, error = %err, "failed to delete blob");
            }
        }

        self.retry
            .run("tasks.delete", || self.tasks.delete_task(id))
            .await
            .map_err(TaskServiceError::Persistence)?;

        info!(task_id = %id, "task deleted");
        Ok(())
    }
}
