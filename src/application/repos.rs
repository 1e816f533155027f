//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::application::retry::Transient;
use crate::domain::entities::TaskRecord;
use crate::domain::types::TaskStatus;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl Transient for RepoError {
    fn is_transient(&self) -> bool {
        matches!(self, RepoError::Persistence(_) | RepoError::Timeout)
    }
}

/// Durable task records keyed by id.
#[async_trait]
pub trait TasksRepo: Send + Sync {
    async fn create_task(&self, task: &TaskRecord) -> Result<(), RepoError>;

    /// Overwrite the status of an existing task. Missing rows yield [`RepoError::NotFound`].
    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), RepoError>;

    async fn find_task(&self, id: Uuid) -> Result<Option<TaskRecord>, RepoError>;

    /// Remove a task record. Missing rows are not an error.
    async fn delete_task(&self, id: Uuid) -> Result<(), RepoError>;
}
