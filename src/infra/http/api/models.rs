use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::TaskRecord;
use crate::domain::paths::derived_path;
use crate::domain::types::{Operation, TaskStatus};

#[derive(Debug, Deserialize, Serialize)]
pub struct UploadResponse {
    pub task_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TaskEnvelope {
    pub task: TaskResponse,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub status: TaskStatus,
    pub original_path: String,
    pub requested_operations: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Derived blob path per requested operation the worker understands.
    pub processed_paths: BTreeMap<String, String>,
}

impl From<TaskRecord> for TaskResponse {
    fn from(task: TaskRecord) -> Self {
        let processed_paths = task
            .requested_operations
            .iter()
            .filter_map(|name| Operation::try_from(name.as_str()).ok())
            .map(|operation| {
                (
                    operation.as_str().to_string(),
                    derived_path(operation, &task.original_path),
                )
            })
            .collect();

        Self {
            id: task.id,
            status: task.status,
            original_path: task.original_path,
            requested_operations: task.requested_operations,
            created_at: task.created_at,
            processed_paths,
        }
    }
}
