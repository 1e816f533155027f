use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{RepoError, TasksRepo},
    domain::{entities::TaskRecord, types::TaskStatus},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    status: TaskStatus,
    original_path: String,
    requested_operations: Vec<String>,
    created_at: OffsetDateTime,
}

impl From<TaskRow> for TaskRecord {
    fn from(row: TaskRow) -> Self {
        Self {
            id: row.id,
            status: row.status,
            original_path: row.original_path,
            requested_operations: row.requested_operations,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl TasksRepo for PostgresRepositories {
    async fn create_task(&self, task: &TaskRecord) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, status, original_path, requested_operations, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
        )
        .bind(task.id)
        .bind(task.status)
        .bind(&task.original_path)
        .bind(&task.requested_operations)
        .bind(task.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn find_task(&self, id: Uuid) -> Result<Option<TaskRecord>, RepoError> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, status, original_path, requested_operations, created_at
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(TaskRecord::from))
    }

    async fn delete_task(&self, id: Uuid) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }
}
