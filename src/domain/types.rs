//! Shared domain enumerations aligned with persisted database enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a processing task (mirrors Postgres enum `task_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named transformation the worker knows how to apply.
///
/// The set is closed: names arriving on the wire that do not parse into one of
/// these variants are skipped by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Resize,
    Thumbnail,
    Watermark,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Resize, Operation::Thumbnail, Operation::Watermark];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Resize => "resize",
            Operation::Thumbnail => "thumbnail",
            Operation::Watermark => "watermark",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Operation {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "resize" => Ok(Operation::Resize),
            "thumbnail" => Ok(Operation::Thumbnail),
            "watermark" => Ok(Operation::Watermark),
            _ => Err(()),
        }
    }
}

/// Pipeline attached to every uploaded image.
pub const DEFAULT_PIPELINE: [Operation; 3] = Operation::ALL;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_are_exact_and_case_sensitive() {
        assert_eq!(Operation::try_from("resize"), Ok(Operation::Resize));
        assert_eq!(Operation::try_from("thumbnail"), Ok(Operation::Thumbnail));
        assert_eq!(Operation::try_from("watermark"), Ok(Operation::Watermark));
        assert_eq!(Operation::try_from("Resize"), Err(()));
        assert_eq!(Operation::try_from("blur"), Err(()));
        assert_eq!(Operation::try_from(""), Err(()));
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        let parsed: TaskStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(parsed, TaskStatus::Failed);
    }

    #[test]
    fn default_pipeline_keeps_declared_order() {
        let names: Vec<_> = DEFAULT_PIPELINE.iter().map(|op| op.as_str()).collect();
        assert_eq!(names, ["resize", "thumbnail", "watermark"]);
    }
}
