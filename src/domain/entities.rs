//! Domain entities shared across layers.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::types::{Operation, TaskStatus};

/// Durable record of one upload's processing lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub status: TaskStatus,
    pub original_path: String,
    pub requested_operations: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl TaskRecord {
    pub fn processing(
        id: Uuid,
        original_path: String,
        operations: &[Operation],
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            status: TaskStatus::Processing,
            original_path,
            requested_operations: operations.iter().map(|op| op.as_str().to_string()).collect(),
            created_at,
        }
    }

    /// Point-in-time copy of the fields the worker needs.
    pub fn command(&self) -> ProcessingCommand {
        ProcessingCommand {
            id: self.id,
            original_path: self.original_path.clone(),
            requested_operations: self.requested_operations.clone(),
            created_at: self.created_at,
        }
    }
}

/// Wire message describing work for the processing worker.
///
/// Encoded as JSON; unknown fields are ignored when decoding so producers may add
/// fields without breaking older workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingCommand {
    pub id: Uuid,
    pub original_path: String,
    pub requested_operations: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ProcessingCommand {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample_task() -> TaskRecord {
        TaskRecord::processing(
            Uuid::new_v4(),
            "original/sample.png".into(),
            &[Operation::Resize, Operation::Watermark],
            datetime!(2025-03-01 12:00:00 UTC),
        )
    }

    #[test]
    fn command_copies_the_task_snapshot() {
        let task = sample_task();
        let command = task.command();

        assert_eq!(command.id, task.id);
        assert_eq!(command.original_path, task.original_path);
        assert_eq!(command.requested_operations, ["resize", "watermark"]);
        assert_eq!(command.created_at, task.created_at);
    }

    #[test]
    fn command_wire_format_uses_stable_field_names() {
        let command = sample_task().command();
        let value: serde_json::Value = serde_json::from_slice(&command.encode().unwrap()).unwrap();

        assert_eq!(value["id"], command.id.to_string());
        assert_eq!(value["original_path"], "original/sample.png");
        assert_eq!(value["requested_operations"][1], "watermark");
        assert_eq!(value["created_at"], "2025-03-01T12:00:00Z");
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let id = Uuid::new_v4();
        let payload = format!(
            r#"{{"id":"{id}","original_path":"original/x.gif","requested_operations":["resize"],"created_at":"2025-03-01T12:00:00Z","priority":7}}"#
        );

        let command = ProcessingCommand::decode(payload.as_bytes()).unwrap();
        assert_eq!(command.id, id);
        assert_eq!(command.requested_operations, ["resize"]);
    }

    #[test]
    fn decode_rejects_structurally_invalid_payloads() {
        assert!(ProcessingCommand::decode(b"not json").is_err());
        assert!(ProcessingCommand::decode(br#"{"id":"not-a-uuid"}"#).is_err());
    }
}
