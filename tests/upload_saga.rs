mod support;

use std::sync::atomic::Ordering;

use bytes::Bytes;
use uuid::Uuid;

use imgproc::application::repos::RepoError;
use imgproc::application::tasks::TaskServiceError;
use imgproc::domain::entities::ProcessingCommand;
use imgproc::domain::error::DomainError;
use imgproc::domain::types::TaskStatus;

use support::{Harness, png_bytes};

#[tokio::test]
async fn submit_stores_records_and_publishes() {
    let harness = Harness::new();

    let id = harness
        .service
        .submit(png_bytes(4, 4), "PNG")
        .await
        .expect("submit succeeds");

    let original = format!("original/{id}.png");
    assert!(harness.blobs.contains(&original).await);

    let task = harness.tasks.get(id).await.expect("task recorded");
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.original_path, original);
    assert_eq!(
        task.requested_operations,
        vec!["resize", "thumbnail", "watermark"]
    );

    let pending = harness.channel.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, id.to_string());
    let command = ProcessingCommand::decode(&pending[0].payload).expect("decodable command");
    assert_eq!(command, task.command());
}

#[tokio::test]
async fn empty_payload_is_rejected_without_side_effects() {
    let harness = Harness::new();

    let err = harness
        .service
        .submit(Bytes::new(), ".png")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TaskServiceError::Validation(DomainError::EmptyPayload)
    ));
    assert!(harness.blobs.paths().await.is_empty());
    assert_eq!(harness.tasks.len().await, 0);
    assert!(harness.channel.pending().await.is_empty());
}

#[tokio::test]
async fn disallowed_extension_is_rejected_without_side_effects() {
    let harness = Harness::new();

    let err = harness
        .service
        .submit(png_bytes(2, 2), ".bmp")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TaskServiceError::Validation(DomainError::ExtensionNotAllowed { .. })
    ));
    assert!(harness.blobs.paths().await.is_empty());
    assert_eq!(harness.tasks.len().await, 0);
}

#[tokio::test]
async fn blob_failure_stops_before_any_record() {
    let harness = Harness::new();
    harness.blobs.fail_save.store(true, Ordering::SeqCst);

    let err = harness
        .service
        .submit(png_bytes(2, 2), ".png")
        .await
        .unwrap_err();

    assert!(matches!(err, TaskServiceError::Storage(_)));
    assert_eq!(harness.tasks.create_attempts.load(Ordering::SeqCst), 0);
    assert!(harness.channel.pending().await.is_empty());
}

#[tokio::test]
async fn record_failure_removes_the_stored_original() {
    let harness = Harness::new();
    harness.tasks.reject_create.store(true, Ordering::SeqCst);

    let err = harness
        .service
        .submit(png_bytes(2, 2), ".jpg")
        .await
        .unwrap_err();

    assert!(matches!(err, TaskServiceError::Persistence(_)));
    assert_eq!(harness.tasks.create_attempts.load(Ordering::SeqCst), 1);
    assert!(harness.blobs.paths().await.is_empty());
    assert_eq!(harness.blobs.delete_calls.lock().await.len(), 1);
    assert!(harness.channel.pending().await.is_empty());
}

#[tokio::test]
async fn transient_record_failures_are_retried() {
    let harness = Harness::new();
    harness
        .tasks
        .transient_create_failures
        .store(2, Ordering::SeqCst);

    let id = harness
        .service
        .submit(png_bytes(2, 2), ".gif")
        .await
        .expect("retries recover");

    assert_eq!(harness.tasks.create_attempts.load(Ordering::SeqCst), 3);
    assert!(harness.tasks.get(id).await.is_some());
    assert_eq!(harness.channel.pending().await.len(), 1);
}

#[tokio::test]
async fn lost_create_acknowledgement_leaves_no_orphan_record() {
    let harness = Harness::new();
    harness.tasks.lost_create_acks.store(1, Ordering::SeqCst);

    let err = harness
        .service
        .submit(png_bytes(2, 2), ".png")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TaskServiceError::Persistence(RepoError::Duplicate { .. })
    ));
    assert_eq!(harness.tasks.create_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(harness.tasks.len().await, 0);
    assert!(harness.blobs.paths().await.is_empty());
    assert!(harness.channel.pending().await.is_empty());
}

#[tokio::test]
async fn publish_failure_unwinds_record_then_blob() {
    let harness = Harness::new();
    harness
        .channel
        .transient_publish_failures
        .store(100, Ordering::SeqCst);

    let err = harness
        .service
        .submit(png_bytes(2, 2), ".png")
        .await
        .unwrap_err();

    assert!(matches!(err, TaskServiceError::Transport(_)));
    assert_eq!(harness.channel.publish_attempts.load(Ordering::SeqCst), 5);
    assert_eq!(harness.tasks.len().await, 0);
    assert!(harness.blobs.paths().await.is_empty());
}

#[tokio::test]
async fn closed_channel_fails_fast() {
    let harness = Harness::new();
    harness.channel.closed.store(true, Ordering::SeqCst);

    let err = harness
        .service
        .submit(png_bytes(2, 2), ".png")
        .await
        .unwrap_err();

    assert!(matches!(err, TaskServiceError::Transport(_)));
    assert_eq!(harness.channel.publish_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.tasks.len().await, 0);
}

#[tokio::test]
async fn compensation_failure_keeps_the_original_error() {
    let harness = Harness::new();
    harness.tasks.reject_create.store(true, Ordering::SeqCst);
    harness.blobs.fail_delete.store(true, Ordering::SeqCst);

    let err = harness
        .service
        .submit(png_bytes(2, 2), ".png")
        .await
        .unwrap_err();

    assert!(matches!(err, TaskServiceError::Persistence(_)));
    assert_eq!(harness.blobs.paths().await.len(), 1);
}

#[tokio::test]
async fn get_task_reports_missing_ids() {
    let harness = Harness::new();

    let err = harness.service.get_task(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, TaskServiceError::NotFound));
}

#[tokio::test]
async fn delete_removes_original_derived_blobs_and_record() {
    let harness = Harness::new();
    let id = harness
        .service
        .submit(png_bytes(2, 2), ".png")
        .await
        .unwrap();
    for op in ["resize", "thumbnail", "watermark"] {
        harness
            .blobs
            .put(&format!("processed/{op}/{id}.png"), b"derived")
            .await;
    }

    harness.service.delete_task(id).await.expect("delete succeeds");

    assert!(harness.blobs.paths().await.is_empty());
    assert!(harness.tasks.get(id).await.is_none());
    assert!(matches!(
        harness.service.get_task(id).await,
        Err(TaskServiceError::NotFound)
    ));
}

#[tokio::test]
async fn delete_of_unknown_task_succeeds() {
    let harness = Harness::new();

    harness
        .service
        .delete_task(Uuid::new_v4())
        .await
        .expect("absent task is not an error");
    assert!(harness.blobs.delete_calls.lock().await.is_empty());
}

#[tokio::test]
async fn delete_continues_past_blob_failures() {
    let harness = Harness::new();
    let id = harness
        .service
        .submit(png_bytes(2, 2), ".png")
        .await
        .unwrap();
    harness.blobs.fail_delete.store(true, Ordering::SeqCst);

    harness.service.delete_task(id).await.expect("record removed");

    assert!(harness.tasks.get(id).await.is_none());
    assert_eq!(harness.blobs.delete_calls.lock().await.len(), 4);
}

#[tokio::test]
async fn delete_reports_record_failures() {
    let harness = Harness::new();
    let id = harness
        .service
        .submit(png_bytes(2, 2), ".png")
        .await
        .unwrap();
    harness.tasks.fail_delete.store(true, Ordering::SeqCst);

    let err = harness.service.delete_task(id).await.unwrap_err();
    assert!(matches!(err, TaskServiceError::Persistence(_)));
}
