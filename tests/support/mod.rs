#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tokio::sync::Mutex;
use uuid::Uuid;

use imgproc::application::blobs::{BlobError, BlobStore, encode_image};
use imgproc::application::channel::{ChannelError, Delivery, MessageChannel};
use imgproc::application::repos::{RepoError, TasksRepo};
use imgproc::application::retry::RetryPolicy;
use imgproc::application::tasks::TaskService;
use imgproc::application::transform::{ImageTransformer, TransformError};
use imgproc::domain::entities::TaskRecord;
use imgproc::domain::types::TaskStatus;

/// Decrement `counter` if positive, reporting whether a failure should be injected.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
pub struct MemoryTasks {
    pub tasks: Mutex<HashMap<Uuid, TaskRecord>>,
    pub status_history: Mutex<Vec<(Uuid, TaskStatus)>>,
    pub create_attempts: AtomicU32,
    pub transient_create_failures: AtomicU32,
    /// Create calls that write the row but report a transient failure.
    pub lost_create_acks: AtomicU32,
    pub reject_create: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl MemoryTasks {
    pub async fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.tasks.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn insert(&self, task: TaskRecord) {
        self.tasks.lock().await.insert(task.id, task);
    }

    pub async fn history(&self) -> Vec<TaskStatus> {
        self.status_history
            .lock()
            .await
            .iter()
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl TasksRepo for MemoryTasks {
    async fn create_task(&self, task: &TaskRecord) -> Result<(), RepoError> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject_create.load(Ordering::SeqCst) {
            return Err(RepoError::InvalidInput {
                message: "rejected by test".into(),
            });
        }
        if take_failure(&self.transient_create_failures) {
            return Err(RepoError::Persistence("connection reset".into()));
        }
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(RepoError::Duplicate {
                constraint: "tasks_pkey".into(),
            });
        }
        tasks.insert(task.id, task.clone());
        if take_failure(&self.lost_create_acks) {
            return Err(RepoError::Persistence("connection reset".into()));
        }
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), RepoError> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(&id).ok_or(RepoError::NotFound)?;
        task.status = status;
        self.status_history.lock().await.push((id, status));
        Ok(())
    }

    async fn find_task(&self, id: Uuid) -> Result<Option<TaskRecord>, RepoError> {
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn delete_task(&self, id: Uuid) -> Result<(), RepoError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(RepoError::InvalidInput {
                message: "delete rejected by test".into(),
            });
        }
        self.tasks.lock().await.remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBlobs {
    pub blobs: Mutex<HashMap<String, Bytes>>,
    pub fail_save: AtomicBool,
    pub fail_delete: AtomicBool,
    pub delete_calls: Mutex<Vec<String>>,
}

impl MemoryBlobs {
    pub async fn contains(&self, path: &str) -> bool {
        self.blobs.lock().await.contains_key(path)
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.blobs.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub async fn put(&self, path: &str, data: &[u8]) {
        self.blobs
            .lock()
            .await
            .insert(path.to_string(), Bytes::copy_from_slice(data));
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn save(&self, path: &str, data: Bytes) -> Result<(), BlobError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(BlobError::Io(std::io::Error::other("disk full")));
        }
        self.blobs.lock().await.insert(path.to_string(), data);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Bytes, BlobError> {
        self.blobs
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::not_found(path))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        self.delete_calls.lock().await.push(path.to_string());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(BlobError::Io(std::io::Error::other("permission denied")));
        }
        self.blobs.lock().await.remove(path);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryChannel {
    pub queue: Mutex<VecDeque<Delivery>>,
    pub committed: Mutex<Vec<i64>>,
    pub next_id: AtomicI64,
    pub publish_attempts: AtomicU32,
    pub transient_publish_failures: AtomicU32,
    pub fetch_attempts: AtomicU32,
    pub transient_fetch_failures: AtomicU32,
    pub transient_commit_failures: AtomicU32,
    pub closed: AtomicBool,
}

impl MemoryChannel {
    pub async fn inject(&self, key: &str, payload: &[u8]) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.queue.lock().await.push_back(Delivery {
            id,
            key: key.to_string(),
            payload: Bytes::copy_from_slice(payload),
            attempt: 0,
        });
        id
    }

    pub async fn pending(&self) -> Vec<Delivery> {
        self.queue.lock().await.iter().cloned().collect()
    }

    pub async fn committed(&self) -> Vec<i64> {
        self.committed.lock().await.clone()
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn publish(&self, key: &str, payload: Bytes) -> Result<(), ChannelError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        if take_failure(&self.transient_publish_failures) {
            return Err(ChannelError::Transport("broker unavailable".into()));
        }
        self.inject(key, &payload).await;
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<Delivery>, ChannelError> {
        self.fetch_attempts.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        if take_failure(&self.transient_fetch_failures) {
            return Err(ChannelError::Transport("fetch timed out".into()));
        }
        let next = self.queue.lock().await.pop_front();
        match next {
            Some(mut delivery) => {
                delivery.attempt += 1;
                Ok(Some(delivery))
            }
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(None)
            }
        }
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        if take_failure(&self.transient_commit_failures) {
            return Err(ChannelError::Transport("commit rejected".into()));
        }
        self.committed.lock().await.push(delivery.id);
        Ok(())
    }
}

/// One recorded transformer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformCall {
    pub operation: &'static str,
    pub source: String,
    pub target: String,
    pub dimensions: Option<(u32, u32)>,
}

#[derive(Default)]
pub struct RecordingTransformer {
    pub calls: Mutex<Vec<TransformCall>>,
    pub failing: Mutex<HashSet<&'static str>>,
}

impl RecordingTransformer {
    pub async fn fail_on(&self, operation: &'static str) {
        self.failing.lock().await.insert(operation);
    }

    pub async fn calls(&self) -> Vec<TransformCall> {
        self.calls.lock().await.clone()
    }

    async fn record(
        &self,
        operation: &'static str,
        source: &str,
        target: &str,
        dimensions: Option<(u32, u32)>,
    ) -> Result<(), TransformError> {
        self.calls.lock().await.push(TransformCall {
            operation,
            source: source.to_string(),
            target: target.to_string(),
            dimensions,
        });
        if self.failing.lock().await.contains(operation) {
            return Err(TransformError::Blob(BlobError::not_found(source)));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageTransformer for RecordingTransformer {
    async fn resize(
        &self,
        source: &str,
        target: &str,
        width: u32,
        height: u32,
    ) -> Result<(), TransformError> {
        self.record("resize", source, target, Some((width, height)))
            .await
    }

    async fn thumbnail(
        &self,
        source: &str,
        target: &str,
        max_width: u32,
        max_height: u32,
    ) -> Result<(), TransformError> {
        self.record("thumbnail", source, target, Some((max_width, max_height)))
            .await
    }

    async fn watermark(&self, source: &str, target: &str) -> Result<(), TransformError> {
        self.record("watermark", source, target, None).await
    }
}

/// Shared fakes plus a service wired to them.
pub struct Harness {
    pub tasks: Arc<MemoryTasks>,
    pub blobs: Arc<MemoryBlobs>,
    pub channel: Arc<MemoryChannel>,
    pub service: TaskService,
}

impl Harness {
    pub fn new() -> Self {
        let tasks = Arc::new(MemoryTasks::default());
        let blobs = Arc::new(MemoryBlobs::default());
        let channel = Arc::new(MemoryChannel::default());
        let service = TaskService::new(
            tasks.clone(),
            blobs.clone(),
            channel.clone(),
            RetryPolicy::default(),
        );
        Self {
            tasks,
            blobs,
            channel,
            service,
        }
    }
}

pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba([30, 120, 200, 255]),
    ));
    Bytes::from(encode_image("fixture.png", &image, ImageFormat::Png).expect("encode fixture"))
}
