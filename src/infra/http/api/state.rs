use std::sync::Arc;

use crate::application::blobs::BlobStore;
use crate::application::tasks::TaskService;

#[derive(Clone)]
pub struct ApiState {
    pub tasks: Arc<TaskService>,
    pub blobs: Arc<dyn BlobStore>,
}
