//! Image transformation port.

use async_trait::async_trait;
use thiserror::Error;

use crate::application::blobs::BlobError;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("transform task failed: {0}")]
    Runtime(String),
}

/// Named transformations reading one stored image and writing another.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    /// Scale to exactly `width` x `height`.
    async fn resize(
        &self,
        source: &str,
        target: &str,
        width: u32,
        height: u32,
    ) -> Result<(), TransformError>;

    /// Fit inside `max_width` x `max_height`, preserving aspect ratio.
    async fn thumbnail(
        &self,
        source: &str,
        target: &str,
        max_width: u32,
        max_height: u32,
    ) -> Result<(), TransformError>;

    /// Composite the configured overlay near the bottom-right corner.
    async fn watermark(&self, source: &str, target: &str) -> Result<(), TransformError>;
}
