//! `image`-crate implementation of the transformation port.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};

use crate::application::blobs::BlobStore;
use crate::application::transform::{ImageTransformer, TransformError};
use crate::infra::error::InfraError;

/// Applies transformations to images held in a [`BlobStore`].
///
/// Output is written in the source image's format. Pixel work runs on the
/// blocking pool.
pub struct ImageModifier {
    blobs: Arc<dyn BlobStore>,
    watermark: Arc<RgbaImage>,
    margin: u32,
}

impl ImageModifier {
    pub fn new(blobs: Arc<dyn BlobStore>, watermark: DynamicImage, margin: u32) -> Self {
        Self {
            blobs,
            watermark: Arc::new(watermark.to_rgba8()),
            margin,
        }
    }

    /// Read the overlay image from the local filesystem.
    pub fn load_watermark(path: &Path) -> Result<DynamicImage, InfraError> {
        image::open(path).map_err(|source| InfraError::Watermark {
            path: path.display().to_string(),
            source,
        })
    }

    async fn apply<F>(&self, source: &str, target: &str, op: F) -> Result<(), TransformError>
    where
        F: FnOnce(DynamicImage) -> DynamicImage + Send + 'static,
    {
        let (image, format) = self.blobs.load_image(source).await?;
        let output = tokio::task::spawn_blocking(move || op(image))
            .await
            .map_err(|err| TransformError::Runtime(err.to_string()))?;
        self.blobs.save_image(target, output, format).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageTransformer for ImageModifier {
    async fn resize(
        &self,
        source: &str,
        target: &str,
        width: u32,
        height: u32,
    ) -> Result<(), TransformError> {
        self.apply(source, target, move |image| {
            image.resize_exact(width, height, FilterType::Lanczos3)
        })
        .await
    }

    async fn thumbnail(
        &self,
        source: &str,
        target: &str,
        max_width: u32,
        max_height: u32,
    ) -> Result<(), TransformError> {
        self.apply(source, target, move |image| {
            if image.width() <= max_width && image.height() <= max_height {
                image
            } else {
                image.thumbnail(max_width, max_height)
            }
        })
        .await
    }

    async fn watermark(&self, source: &str, target: &str) -> Result<(), TransformError> {
        let overlay = Arc::clone(&self.watermark);
        let margin = i64::from(self.margin);
        self.apply(source, target, move |image| {
            let mut canvas = image.to_rgba8();
            let x = i64::from(canvas.width()) - i64::from(overlay.width()) - margin;
            let y = i64::from(canvas.height()) - i64::from(overlay.height()) - margin;
            imageops::overlay(&mut canvas, overlay.as_ref(), x, y);
            DynamicImage::ImageRgba8(canvas)
        })
        .await
    }
}
