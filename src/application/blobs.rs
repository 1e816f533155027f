//! Blob storage port.
//!
//! Keys are logical `/`-separated paths. Image helpers decode and encode on the
//! blocking pool so adapters only need to move bytes.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageError, ImageFormat};
use thiserror::Error;

const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob path `{path}`")]
    InvalidPath { path: String },
    #[error("blob `{path}` not found")]
    NotFound { path: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to decode image `{path}`")]
    Decode {
        path: String,
        #[source]
        source: ImageError,
    },
    #[error("failed to encode image `{path}`")]
    Encode {
        path: String,
        #[source]
        source: ImageError,
    },
}

impl BlobError {
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `data` at `path`, replacing any previous content.
    async fn save(&self, path: &str, data: Bytes) -> Result<(), BlobError>;

    async fn read(&self, path: &str) -> Result<Bytes, BlobError>;

    /// Remove the blob at `path`. Missing blobs are treated as success.
    async fn delete(&self, path: &str) -> Result<(), BlobError>;

    /// Load and decode the image at `path`, returning it with its detected format.
    async fn load_image(&self, path: &str) -> Result<(DynamicImage, ImageFormat), BlobError> {
        let data = self.read(path).await?;
        let owned_path = path.to_string();
        tokio::task::spawn_blocking(move || decode_image(&owned_path, &data))
            .await
            .map_err(|err| BlobError::Io(std::io::Error::other(err)))?
    }

    /// Encode `image` in `format` and write it at `path`.
    async fn save_image(
        &self,
        path: &str,
        image: DynamicImage,
        format: ImageFormat,
    ) -> Result<(), BlobError> {
        let owned_path = path.to_string();
        let encoded = tokio::task::spawn_blocking(move || encode_image(&owned_path, &image, format))
            .await
            .map_err(|err| BlobError::Io(std::io::Error::other(err)))??;
        self.save(path, Bytes::from(encoded)).await
    }
}

pub fn decode_image(path: &str, data: &[u8]) -> Result<(DynamicImage, ImageFormat), BlobError> {
    let decode_err = |source| BlobError::Decode {
        path: path.to_string(),
        source,
    };
    let format = image::guess_format(data).map_err(decode_err)?;
    let image = image::load_from_memory_with_format(data, format).map_err(decode_err)?;
    Ok((image, format))
}

pub fn encode_image(
    path: &str,
    image: &DynamicImage,
    format: ImageFormat,
) -> Result<Vec<u8>, BlobError> {
    let mut buffer = Cursor::new(Vec::new());
    let result = match format {
        // JPEG has no alpha channel; composites are flattened first.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)),
        other => image.write_to(&mut buffer, other),
    };
    result.map_err(|source| BlobError::Encode {
        path: path.to_string(),
        source,
    })?;
    Ok(buffer.into_inner())
}
