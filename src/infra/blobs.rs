//! Filesystem-backed blob storage.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::application::blobs::{BlobError, BlobStore};

/// Blob store rooted at a directory; logical paths map to relative file paths.
#[derive(Debug)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the absolute filesystem path for a logical blob path.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(path);
        if path.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(BlobError::invalid_path(path));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn save(&self, path: &str, data: Bytes) -> Result<(), BlobError> {
        let absolute = self.resolve(path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Readers never observe a partially written file.
        let staging = absolute.with_extension(format!("{}.partial", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&staging).await?;
        let written = async {
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(err) = written {
            let _ = fs::remove_file(&staging).await;
            return Err(BlobError::Io(err));
        }
        if let Err(err) = fs::rename(&staging, &absolute).await {
            let _ = fs::remove_file(&staging).await;
            return Err(BlobError::Io(err));
        }
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Bytes, BlobError> {
        let absolute = self.resolve(path)?;
        match fs::read(&absolute).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::not_found(path))
            }
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        let absolute = self.resolve(path)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BlobError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FilesystemBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path().join("images")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn save_creates_nested_directories_and_overwrites() {
        let (_dir, store) = store();

        store
            .save("processed/resize/a.png", Bytes::from_static(b"first"))
            .await
            .unwrap();
        store
            .save("processed/resize/a.png", Bytes::from_static(b"second"))
            .await
            .unwrap();

        let data = store.read("processed/resize/a.png").await.unwrap();
        assert_eq!(&data[..], b"second");

        let leftovers: Vec<_> = std::fs::read_dir(store.root().join("processed/resize"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store();
        store
            .save("original/a.jpg", Bytes::from_static(b"jpg"))
            .await
            .unwrap();

        store.delete("original/a.jpg").await.unwrap();
        store.delete("original/a.jpg").await.unwrap();

        assert!(matches!(
            store.read("original/a.jpg").await,
            Err(BlobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let (_dir, store) = store();

        for path in ["../outside.png", "/etc/passwd", "original/../../x", ""] {
            let err = store
                .save(path, Bytes::from_static(b"x"))
                .await
                .unwrap_err();
            assert!(matches!(err, BlobError::InvalidPath { .. }), "{path}");
        }
    }
}
