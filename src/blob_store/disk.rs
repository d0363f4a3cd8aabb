/// Disk-based blob storage backend
use crate::{
    blob_store::BlobBackend,
    drop_store::DropId,
    error::{DropError, DropResult},
};
use async_trait::async_trait;
use rand::Rng;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::{fs, io::AsyncWriteExt};

const STAGING_SUFFIX: &str = ".part";

/// Disk storage backend
///
/// Stores blobs on the local filesystem with directory sharding based on
/// id prefixes. Writes land in a staging directory first and are renamed
/// into place, so readers never observe a partially written blob. The
/// staging directory must live on the same filesystem as the blob root.
#[derive(Clone)]
pub struct DiskBlobBackend {
    base_path: PathBuf,
    staging_path: PathBuf,
}

impl DiskBlobBackend {
    /// Create a new disk storage backend
    pub fn new(base_path: PathBuf, staging_path: PathBuf) -> Self {
        Self {
            base_path,
            staging_path,
        }
    }

    /// Get the file path for an id
    ///
    /// Uses directory sharding: {base}/{first2chars}/{id}
    fn get_blob_path(&self, id: &DropId) -> PathBuf {
        let id = id.as_str();
        self.base_path.join(&id[0..2]).join(id)
    }

    fn staging_file(&self, id: &DropId) -> PathBuf {
        let nonce: u64 = rand::thread_rng().gen();
        self.staging_path
            .join(format!("{}.{:016x}{}", id, nonce, STAGING_SUFFIX))
    }

    /// Ensure the directory for a blob exists
    async fn ensure_blob_dir(&self, id: &DropId) -> DropResult<PathBuf> {
        let blob_path = self.get_blob_path(id);
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                DropError::Storage(format!("Failed to create blob directory: {}", e))
            })?;
        }
        Ok(blob_path)
    }

    async fn write_staged(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl BlobBackend for DiskBlobBackend {
    async fn put(&self, id: &DropId, data: &[u8]) -> DropResult<()> {
        let blob_path = self.ensure_blob_dir(id).await?;

        if fs::try_exists(&blob_path).await? {
            return Err(DropError::Conflict(format!("Blob already exists: {}", id)));
        }

        fs::create_dir_all(&self.staging_path).await.map_err(|e| {
            DropError::Storage(format!("Failed to create staging directory: {}", e))
        })?;

        let staged = self.staging_file(id);
        if let Err(e) = self.write_staged(&staged, data).await {
            let _ = fs::remove_file(&staged).await;
            return Err(DropError::Storage(format!(
                "Failed to write blob {}: {}",
                id, e
            )));
        }

        if let Err(e) = fs::rename(&staged, &blob_path).await {
            let _ = fs::remove_file(&staged).await;
            return Err(DropError::Storage(format!(
                "Failed to commit blob {}: {}",
                id, e
            )));
        }

        Ok(())
    }

    async fn get(&self, id: &DropId) -> DropResult<Vec<u8>> {
        let blob_path = self.get_blob_path(id);

        match fs::read(&blob_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(DropError::NotFound),
            Err(e) => Err(DropError::Storage(format!(
                "Failed to read blob {}: {}",
                id, e
            ))),
        }
    }

    async fn delete(&self, id: &DropId) -> DropResult<()> {
        let blob_path = self.get_blob_path(id);

        match fs::remove_file(&blob_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(DropError::NotFound),
            Err(e) => Err(DropError::Storage(format!(
                "Failed to delete blob {}: {}",
                id, e
            ))),
        }
    }

    async fn exists(&self, id: &DropId) -> DropResult<bool> {
        let blob_path = self.get_blob_path(id);
        Ok(fs::try_exists(&blob_path).await?)
    }

    async fn list_older_than(&self, cutoff: SystemTime) -> DropResult<Vec<DropId>> {
        let mut ids = Vec::new();

        let mut shards = match fs::read_dir(&self.base_path).await {
            Ok(shards) => shards,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }

            let mut entries = match fs::read_dir(shard.path()).await {
                Ok(entries) => entries,
                // Shard removed underneath us
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let Some(id) = entry.file_name().to_str().and_then(DropId::parse) else {
                    continue;
                };
                let modified = match entry.metadata().await {
                    Ok(metadata) => metadata.modified()?,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                if modified < cutoff {
                    ids.push(id);
                }
            }
        }

        Ok(ids)
    }

    async fn purge_staging(&self, cutoff: SystemTime) -> DropResult<u64> {
        let mut entries = match fs::read_dir(&self.staging_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let is_staged = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(STAGING_SUFFIX));
            if !is_staged {
                continue;
            }

            let modified = match entry.metadata().await {
                Ok(metadata) => metadata.modified()?,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            if modified < cutoff {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(removed)
    }

    async fn health_check(&self) -> DropResult<()> {
        for dir in [&self.base_path, &self.staging_path] {
            fs::create_dir_all(dir).await.map_err(|e| {
                DropError::Storage(format!("Blob directory {:?} unavailable: {}", dir, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn backend_in(dir: &Path) -> DiskBlobBackend {
        DiskBlobBackend::new(dir.join("blobs"), dir.join("tmp"))
    }

    #[tokio::test]
    async fn test_put_and_get_blob() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        let id = DropId::generate();
        let data = b"test blob data".to_vec();

        backend.put(&id, &data).await.unwrap();

        let retrieved = backend.get(&id).await.unwrap();
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_get_nonexistent_blob() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        let err = backend.get(&DropId::generate()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_put_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        let id = DropId::generate();
        backend.put(&id, b"first").await.unwrap();
        let err = backend.put(&id, b"second").await.unwrap_err();
        assert!(matches!(err, DropError::Conflict(_)));
        assert_eq!(backend.get(&id).await.unwrap(), b"first".to_vec());
    }

    #[tokio::test]
    async fn test_delete_blob() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        let id = DropId::generate();
        backend.put(&id, b"to be deleted").await.unwrap();
        assert!(backend.exists(&id).await.unwrap());

        backend.delete(&id).await.unwrap();
        assert!(!backend.exists(&id).await.unwrap());
        assert!(backend.delete(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_staging_is_empty_after_put() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        backend.put(&DropId::generate(), b"abc").await.unwrap();

        let mut entries = fs::read_dir(dir.path().join("tmp")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_sharding() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        let id = DropId::generate();
        let path = backend.get_blob_path(&id);
        let shard = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert_eq!(shard, &id.as_str()[0..2]);
    }

    #[tokio::test]
    async fn test_list_older_than() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        let id = DropId::generate();
        backend.put(&id, b"old enough").await.unwrap();

        let future = SystemTime::now() + Duration::from_secs(60);
        let past = SystemTime::now() - Duration::from_secs(60);

        assert_eq!(backend.list_older_than(future).await.unwrap(), vec![id]);
        assert!(backend.list_older_than(past).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_on_missing_root() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());
        assert!(backend
            .list_older_than(SystemTime::now())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_purge_staging() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());
        backend.health_check().await.unwrap();

        let leftover = dir.path().join("tmp").join(format!("abc.0000{}", STAGING_SUFFIX));
        fs::write(&leftover, b"partial").await.unwrap();
        let unrelated = dir.path().join("tmp").join("keep.txt");
        fs::write(&unrelated, b"keep").await.unwrap();

        let past = SystemTime::now() - Duration::from_secs(60);
        assert_eq!(backend.purge_staging(past).await.unwrap(), 0);

        let future = SystemTime::now() + Duration::from_secs(60);
        assert_eq!(backend.purge_staging(future).await.unwrap(), 1);
        assert!(!leftover.exists());
        assert!(unrelated.exists());
    }
}
