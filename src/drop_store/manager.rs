/// Drop lifecycle manager
///
/// Owns the ordering rules between metadata and content:
/// - create writes the blob first, then the row
/// - delete removes the row first, then the blob
///
/// A failure between the two steps can only leave an unreferenced blob,
/// which orphan reconciliation removes later.
use crate::{
    blob_store::BlobBackend,
    drop_store::{DropId, DropRecord, DropStore, NewDrop},
    error::{DropError, DropResult},
    metrics::{self, DeleteReason},
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts at finding an unused id before giving up
const CREATE_ATTEMPTS: usize = 3;

/// Validated upload ready to be stored
#[derive(Debug, Clone)]
pub struct DropUpload {
    pub data: Vec<u8>,
    pub content_type: String,
    pub filename: Option<String>,
    pub ttl: Option<Duration>,
    pub max_downloads: Option<u32>,
}

/// A drop and its content, returned by a successful download
#[derive(Debug, Clone)]
pub struct FetchedDrop {
    pub record: DropRecord,
    pub data: Vec<u8>,
}

#[derive(Clone)]
pub struct DropManager {
    store: Arc<DropStore>,
    blobs: Arc<dyn BlobBackend>,
}

impl DropManager {
    pub fn new(store: Arc<DropStore>, blobs: Arc<dyn BlobBackend>) -> Self {
        Self { store, blobs }
    }

    pub fn store(&self) -> &DropStore {
        &self.store
    }

    pub fn blobs(&self) -> &dyn BlobBackend {
        self.blobs.as_ref()
    }

    /// Store content and its metadata under a fresh id
    pub async fn create(&self, upload: DropUpload) -> DropResult<DropRecord> {
        let size = upload.data.len() as i64;
        let checksum = hex::encode(Sha256::digest(&upload.data));

        for _ in 0..CREATE_ATTEMPTS {
            let id = DropId::generate();

            match self.blobs.put(&id, &upload.data).await {
                Ok(()) => {}
                Err(DropError::Conflict(_)) => {
                    warn!("Blob id collision on {}, retrying", id);
                    continue;
                }
                Err(e) => return Err(e),
            }

            let new_drop = NewDrop {
                id: id.clone(),
                size,
                content_type: upload.content_type.clone(),
                filename: upload.filename.clone(),
                checksum: checksum.clone(),
                ttl: upload.ttl,
                max_downloads: upload.max_downloads,
            };

            match self.store.create(new_drop).await {
                Ok(record) => {
                    metrics::record_drop_created(size as u64);
                    info!(
                        "Created drop {} ({} bytes, expires {})",
                        record.id,
                        record.size,
                        record
                            .expires_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string())
                    );
                    return Ok(record);
                }
                Err(DropError::Conflict(_)) => {
                    // Our blob went in under an id that already has a row
                    warn!("Metadata id collision on {}, retrying", id);
                    self.discard_blob(&id).await;
                }
                Err(e) => {
                    self.discard_blob(&id).await;
                    return Err(e);
                }
            }
        }

        Err(DropError::Internal(
            "Could not allocate a unique drop id".to_string(),
        ))
    }

    /// Metadata of a live drop, without consuming a download
    pub async fn describe(&self, id: &DropId) -> DropResult<DropRecord> {
        self.store.get(id, Utc::now()).await
    }

    /// Fetch content and count the download.
    ///
    /// The row is checked before the blob is read, and the download is only
    /// counted once the blob has been read and verified, so a racing delete
    /// yields either the old content or `NotFound`.
    pub async fn fetch(&self, id: &DropId) -> DropResult<FetchedDrop> {
        let record = self.store.get(id, Utc::now()).await?;
        let data = self.blobs.get(id).await?;

        if hex::encode(Sha256::digest(&data)) != record.checksum {
            return Err(DropError::Storage(format!(
                "Checksum mismatch for drop {}",
                id
            )));
        }

        let record = self.store.claim_download(id, Utc::now()).await?;
        metrics::record_drop_downloaded();

        if record.is_exhausted() {
            // Last permitted download: reclaim now instead of waiting for a sweep
            let manager = self.clone();
            let exhausted = record.id.clone();
            tokio::spawn(async move {
                match manager.delete(&exhausted, DeleteReason::Exhausted).await {
                    Ok(()) | Err(DropError::NotFound) => {}
                    Err(e) => warn!("Failed to reclaim exhausted drop {}: {}", exhausted, e),
                }
            });
        }

        Ok(FetchedDrop { record, data })
    }

    /// Remove metadata, then content.
    ///
    /// `NotFound` means the row was already gone. A missing blob after a
    /// successful row delete is not an error.
    pub async fn delete(&self, id: &DropId, reason: DeleteReason) -> DropResult<()> {
        self.store.delete(id).await?;

        match self.blobs.delete(id).await {
            Ok(()) => {}
            Err(DropError::NotFound) => {
                warn!("Drop {} had no blob at delete time", id);
            }
            Err(e) => {
                // Row is gone so nobody can reach the blob; reconciliation will retry
                warn!("Failed to delete blob for drop {}: {}", id, e);
            }
        }

        metrics::record_drop_deleted(reason);
        debug!("Deleted drop {} ({})", id, reason.as_str());
        Ok(())
    }

    async fn discard_blob(&self, id: &DropId) {
        if let Err(e) = self.blobs.delete(id).await {
            if !e.is_not_found() {
                warn!("Failed to discard blob {} after failed create: {}", id, e);
            }
        }
    }
}
