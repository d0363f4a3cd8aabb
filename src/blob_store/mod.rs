/// Blob Repository
///
/// Raw drop content keyed by drop id. Knows nothing about expiry; the
/// janitor and request handlers decide when content goes away.

pub mod disk;

pub use disk::DiskBlobBackend;

use crate::{drop_store::DropId, error::DropResult};
use async_trait::async_trait;
use std::time::SystemTime;

/// Blob storage backend trait
///
/// Each call is atomic: a reader sees either the complete blob or `NotFound`.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Store a blob. Fails with `Conflict` if the id already has content.
    async fn put(&self, id: &DropId, data: &[u8]) -> DropResult<()>;

    /// Retrieve a blob, `NotFound` if absent
    async fn get(&self, id: &DropId) -> DropResult<Vec<u8>>;

    /// Delete a blob, `NotFound` if absent
    async fn delete(&self, id: &DropId) -> DropResult<()>;

    /// Check if a blob exists
    async fn exists(&self, id: &DropId) -> DropResult<bool>;

    /// Ids of blobs last written before `cutoff`
    async fn list_older_than(&self, cutoff: SystemTime) -> DropResult<Vec<DropId>>;

    /// Remove abandoned partial writes older than `cutoff`, returning how many
    async fn purge_staging(&self, cutoff: SystemTime) -> DropResult<u64>;

    /// Verify the backend is usable
    async fn health_check(&self) -> DropResult<()>;
}
