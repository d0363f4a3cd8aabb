/// Application context and dependency injection
use crate::{
    blob_store::{BlobBackend, DiskBlobBackend},
    config::ServerConfig,
    db,
    drop_store::{DropManager, DropStore},
    error::{DropError, DropResult},
    gate::AccessGate,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

/// Application context holding all shared services.
///
/// Built once at startup; nothing in it is mutated afterwards.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub drops: DropManager,
    pub gate: Arc<AccessGate>,
    pub started_at: Instant,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> DropResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        // Initialize metadata database
        let db = db::create_pool(&config.storage.db_path, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let blobs: Arc<dyn BlobBackend> = Arc::new(DiskBlobBackend::new(
            config.storage.blob_directory.clone(),
            config.storage.blob_tmp_directory.clone(),
        ));

        Ok(Self::with_backend(config, db, blobs))
    }

    /// Assemble a context around an already prepared pool and blob backend
    pub fn with_backend(config: ServerConfig, db: SqlitePool, blobs: Arc<dyn BlobBackend>) -> Self {
        let store = Arc::new(DropStore::new(db.clone()));
        let gate = Arc::new(AccessGate::new(&config.authentication.admin_password));

        Self {
            config: Arc::new(config),
            db,
            drops: DropManager::new(store, blobs),
            gate,
            started_at: Instant::now(),
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> DropResult<()> {
        let dirs = [
            &config.storage.data_directory,
            &config.storage.blob_directory,
            &config.storage.blob_tmp_directory,
        ];

        for dir in dirs {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                DropError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Public URL for a drop id, relative to this server
    pub fn drop_path(&self, id: &str) -> String {
        format!("/drop/{}", id)
    }
}
