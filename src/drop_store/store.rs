/// Drop metadata store backed by SQLite
use crate::{
    drop_store::{DropId, DropRecord, ExpiredDrop, NewDrop, StoreUsage},
    error::{DropError, DropResult},
};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

const SELECT_COLUMNS: &str = "id, created_at, expires_at, size, content_type, filename, \
     checksum, download_count, max_downloads";

/// Durable record of drop metadata.
///
/// Every method is a single statement, so each one is atomic per row.
#[derive(Clone)]
pub struct DropStore {
    db: SqlitePool,
}

impl DropStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Persist a new drop.
    ///
    /// Fails with `Conflict` if the id is already taken; the caller picks a
    /// fresh id in that case.
    pub async fn create(&self, new_drop: NewDrop) -> DropResult<DropRecord> {
        let created_at = Utc::now();
        let expires_at = match new_drop.ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|_| DropError::Validation("TTL out of range".to_string()))?;
                Some(
                    created_at
                        .checked_add_signed(ttl)
                        .ok_or_else(|| DropError::Validation("TTL out of range".to_string()))?,
                )
            }
            None => None,
        };

        let record = DropRecord {
            id: new_drop.id,
            created_at,
            expires_at,
            size: new_drop.size,
            content_type: new_drop.content_type,
            filename: new_drop.filename,
            checksum: new_drop.checksum,
            download_count: 0,
            max_downloads: new_drop.max_downloads.map(i64::from),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO drops (id, created_at, expires_at, size, content_type, filename, checksum, download_count, max_downloads)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
            "#,
        )
        .bind(record.id.as_str())
        .bind(record.created_at.timestamp_millis())
        .bind(record.expires_at.map(|t| t.timestamp_millis()))
        .bind(record.size)
        .bind(&record.content_type)
        .bind(&record.filename)
        .bind(&record.checksum)
        .bind(record.max_downloads)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(record),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(DropError::Conflict(
                format!("Drop id already exists: {}", record.id),
            )),
            Err(e) => Err(DropError::Database(e)),
        }
    }

    /// Fetch a live drop.
    ///
    /// Expired and exhausted rows that the janitor has not reached yet are
    /// reported as `NotFound`, same as ids that never existed.
    pub async fn get(&self, id: &DropId, now: DateTime<Utc>) -> DropResult<DropRecord> {
        let row = sqlx::query(&format!("SELECT {} FROM drops WHERE id = ?1", SELECT_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => {
                let record = record_from_row(&row)?;
                if record.is_live(now) {
                    Ok(record)
                } else {
                    Err(DropError::NotFound)
                }
            }
            None => Err(DropError::NotFound),
        }
    }

    /// Atomically count one download against a live drop.
    ///
    /// Returns the updated row. Fails with `NotFound` if the drop is gone,
    /// expired, or has no download slots left.
    pub async fn claim_download(&self, id: &DropId, now: DateTime<Utc>) -> DropResult<DropRecord> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE drops
            SET download_count = download_count + 1
            WHERE id = ?1
              AND (expires_at IS NULL OR expires_at > ?2)
              AND (max_downloads IS NULL OR download_count < max_downloads)
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(id.as_str())
        .bind(now.timestamp_millis())
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(DropError::NotFound),
        }
    }

    /// Remove a drop row. A second delete of the same id reports `NotFound`.
    pub async fn delete(&self, id: &DropId) -> DropResult<()> {
        let result = sqlx::query("DELETE FROM drops WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DropError::NotFound);
        }

        Ok(())
    }

    /// Stream ids that are due for reclamation at `now`.
    ///
    /// The stream is a single forward pass over one query; rows that become
    /// due while it runs may or may not appear and are picked up next time.
    pub fn list_expired(&self, now: DateTime<Utc>) -> BoxStream<'_, DropResult<ExpiredDrop>> {
        sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT id,
                   CASE WHEN max_downloads IS NOT NULL AND download_count >= max_downloads
                        THEN 1 ELSE 0 END AS exhausted
            FROM drops
            WHERE (expires_at IS NOT NULL AND expires_at <= ?1)
               OR (max_downloads IS NOT NULL AND download_count >= max_downloads)
            ORDER BY expires_at ASC
            "#,
        )
        .bind(now.timestamp_millis())
        .fetch(&self.db)
        .map(|row| -> DropResult<ExpiredDrop> {
            let (raw, exhausted) = row?;
            let id = DropId::parse(&raw).ok_or_else(|| {
                DropError::Internal(format!("Malformed drop id in store: {:?}", raw))
            })?;
            Ok(ExpiredDrop {
                id,
                exhausted: exhausted != 0,
            })
        })
        .boxed()
    }

    /// Whether any row, live or not, holds this id
    pub async fn contains(&self, id: &DropId) -> DropResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM drops WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.db)
            .await?;

        Ok(found.is_some())
    }

    /// Row count and total payload size
    pub async fn usage(&self) -> DropResult<StoreUsage> {
        let row = sqlx::query("SELECT COUNT(*) AS drops, COALESCE(SUM(size), 0) AS bytes FROM drops")
            .fetch_one(&self.db)
            .await?;

        Ok(StoreUsage {
            drops: row.try_get("drops")?,
            bytes: row.try_get("bytes")?,
        })
    }
}

fn record_from_row(row: &SqliteRow) -> DropResult<DropRecord> {
    let raw_id: String = row.try_get("id")?;
    let id = DropId::parse(&raw_id)
        .ok_or_else(|| DropError::Internal(format!("Malformed drop id in store: {:?}", raw_id)))?;

    let created_at = millis_to_datetime(row.try_get("created_at")?)?;
    let expires_at = row
        .try_get::<Option<i64>, _>("expires_at")?
        .map(millis_to_datetime)
        .transpose()?;

    Ok(DropRecord {
        id,
        created_at,
        expires_at,
        size: row.try_get("size")?,
        content_type: row.try_get("content_type")?,
        filename: row.try_get("filename")?,
        checksum: row.try_get("checksum")?,
        download_count: row.try_get("download_count")?,
        max_downloads: row.try_get("max_downloads")?,
    })
}

fn millis_to_datetime(millis: i64) -> DropResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DropError::Internal(format!("Timestamp out of range: {}", millis)))
}
