/// Drop data models
use crate::error::{DropError, DropResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Random bytes behind each id (192 bits)
const ID_BYTES: usize = 24;

/// Encoded id length: base64url without padding
pub const ID_LEN: usize = 32;

/// Unguessable retrieval token. Holding it is the read capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DropId(String);

impl DropId {
    /// Generate a fresh id from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Parse an id supplied by a client or found on disk.
    ///
    /// Returns `None` for anything that could not have been generated here,
    /// so malformed ids never reach the database or the filesystem.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == ID_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Drop metadata row
#[derive(Debug, Clone, Serialize)]
pub struct DropRecord {
    pub id: DropId,
    pub created_at: DateTime<Utc>,
    /// `None` means the drop never expires by time
    pub expires_at: Option<DateTime<Utc>>,
    pub size: i64,
    pub content_type: String,
    pub filename: Option<String>,
    /// Hex SHA-256 of the blob
    pub checksum: String,
    pub download_count: i64,
    pub max_downloads: Option<i64>,
}

impl DropRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    /// All permitted downloads have been claimed
    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_downloads, Some(max) if self.download_count >= max)
    }

    /// Readable at `now`: neither expired nor exhausted
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_exhausted()
    }
}

/// Input for `DropStore::create`
#[derive(Debug, Clone)]
pub struct NewDrop {
    pub id: DropId,
    pub size: i64,
    pub content_type: String,
    pub filename: Option<String>,
    pub checksum: String,
    pub ttl: Option<Duration>,
    pub max_downloads: Option<u32>,
}

/// A row due for reclamation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpiredDrop {
    pub id: DropId,
    /// All permitted downloads claimed, as opposed to past `expires_at`
    pub exhausted: bool,
}

/// Aggregate numbers for metrics and health output
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreUsage {
    pub drops: i64,
    pub bytes: i64,
}

/// Parse a TTL: bare seconds or a number with an `s`, `m`, `h` or `d` suffix.
///
/// Zero and negative values are rejected so `expires_at > created_at` always holds.
pub fn parse_ttl(raw: &str) -> DropResult<Duration> {
    let raw = raw.trim();
    let invalid = || DropError::Validation(format!("Invalid TTL: {:?}", raw));

    let (digits, unit) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], c.to_ascii_lowercase()),
        Some(_) => (raw, 's'),
        None => return Err(invalid()),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => return Err(invalid()),
    };

    let seconds = value.checked_mul(multiplier).ok_or_else(invalid)?;
    if seconds == 0 {
        return Err(DropError::Validation("TTL must be positive".to_string()));
    }

    Ok(Duration::from_secs(seconds))
}

/// Requested lifetime for an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlRequest {
    /// Nothing supplied, use the configured default
    Default,
    /// Explicit `never`
    Never,
    After(Duration),
}

impl TtlRequest {
    pub fn parse(raw: Option<&str>) -> DropResult<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(TtlRequest::Default),
            Some(value) if value.eq_ignore_ascii_case("never") => Ok(TtlRequest::Never),
            Some(value) => parse_ttl(value).map(TtlRequest::After),
        }
    }

    /// Resolve against the configured default and bound.
    ///
    /// Without a configured default an unspecified TTL falls back to the
    /// bound, or to never expiring when no bound is set.
    pub fn resolve(
        self,
        default_ttl: Option<Duration>,
        max_ttl: Option<Duration>,
    ) -> DropResult<Option<Duration>> {
        let ttl = match self {
            TtlRequest::Default => default_ttl.or(max_ttl),
            TtlRequest::Never => None,
            TtlRequest::After(ttl) => Some(ttl),
        };

        match (ttl, max_ttl) {
            (None, Some(_)) => Err(DropError::Validation(
                "Drops must expire on this server".to_string(),
            )),
            (Some(ttl), Some(max)) if ttl > max => Err(DropError::Validation(format!(
                "TTL exceeds maximum of {} seconds",
                max.as_secs()
            ))),
            _ => Ok(ttl),
        }
    }
}
