/// Configuration management for Dropkeep
use crate::{
    drop_store::parse_ttl,
    error::{DropError, DropResult},
};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub janitor: JanitorConfig,
    pub drops: DropPolicyConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    /// Deadline for the store + blob calls of a single request
    pub operation_timeout: Duration,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub db_path: PathBuf,
    pub blob_directory: PathBuf,
    pub blob_tmp_directory: PathBuf,
}

/// Authentication configuration
#[derive(Clone)]
pub struct AuthConfig {
    pub admin_password: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("admin_password", &"<redacted>")
            .finish()
    }
}

/// Background sweep configuration
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    pub sweep_interval: Duration,
    /// Blobs without metadata younger than this are left alone
    pub orphan_grace: Duration,
}

/// Expiry policy applied to uploads
#[derive(Debug, Clone)]
pub struct DropPolicyConfig {
    /// TTL used when an upload does not name one. `None` means never expire.
    pub default_ttl: Option<Duration>,
    /// Upper bound for any TTL. `None` disables the bound and permits `never`.
    pub max_ttl: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> DropResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> DropResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let hostname = lookup("DROP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        // PORT takes precedence so the service runs unchanged on PaaS hosts
        let port = lookup("PORT")
            .filter(|p| !p.is_empty())
            .or_else(|| lookup("DROP_PORT"))
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .map_err(|_| DropError::Validation("Invalid port number".to_string()))?;

        let max_upload_bytes = parse_number(&lookup, "DROP_MAX_UPLOAD_BYTES", 25 * 1024 * 1024)?;
        let operation_timeout =
            Duration::from_secs(parse_number(&lookup, "DROP_OPERATION_TIMEOUT_SECS", 10)?);

        let data_directory: PathBuf = lookup("DROP_DATA_DIRECTORY")
            .unwrap_or_else(|| "./data".to_string())
            .into();
        let db_path = lookup("DROP_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_directory.join("drops.sqlite"));
        let blob_directory = lookup("DROP_BLOB_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_directory.join("blobs"));
        let blob_tmp_directory = lookup("DROP_BLOB_TMP_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_directory.join("tmp"));

        let admin_password = lookup("DROP_PASSWORD")
            .ok_or_else(|| DropError::Validation("DROP_PASSWORD is required".to_string()))?;

        let sweep_interval =
            Duration::from_secs(parse_number(&lookup, "DROP_SWEEP_INTERVAL_SECS", 60)?);
        let orphan_grace =
            Duration::from_secs(parse_number(&lookup, "DROP_ORPHAN_GRACE_SECS", 3600)?);

        let default_ttl = match lookup("DROP_DEFAULT_TTL") {
            Some(raw) if !raw.trim().is_empty() => Some(parse_ttl(&raw)?),
            _ => None,
        };
        let max_ttl = match lookup("DROP_MAX_TTL") {
            Some(raw) if raw.trim().eq_ignore_ascii_case("none") => None,
            Some(raw) if !raw.trim().is_empty() => Some(parse_ttl(&raw)?),
            _ => Some(Duration::from_secs(30 * 24 * 3600)),
        };

        let format = match lookup("DROP_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            Some("pretty") | None => LogFormat::Pretty,
            Some(other) => {
                return Err(DropError::Validation(format!(
                    "Unknown log format: {}",
                    other
                )))
            }
        };

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                max_upload_bytes,
                operation_timeout,
            },
            storage: StorageConfig {
                data_directory,
                db_path,
                blob_directory,
                blob_tmp_directory,
            },
            authentication: AuthConfig { admin_password },
            janitor: JanitorConfig {
                sweep_interval,
                orphan_grace,
            },
            drops: DropPolicyConfig {
                default_ttl,
                max_ttl,
            },
            logging: LoggingConfig { format },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> DropResult<()> {
        if self.authentication.admin_password.is_empty() {
            return Err(DropError::Validation(
                "Admin password cannot be empty".to_string(),
            ));
        }

        if self.janitor.sweep_interval.is_zero() {
            return Err(DropError::Validation(
                "Sweep interval must be greater than zero".to_string(),
            ));
        }

        if self.service.operation_timeout.is_zero() {
            return Err(DropError::Validation(
                "Operation timeout must be greater than zero".to_string(),
            ));
        }

        // An upload writes its blob before its row; reconciliation must not
        // see that window as an orphan
        if self.janitor.orphan_grace <= self.service.operation_timeout {
            return Err(DropError::Validation(
                "Orphan grace period must exceed the operation timeout".to_string(),
            ));
        }

        if self.service.max_upload_bytes == 0 {
            return Err(DropError::Validation(
                "Upload limit must be greater than zero".to_string(),
            ));
        }

        if let (Some(default_ttl), Some(max_ttl)) = (self.drops.default_ttl, self.drops.max_ttl) {
            if default_ttl > max_ttl {
                return Err(DropError::Validation(
                    "Default TTL exceeds maximum TTL".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.hostname, self.service.port)
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> DropResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DropError::Validation(format!("Invalid value for {}", key))),
        None => Ok(default),
    }
}
