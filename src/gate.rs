/// Access gate for mutating operations
///
/// Create and delete require the shared admin password. Reads are not
/// gated: the unguessable drop id is the read capability.
use crate::error::{DropError, DropResult};
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Header carrying the admin password
pub const PASSWORD_HEADER: &str = "x-drop-password";

/// Validates caller-supplied credentials against the admin password
#[derive(Clone)]
pub struct AccessGate {
    /// Digest of the password, so comparison time is independent of its length
    secret_digest: [u8; 32],
}

impl AccessGate {
    pub fn new(admin_password: &str) -> Self {
        Self {
            secret_digest: Sha256::digest(admin_password.as_bytes()).into(),
        }
    }

    /// Constant-time check of a supplied password
    pub fn authorize(&self, supplied: Option<&str>) -> DropResult<()> {
        let Some(supplied) = supplied else {
            return Err(DropError::Unauthorized);
        };

        let supplied_digest: [u8; 32] = Sha256::digest(supplied.as_bytes()).into();
        if bool::from(self.secret_digest[..].ct_eq(&supplied_digest[..])) {
            Ok(())
        } else {
            Err(DropError::Unauthorized)
        }
    }
}

/// Extract the password from `X-Drop-Password` or a bearer token
pub fn credentials_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(PASSWORD_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }

    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}
