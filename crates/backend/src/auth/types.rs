//! Auth-related types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// What a signed token may be used for. A token is only ever accepted where
/// its own kind is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Login,
    Access,
    Refresh,
}

/// JWT Claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user email)
    pub sub: String,
    pub kind: TokenKind,
    /// Session family, absent on login tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Unique token id
    pub jti: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
}

/// Caller identity resolved from a valid session credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub session_id: String,
}

/// Stored at `session:{sid}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_email: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Credentials handed back to the client after login or refresh.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedLogin {
    pub email: String,
}

/// Store TTLs are `std` durations; negative values clamp to zero.
pub(crate) fn to_std(ttl: Duration) -> std::time::Duration {
    ttl.to_std().unwrap_or(std::time::Duration::ZERO)
}
