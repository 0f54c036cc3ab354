//! Ephemeral key-value storage with per-key expiration.
//!
//! Every record written here carries a TTL. A missing key always means
//! "expired or never existed"; callers do not distinguish the two.
//!
//! ## Key patterns
//!
//! ```text
//! login:{email}          → pending login token (verification window)
//! session:{sid}          → SessionRecord JSON (sliding TTL)
//! refresh:{token}        → "valid" (refresh token lifetime)
//! ```

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    /// The key exists but its value cannot be decoded.
    #[error("corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Primitive operations the auth core needs from the backing store.
///
/// Each method is atomic with respect to the keys it touches.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl`. Overwrites any previous value.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Remaining lifetime of `key`, `None` when absent.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Get and delete in one step.
    async fn take(&self, key: &str) -> StoreResult<Option<String>>;

    /// Delete `key` only if it currently holds exactly `expected`.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Overwrite an existing key and reset its TTL. Absent keys stay absent.
    async fn replace_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> StoreResult<bool>;

    /// Delete `old_key` if it holds `expected`, and only then set `new_key`.
    ///
    /// Returns `false` (and writes nothing) when `old_key` did not match.
    async fn rotate(
        &self,
        old_key: &str,
        expected: &str,
        new_key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool>;
}

/// JSON helpers over any [`EphemeralStore`].
#[async_trait]
pub trait StoreExt: EphemeralStore {
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> StoreResult<()> {
        let raw = encode_json(key, value)?;
        self.set_with_ttl(key, &raw, ttl).await
    }

    async fn replace_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let raw = encode_json(key, value)?;
        self.replace_with_ttl(key, &raw, ttl).await
    }
}

impl<S: EphemeralStore + ?Sized> StoreExt for S {}

fn encode_json<T: Serialize>(key: &str, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub mod keys {
    pub fn login(email: &str) -> String {
        format!("login:{}", email)
    }

    pub fn session(session_id: &str) -> String {
        format!("session:{}", session_id)
    }

    pub fn refresh(token: &str) -> String {
        format!("refresh:{}", token)
    }
}

/// Connect to Redis when a URL is configured, otherwise fall back to an
/// in-process store.
pub async fn connect(redis_url: Option<&str>) -> anyhow::Result<Arc<dyn EphemeralStore>> {
    match redis_url {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            tracing::info!("Ephemeral store: redis");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!(
                "REDIS_URL not set, using in-process session store (sessions are lost on restart)"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
