//! Session lifecycle: issue, refresh, touch, resolve and revoke.
//!
//! A session is a family record at `session:{sid}` with a sliding TTL. The
//! access and refresh tokens handed to the client both carry that `sid`;
//! each live refresh token additionally has its own `refresh:{token}` entry
//! so that rotation can be made single-use.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::error::{AuthError, GuardError};
use super::jwt::TokenCodec;
use super::types::{to_std, Claims, Identity, IssuedSession, SessionRecord, TokenKind};
use crate::config::AuthConfig;
use crate::store::{keys, EphemeralStore, StoreError, StoreExt, StoreResult};

const REFRESH_VALID: &str = "valid";

pub struct SessionManager {
    codec: TokenCodec,
    store: Arc<dyn EphemeralStore>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    session_ttl: Duration,
}

impl SessionManager {
    pub fn new(config: &AuthConfig, codec: TokenCodec, store: Arc<dyn EphemeralStore>) -> Self {
        Self {
            codec,
            store,
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
            session_ttl: config.session_ttl,
        }
    }

    /// Open a new session for an already verified `email`.
    pub async fn issue(&self, email: &str) -> Result<IssuedSession, AuthError> {
        let session_id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let record = SessionRecord {
            user_email: email.to_string(),
            created_at: now,
            last_active: now,
        };

        let (access_token, refresh_token) = self.mint_pair(email, &session_id)?;

        self.store
            .set_json(&keys::session(&session_id), &record, to_std(self.session_ttl))
            .await?;
        self.store
            .set_with_ttl(
                &keys::refresh(&refresh_token),
                REFRESH_VALID,
                to_std(self.refresh_ttl),
            )
            .await?;

        tracing::info!("Session {} opened for {}", session_id, email);
        Ok(self.issued(session_id, access_token, refresh_token))
    }

    /// Exchange a refresh token for a new pair. The presented token stops
    /// working whether or not the caller ever sees the response.
    ///
    /// Every credential problem collapses to [`AuthError::Unauthorized`];
    /// only store failures surface as themselves.
    pub async fn refresh(&self, presented: &str) -> Result<IssuedSession, AuthError> {
        let claims = self
            .codec
            .decode(presented, TokenKind::Refresh)
            .map_err(|e| {
                tracing::debug!("Refresh token rejected: {}", e);
                AuthError::Unauthorized
            })?;
        let session_id = claims.sid.ok_or(AuthError::Unauthorized)?;

        let current: StoreResult<Option<SessionRecord>> =
            self.store.get_json(&keys::session(&session_id)).await;
        match current {
            Ok(Some(record)) if record.user_email == claims.sub => {}
            Ok(_) | Err(StoreError::Corrupt { .. }) => return Err(AuthError::Unauthorized),
            Err(e) => return Err(e.into()),
        }

        let (access_token, refresh_token) = self.mint_pair(&claims.sub, &session_id)?;
        let rotated = self
            .store
            .rotate(
                &keys::refresh(presented),
                REFRESH_VALID,
                &keys::refresh(&refresh_token),
                REFRESH_VALID,
                to_std(self.refresh_ttl),
            )
            .await?;
        if !rotated {
            tracing::warn!(
                "Refresh token for session {} already used or revoked",
                session_id
            );
            return Err(AuthError::Unauthorized);
        }

        if self.touch(&session_id).await?.is_none() {
            // revoked between the check above and the rotation
            self.store.delete(&keys::refresh(&refresh_token)).await?;
            return Err(AuthError::Unauthorized);
        }

        tracing::debug!("Session {} refreshed", session_id);
        Ok(self.issued(session_id, access_token, refresh_token))
    }

    /// Record activity on a session and push its expiry out by the session
    /// TTL. Returns `None` when the session no longer exists.
    ///
    /// A record that cannot be decoded is dropped and treated as gone.
    pub async fn touch(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let key = keys::session(session_id);
        let current: StoreResult<Option<SessionRecord>> = self.store.get_json(&key).await;
        let mut record = match current {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(StoreError::Corrupt { reason, .. }) => {
                tracing::error!("Dropping unreadable session {}: {}", session_id, reason);
                self.store.delete(&key).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        record.last_active = Utc::now();
        let replaced = self
            .store
            .replace_json(&key, &record, to_std(self.session_ttl))
            .await?;

        Ok(replaced.then_some(record))
    }

    /// Map an access token to the identity behind it, sliding the session.
    pub async fn resolve(&self, access_token: &str) -> Result<Identity, GuardError> {
        let claims = self
            .codec
            .decode(access_token, TokenKind::Access)
            .map_err(|e| match AuthError::from(e) {
                AuthError::ExpiredToken => GuardError::SessionExpired,
                _ => GuardError::TokenInvalid,
            })?;
        let session_id = claims.sid.ok_or(GuardError::TokenInvalid)?;

        let record = self
            .touch(&session_id)
            .await?
            .ok_or(GuardError::SessionExpired)?;
        if record.user_email != claims.sub {
            return Err(GuardError::TokenInvalid);
        }

        Ok(Identity {
            email: claims.sub,
            session_id,
        })
    }

    /// End a session. Access tokens carrying its id stop resolving at once.
    pub async fn revoke_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let removed = self.store.delete(&keys::session(session_id)).await?;
        if removed {
            tracing::info!("Session {} revoked", session_id);
        }
        Ok(removed)
    }

    pub async fn revoke_refresh(&self, refresh_token: &str) -> Result<bool, StoreError> {
        self.store.delete(&keys::refresh(refresh_token)).await
    }

    /// Revoke a refresh token and, if it was still live, the session it
    /// belongs to. Lets logout end a session whose access token has lapsed.
    pub async fn revoke_by_refresh(&self, refresh_token: &str) -> Result<bool, StoreError> {
        if !self.revoke_refresh(refresh_token).await? {
            return Ok(false);
        }
        if let Some(session_id) = self.inspect_refresh(refresh_token).and_then(|c| c.sid) {
            self.revoke_session(&session_id).await?;
        }
        Ok(true)
    }

    /// Claims of a correctly signed, unexpired refresh token. The store is
    /// not consulted, so the token may already be used or revoked.
    pub fn inspect_refresh(&self, refresh_token: &str) -> Option<Claims> {
        self.codec.decode(refresh_token, TokenKind::Refresh).ok()
    }

    fn mint_pair(&self, email: &str, session_id: &str) -> Result<(String, String), AuthError> {
        let access = self
            .codec
            .issue(email, TokenKind::Access, Some(session_id), self.access_ttl)?;
        let refresh = self
            .codec
            .issue(email, TokenKind::Refresh, Some(session_id), self.refresh_ttl)?;
        Ok((access, refresh))
    }

    fn issued(&self, session_id: String, access_token: String, refresh_token: String) -> IssuedSession {
        IssuedSession {
            session_id,
            access_token,
            refresh_token,
            access_ttl: self.access_ttl,
            refresh_ttl: self.refresh_ttl,
        }
    }
}
