//! Login-by-email-link flow.
//!
//! `request` mints a login token, parks it at `login:{email}` and mails the
//! link out of band. `verify` consumes that record exactly once.

use std::sync::Arc;

use chrono::Duration;

use super::email::normalize_email;
use super::error::AuthError;
use super::jwt::TokenCodec;
use super::types::{to_std, TokenKind, VerifiedLogin};
use crate::config::AuthConfig;
use crate::mailer::Mailer;
use crate::store::{keys, EphemeralStore};

pub struct LoginFlow {
    codec: TokenCodec,
    store: Arc<dyn EphemeralStore>,
    mailer: Arc<dyn Mailer>,
    ttl: Duration,
    web_app_url: String,
}

impl LoginFlow {
    pub fn new(
        config: &AuthConfig,
        codec: TokenCodec,
        store: Arc<dyn EphemeralStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            codec,
            store,
            mailer,
            ttl: config.login_token_ttl,
            web_app_url: config.web_app_url.clone(),
        }
    }

    /// Start a login for `email`. Returns once the token is stored; the email
    /// goes out on a background task. A newer request supersedes older links.
    pub async fn request(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email)?;
        let token = self.codec.issue(&email, TokenKind::Login, None, self.ttl)?;

        self.store
            .set_with_ttl(&keys::login(&email), &token, to_std(self.ttl))
            .await?;

        tracing::info!("Login requested for: {}", email);
        self.dispatch(email, &token);
        Ok(())
    }

    fn dispatch(&self, email: String, token: &str) {
        let mailer = Arc::clone(&self.mailer);
        let (subject, body) = self.compose(token);

        tokio::spawn(async move {
            if let Err(e) = mailer.send(&email, &subject, &body).await {
                let err = AuthError::DeliveryFailed(e);
                tracing::error!("Login email to {} not delivered: {}", email, err);
            }
        });
    }

    fn compose(&self, token: &str) -> (String, String) {
        let login_url = format!(
            "{}/auth/verify?token={}",
            self.web_app_url,
            urlencoding::encode(token)
        );
        let body = format!(
            "Click the link below to log in:\n\n{}\n\nThis link will expire in {} minutes.",
            login_url,
            self.ttl.num_minutes()
        );
        ("Log in to Connector".to_string(), body)
    }

    /// Confirm a login token. Succeeds at most once per issued token.
    pub async fn verify(&self, token: &str) -> Result<VerifiedLogin, AuthError> {
        let claims = self.codec.decode(token, TokenKind::Login)?;

        let consumed = self
            .store
            .delete_if_eq(&keys::login(&claims.sub), token)
            .await?;
        if !consumed {
            return Err(AuthError::TokenMismatch);
        }

        tracing::info!("Login verified for: {}", claims.sub);
        Ok(VerifiedLogin { email: claims.sub })
    }
}
