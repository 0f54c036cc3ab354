//! Failure taxonomy of the authentication core.

use thiserror::Error;

use crate::mailer::MailError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum TokenError {
    /// Signature is valid but the token is past its expiry.
    #[error("token expired")]
    Expired,

    /// Bad signature, malformed structure or wrong token kind.
    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    ExpiredToken,

    /// Well-formed token that no longer matches the stored record
    /// (already consumed or superseded).
    #[error("token does not match a pending record")]
    TokenMismatch,

    #[error("unauthorized")]
    Unauthorized,

    #[error("email delivery failed: {0}")]
    DeliveryFailed(#[from] MailError),

    #[error("invalid email: {0}")]
    InvalidEmail(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::ExpiredToken,
            TokenError::Invalid(reason) => {
                tracing::debug!("Rejected token: {}", reason);
                AuthError::InvalidToken
            }
            TokenError::Signing(reason) => AuthError::Signing(reason),
        }
    }
}

/// Why a request could not be tied to an identity.
#[derive(Debug, Error)]
pub enum GuardError {
    /// No credential presented.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Credential present but expired or revoked.
    #[error("Session expired")]
    SessionExpired,

    /// Credential failed signature or structure checks.
    #[error("Invalid token")]
    TokenInvalid,

    #[error(transparent)]
    Unavailable(#[from] StoreError),
}
