//! JWT token creation and validation.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::error::TokenError;
use super::types::{Claims, TokenKind};
use crate::config::{AuthConfig, SigningKeys};

/// Signs and checks every token the service hands out.
///
/// Expiry is checked here rather than by `jsonwebtoken` so that an expired
/// token is only reported as expired once its signature has been verified,
/// and so tests can supply the clock.
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenCodec {
    pub fn new(config: &AuthConfig) -> Result<Self, TokenError> {
        let (encoding, decoding) = load_keys(config.algorithm, &config.keys)
            .map_err(|e| TokenError::Signing(format!("unusable signing keys: {}", e)))?;

        Ok(Self {
            algorithm: config.algorithm,
            encoding,
            decoding,
        })
    }

    /// Create a signed token for `subject` that expires `ttl` from now.
    pub fn issue(
        &self,
        subject: &str,
        kind: TokenKind,
        session_id: Option<&str>,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.issue_at(subject, kind, session_id, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        subject: &str,
        kind: TokenKind,
        session_id: Option<&str>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| TokenError::Signing(format!("lifetime {} out of range", ttl)))?;

        let claims = Claims {
            sub: subject.to_string(),
            kind,
            sid: session_id.map(str::to_string),
            jti: uuid::Uuid::new_v4().simple().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Validate a token of the expected kind and return its claims.
    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        self.decode_at(token, expected, Utc::now())
    }

    pub fn decode_at(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?
            .claims;

        if claims.kind != expected {
            return Err(TokenError::Invalid(format!(
                "expected {:?} token, got {:?}",
                expected, claims.kind
            )));
        }

        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

fn load_keys(
    algorithm: Algorithm,
    keys: &SigningKeys,
) -> Result<(EncodingKey, DecodingKey), jsonwebtoken::errors::Error> {
    match keys {
        SigningKeys::Secret(secret) => Ok((
            EncodingKey::from_secret(secret.as_bytes()),
            DecodingKey::from_secret(secret.as_bytes()),
        )),
        SigningKeys::Pem {
            private_key,
            public_key,
        } => {
            let private_key = private_key.as_bytes();
            let public_key = public_key.as_bytes();
            match algorithm {
                Algorithm::ES256 | Algorithm::ES384 => Ok((
                    EncodingKey::from_ec_pem(private_key)?,
                    DecodingKey::from_ec_pem(public_key)?,
                )),
                Algorithm::EdDSA => Ok((
                    EncodingKey::from_ed_pem(private_key)?,
                    DecodingKey::from_ed_pem(public_key)?,
                )),
                _ => Ok((
                    EncodingKey::from_rsa_pem(private_key)?,
                    DecodingKey::from_rsa_pem(public_key)?,
                )),
            }
        }
    }
}
