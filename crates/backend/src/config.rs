//! Process configuration loaded once at startup.
//!
//! `AppConfig::from_env()` is called from `main` after `dotenvy::dotenv()`,
//! then shared read-only through `AppState`.

use std::env;
use std::str::FromStr;

use chrono::Duration;
use jsonwebtoken::Algorithm;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Signing material for the token codec.
#[derive(Clone)]
pub enum SigningKeys {
    /// HMAC shared secret (HS256/384/512).
    Secret(String),
    /// PEM-encoded private/public key pair (RSA, EC or Ed25519).
    Pem {
        private_key: String,
        public_key: String,
    },
}

impl std::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningKeys::Secret(_) => f.write_str("SigningKeys::Secret(..)"),
            SigningKeys::Pem { .. } => f.write_str("SigningKeys::Pem(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub algorithm: Algorithm,
    pub keys: SigningKeys,
    pub login_token_ttl: Duration,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub session_ttl: Duration,
    pub cookie_domain: Option<String>,
    pub web_app_url: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub auth: AuthConfig,
    /// Example: redis://localhost:6379
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub smtp: Option<SmtpConfig>,
    pub sender_email: String,
    pub cors_allowed_origins: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `JWT_SECRET` for HMAC algorithms, or `JWT_PRIVATE_KEY` and
    ///   `JWT_PUBLIC_KEY` (PEM) for asymmetric ones
    pub fn from_env() -> Result<Self, ConfigError> {
        let algorithm = match optional("JWT_ALGORITHM") {
            Some(name) => Algorithm::from_str(&name).map_err(|e| ConfigError::Invalid {
                name: "JWT_ALGORITHM",
                reason: e.to_string(),
            })?,
            None => Algorithm::HS256,
        };

        let keys = if is_hmac(algorithm) {
            SigningKeys::Secret(required("JWT_SECRET")?)
        } else {
            SigningKeys::Pem {
                private_key: required("JWT_PRIVATE_KEY")?,
                public_key: required("JWT_PUBLIC_KEY")?,
            }
        };

        let auth = AuthConfig {
            algorithm,
            keys,
            login_token_ttl: lifetime("LOGIN_TOKEN_TTL_MINUTES", 30, Unit::Minutes)?,
            access_token_ttl: lifetime("ACCESS_TOKEN_TTL_MINUTES", 60, Unit::Minutes)?,
            refresh_token_ttl: lifetime("REFRESH_TOKEN_TTL_DAYS", 7, Unit::Days)?,
            session_ttl: lifetime("SESSION_TTL_DAYS", 7, Unit::Days)?,
            cookie_domain: optional("COOKIE_DOMAIN"),
            web_app_url: optional("WEB_APP_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
        };

        let smtp = optional("SMTP_HOST").map(|host| SmtpConfig {
            host,
            username: optional("SMTP_USERNAME"),
            password: optional("SMTP_PASSWORD"),
        });

        Ok(Self {
            auth,
            redis_url: optional("REDIS_URL"),
            database_url: optional("DATABASE_URL"),
            smtp,
            sender_email: optional("SENDER_EMAIL")
                .unwrap_or_else(|| "no-reply@connector.rocks".to_string()),
            cors_allowed_origins: optional("CORS_ALLOWED_ORIGINS"),
        })
    }
}

fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

/// Upper bound for every configured token and session lifetime.
const MAX_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy)]
enum Unit {
    Minutes,
    Days,
}

fn lifetime(name: &'static str, default: i64, unit: Unit) -> Result<Duration, ConfigError> {
    parse_lifetime(name, optional(name).as_deref(), default, unit)
}

fn parse_lifetime(
    name: &'static str,
    raw: Option<&str>,
    default: i64,
    unit: Unit,
) -> Result<Duration, ConfigError> {
    let value = match raw {
        Some(raw) => positive(name, raw)?,
        None => default,
    };

    let ttl = match unit {
        Unit::Minutes => Duration::try_minutes(value),
        Unit::Days => Duration::try_days(value),
    };
    ttl.filter(|ttl| *ttl <= Duration::days(MAX_TTL_DAYS))
        .ok_or_else(|| ConfigError::Invalid {
            name,
            reason: format!("must not exceed {} days", MAX_TTL_DAYS),
        })
}

fn positive(name: &'static str, raw: &str) -> Result<i64, ConfigError> {
    let value: i64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        reason: format!("expected a whole number, got {:?}", raw),
    })?;
    if value <= 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be positive".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
impl AuthConfig {
    /// HS256 configuration with the default lifetimes.
    pub fn for_tests() -> Self {
        AuthConfig {
            algorithm: Algorithm::HS256,
            keys: SigningKeys::Secret("test-secret-key-for-testing-only".to_string()),
            login_token_ttl: Duration::minutes(30),
            access_token_ttl: Duration::minutes(60),
            refresh_token_ttl: Duration::days(7),
            session_ttl: Duration::days(7),
            cookie_domain: None,
            web_app_url: "http://localhost:3000".to_string(),
        }
    }
}
