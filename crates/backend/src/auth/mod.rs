//! Passwordless authentication.
//!
//! This module provides:
//! - Signed, typed tokens (login, access, refresh) via [`jwt::TokenCodec`]
//! - The emailed login-link flow ([`LoginFlow`])
//! - Session issue, refresh rotation, sliding expiry and revocation
//!   ([`SessionManager`])
//! - `require_auth` middleware and the identity extractors handlers use

mod email;
mod error;
mod handlers;
pub mod jwt;
mod login;
mod middleware;
mod session;
pub mod types;

pub use error::{AuthError, GuardError};
pub use handlers::{auth_login, auth_logout, auth_me, auth_refresh, auth_verify};
pub use login::LoginFlow;
pub use middleware::{cleared_cookies, require_auth, CurrentProfile, CurrentUser, MaybeUser};
pub use session::SessionManager;
