//! Request guards: credential extraction, `require_auth` middleware and the
//! identity extractors handlers take as arguments.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use cookie::{Cookie, SameSite};
use shared_types::User;

use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::AppState;

use super::error::GuardError;
use super::types::{Identity, IssuedSession};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Middleware that rejects requests without a live session of an active
/// account.
///
/// The resolved [`Identity`] and its [`User`] are stored in request
/// extensions so that the extractors do not resolve them a second time.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match authorize(&state, request.headers()).await {
        Ok((identity, user)) => {
            request.extensions_mut().insert(identity);
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, GuardError> {
    let token = access_credential(headers).ok_or(GuardError::Unauthenticated)?;
    state.sessions.resolve(&token).await
}

/// Resolve the session and load the account behind it. A session whose
/// account is no longer active is revoked on the spot, so every device of a
/// deleted or deactivated account loses access at its next request.
async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(Identity, User), ApiError> {
    let identity = authenticate(state, headers).await?;

    let user = state
        .users
        .find_by_email(&identity.email)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;

    if !user.is_active() {
        tracing::warn!(
            "Revoking session {} of {} account {}",
            identity.session_id,
            user.status,
            user.email
        );
        state.sessions.revoke_session(&identity.session_id).await?;
        return Err(ApiError::Forbidden("Account is not active".to_string()));
    }

    Ok((identity, user))
}

/// The access token from the `access_token` cookie, falling back to an
/// `Authorization: Bearer` header.
pub fn access_credential(headers: &HeaderMap) -> Option<String> {
    extract_cookie(headers, ACCESS_COOKIE).or_else(|| extract_bearer(headers))
}

pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| Cookie::parse(pair.trim()).ok())
        .find(|cookie| cookie.name() == name && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Build a `Set-Cookie` value. A zero `max_age_secs` clears the cookie.
pub fn build_auth_cookie(config: &AuthConfig, name: &str, value: &str, max_age_secs: i64) -> String {
    let mut cookie = Cookie::build((name.to_string(), value.to_string()))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(cookie::time::Duration::seconds(max_age_secs));

    if let Some(domain) = &config.cookie_domain {
        cookie = cookie.domain(domain.clone());
    }

    cookie.build().to_string()
}

/// Cookies carrying a freshly issued access/refresh pair.
pub fn session_cookies(config: &AuthConfig, issued: &IssuedSession) -> [(header::HeaderName, String); 2] {
    [
        (
            header::SET_COOKIE,
            build_auth_cookie(
                config,
                ACCESS_COOKIE,
                &issued.access_token,
                issued.access_ttl.num_seconds(),
            ),
        ),
        (
            header::SET_COOKIE,
            build_auth_cookie(
                config,
                REFRESH_COOKIE,
                &issued.refresh_token,
                issued.refresh_ttl.num_seconds(),
            ),
        ),
    ]
}

pub fn cleared_cookies(config: &AuthConfig) -> [(header::HeaderName, String); 2] {
    [
        (header::SET_COOKIE, build_auth_cookie(config, ACCESS_COOKIE, "", 0)),
        (header::SET_COOKIE, build_auth_cookie(config, REFRESH_COOKIE, "", 0)),
    ]
}

/// Identity of the caller. Rejects with 401 when there is none.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(CurrentUser(identity.clone()));
        }
        let identity = authenticate(state, &parts.headers).await?;
        Ok(CurrentUser(identity))
    }
}

/// Identity of the caller, if any. Bad or expired credentials count as
/// anonymous; only a store outage rejects.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Identity>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(MaybeUser(Some(identity.clone())));
        }
        match authenticate(state, &parts.headers).await {
            Ok(identity) => Ok(MaybeUser(Some(identity))),
            Err(GuardError::Unavailable(e)) => Err(ApiError::Store(e)),
            Err(_) => Ok(MaybeUser(None)),
        }
    }
}

/// The caller's user record. The account must exist and be active;
/// a session of an inactive account is revoked and answered with 403.
#[derive(Debug, Clone)]
pub struct CurrentProfile {
    pub user: User,
    pub identity: Identity,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentProfile {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let cached = (
            parts.extensions.get::<Identity>(),
            parts.extensions.get::<User>(),
        );
        if let (Some(identity), Some(user)) = cached {
            return Ok(CurrentProfile {
                user: user.clone(),
                identity: identity.clone(),
            });
        }

        let (identity, user) = authorize(state, &parts.headers).await?;
        Ok(CurrentProfile { user, identity })
    }
}
