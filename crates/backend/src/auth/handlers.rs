//! Authentication HTTP handlers.

use axum::extract::Query;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use shared_types::{LoginRequest, MessageResponse, User};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

use super::error::AuthError;
use super::middleware::{
    cleared_cookies, extract_cookie, session_cookies, CurrentProfile, MaybeUser, REFRESH_COOKIE,
};
use super::types::IssuedSession;

/// Request a login link by email.
pub async fn auth_login(
    State(state): State<AppState>,
    MaybeUser(current): MaybeUser,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<MessageResponse>> {
    if current.is_some() {
        return Ok(Json(MessageResponse::new("Already authenticated")));
    }

    state.logins.request(&payload.email).await?;
    Ok(Json(MessageResponse::new("Login email sent")))
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// Landing point of the emailed link.
///
/// Always answers with a redirect to the web app. Every kind of failure
/// produces the same `invalid_link` redirect.
pub async fn auth_verify(
    State(state): State<AppState>,
    current: Result<MaybeUser, ApiError>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let home = format!("{}/", state.auth_config.web_app_url);
    let failed = format!("{}/login?error=invalid_link", state.auth_config.web_app_url);

    match current {
        Ok(MaybeUser(Some(_))) => return redirect(&home).into_response(),
        Ok(MaybeUser(None)) => {}
        Err(e) => {
            tracing::error!("Login link not checked: {}", e);
            return redirect(&failed).into_response();
        }
    }

    match handle_verify_inner(&state, params.token.as_deref()).await {
        Ok(issued) => (
            StatusCode::SEE_OTHER,
            [(header::LOCATION, home)],
            AppendHeaders(session_cookies(&state.auth_config, &issued)),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Login link rejected: {}", e);
            redirect(&failed).into_response()
        }
    }
}

async fn handle_verify_inner(
    state: &AppState,
    token: Option<&str>,
) -> Result<IssuedSession, ApiError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidToken)?;

    let verified = state.logins.verify(token).await?;
    let user = ensure_user(state, &verified.email).await?;
    if !user.is_active() {
        return Err(ApiError::Forbidden(format!("account is {}", user.status)));
    }

    Ok(state.sessions.issue(&user.email).await?)
}

/// First successful login creates the account.
async fn ensure_user(state: &AppState, email: &str) -> Result<User, ApiError> {
    if let Some(user) = state.users.find_by_email(email).await? {
        return Ok(user);
    }
    tracing::info!("Creating account for: {}", email);
    Ok(state.users.insert(email).await?)
}

fn redirect(location: &str) -> impl IntoResponse {
    (StatusCode::SEE_OTHER, [(header::LOCATION, location.to_string())])
}

/// Rotate the refresh token from the `refresh_token` cookie.
pub async fn auth_refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(presented) = extract_cookie(&headers, REFRESH_COOKIE) else {
        return unauthorized(&state, "Not authenticated");
    };

    match refresh_active(&state, &presented).await {
        Ok(issued) => (
            StatusCode::NO_CONTENT,
            AppendHeaders(session_cookies(&state.auth_config, &issued)),
        )
            .into_response(),
        Err(ApiError::Unauthorized(message)) => {
            tracing::debug!("Refresh rejected: {}", message);
            unauthorized(&state, &message)
        }
        Err(e) => e.into_response(),
    }
}

/// Only an active account may extend its session. Otherwise the session is
/// ended along with the presented token.
async fn refresh_active(state: &AppState, presented: &str) -> Result<IssuedSession, ApiError> {
    let claims = state
        .sessions
        .inspect_refresh(presented)
        .ok_or(AuthError::Unauthorized)?;

    let active = state
        .users
        .find_by_email(&claims.sub)
        .await?
        .is_some_and(|user| user.is_active());
    if !active {
        tracing::warn!("Refresh refused, account {} is not active", claims.sub);
        state.sessions.revoke_by_refresh(presented).await?;
        return Err(ApiError::Unauthorized("Account is not active".to_string()));
    }

    Ok(state.sessions.refresh(presented).await?)
}

fn unauthorized(state: &AppState, message: &str) -> Response {
    (
        AppendHeaders(cleared_cookies(&state.auth_config)),
        ApiError::Unauthorized(message.to_string()),
    )
        .into_response()
}

/// Logout - end the session and clear both cookies.
pub async fn auth_logout(
    State(state): State<AppState>,
    MaybeUser(current): MaybeUser,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if let Some(identity) = current {
        state.sessions.revoke_session(&identity.session_id).await?;
        tracing::info!("Logout: {}", identity.email);
    }
    if let Some(refresh_token) = extract_cookie(&headers, REFRESH_COOKIE) {
        state.sessions.revoke_by_refresh(&refresh_token).await?;
    }

    Ok((
        StatusCode::NO_CONTENT,
        AppendHeaders(cleared_cookies(&state.auth_config)),
    )
        .into_response())
}

/// Get current authenticated user info.
pub async fn auth_me(CurrentProfile { user, .. }: CurrentProfile) -> Json<User> {
    Json(user)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use shared_types::UserStatus;
    use tower::ServiceExt;

    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use crate::auth::jwt::TokenCodec;
    use crate::auth::types::TokenKind;
    use crate::config::AuthConfig;
    use crate::store::keys;
    use crate::testing::{body_json, set_cookies, token_from_email, TestApp, UnavailableStore};

    fn login_request(email: &str) -> Request<Body> {
        Request::post("/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "email": email }).to_string()))
            .unwrap()
    }

    fn verify_request(token: &str) -> Request<Body> {
        Request::get(format!("/auth/verify?token={}", token))
            .body(Body::empty())
            .unwrap()
    }

    fn with_cookie(builder: axum::http::request::Builder, cookie: &str) -> Request<Body> {
        builder
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn login_sends_email_and_verify_sets_cookies() {
        let mut app = TestApp::new();

        let response = app.router().oneshot(login_request("Alice@Example.com")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = body_json(response).await;
        assert_eq!(body["message"], "Login email sent");

        let mail = app.outbox.recv().await.unwrap();
        assert_eq!(mail.to, "alice@example.com");
        let token = token_from_email(&mail.body);

        let response = app.router().oneshot(verify_request(&token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "http://localhost:3000/");
        let cookies = set_cookies(&response);
        assert!(cookies.iter().any(|c| c.starts_with("access_token=") && c.contains("Max-Age=3600")));
        assert!(cookies.iter().any(|c| c.starts_with("refresh_token=") && c.contains("Max-Age=604800")));

        let user = app.directory.user_by_email("alice@example.com").unwrap();
        assert_eq!(user.status, UserStatus::Active);
    }

    #[tokio::test]
    async fn invalid_email_is_400() {
        let app = TestApp::new();
        let response = app.router().oneshot(login_request("nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn already_authenticated_login_is_a_no_op() {
        let mut app = TestApp::new();
        let session = app.sign_in("alice@example.com").await;

        let request = Request::post("/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::COOKIE, format!("access_token={}", session.access_token))
            .body(Body::from(json!({ "email": "alice@example.com" }).to_string()))
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        let body: Value = body_json(response).await;
        assert_eq!(body["message"], "Already authenticated");
        assert!(app.outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn used_or_garbage_links_redirect_to_error_page() {
        let mut app = TestApp::new();
        app.router().oneshot(login_request("alice@example.com")).await.unwrap();
        let token = token_from_email(&app.outbox.recv().await.unwrap().body);

        let first = app.router().oneshot(verify_request(&token)).await.unwrap();
        assert_eq!(first.headers()[header::LOCATION], "http://localhost:3000/");

        let expected = "http://localhost:3000/login?error=invalid_link";
        for uri in [
            format!("/auth/verify?token={}", token),
            "/auth/verify?token=garbage".to_string(),
            "/auth/verify".to_string(),
        ] {
            let request = Request::get(uri).body(Body::empty()).unwrap();
            let response = app.router().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(response.headers()[header::LOCATION], expected);
            assert!(set_cookies(&response).is_empty());
        }
    }

    #[tokio::test]
    async fn deactivated_account_cannot_complete_login() {
        let mut app = TestApp::new();
        app.directory.seed("alice@example.com", UserStatus::Deactivated);

        app.router().oneshot(login_request("alice@example.com")).await.unwrap();
        let token = token_from_email(&app.outbox.recv().await.unwrap().body);

        let response = app.router().oneshot(verify_request(&token)).await.unwrap();
        assert_eq!(
            response.headers()[header::LOCATION],
            "http://localhost:3000/login?error=invalid_link"
        );
    }

    #[tokio::test]
    async fn refresh_rotates_cookies_once() {
        let mut app = TestApp::new();
        let session = app.sign_in("alice@example.com").await;
        let cookie = format!("refresh_token={}", session.refresh_token);

        let response = app
            .router()
            .oneshot(with_cookie(Request::post("/auth/refresh"), &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        assert!(!cookies.iter().any(|c| c.contains(&session.refresh_token)));

        let replay = app
            .router()
            .oneshot(with_cookie(Request::post("/auth/refresh"), &cookie))
            .await
            .unwrap();
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookies(&replay).iter().all(|c| c.contains("Max-Age=0")));
    }

    #[tokio::test]
    async fn refresh_without_cookie_is_401() {
        let app = TestApp::new();
        let request = Request::post("/auth/refresh").body(Body::empty()).unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_revokes_the_session() {
        let mut app = TestApp::new();
        let session = app.sign_in("alice@example.com").await;
        let cookie = format!(
            "access_token={}; refresh_token={}",
            session.access_token, session.refresh_token
        );

        let response = app
            .router()
            .oneshot(with_cookie(Request::post("/auth/logout"), &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(set_cookies(&response).iter().all(|c| c.contains("Max-Age=0")));

        let me = app
            .router()
            .oneshot(with_cookie(Request::get("/auth/me"), &cookie))
            .await
            .unwrap();
        assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
        let body: Value = body_json(me).await;
        assert_eq!(body["error"], "Session expired");

        let refresh = app
            .router()
            .oneshot(with_cookie(Request::post("/auth/refresh"), &cookie))
            .await
            .unwrap();
        assert_eq!(refresh.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_requires_authentication() {
        let mut app = TestApp::new();
        let request = Request::get("/auth/me").body(Body::empty()).unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = body_json(response).await;
        assert_eq!(body["error"], "Not authenticated");

        let session = app.sign_in("alice@example.com").await;
        let request = Request::get("/auth/me")
            .header(header::AUTHORIZATION, format!("Bearer {}", session.access_token))
            .body(Body::empty())
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = body_json(response).await;
        assert_eq!(body["email"], "alice@example.com");
        assert_eq!(body["status"], "active");
    }

    #[tokio::test]
    async fn verify_redirects_even_when_the_store_is_down() {
        let app = TestApp::with_store(Arc::new(UnavailableStore));
        let codec = TokenCodec::new(&AuthConfig::for_tests()).unwrap();
        let access = codec
            .issue("alice@example.com", TokenKind::Access, Some("sid"), Duration::minutes(5))
            .unwrap();
        let login = codec
            .issue("alice@example.com", TokenKind::Login, None, Duration::minutes(30))
            .unwrap();

        let expected = "http://localhost:3000/login?error=invalid_link";
        for cookie in [format!("access_token={}", access), "theme=dark".to_string()] {
            let request = Request::get(format!("/auth/verify?token={}", login))
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap();
            let response = app.router().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(response.headers()[header::LOCATION], expected);
        }
    }

    #[tokio::test]
    async fn logout_with_lapsed_access_token_still_ends_the_session() {
        let app = TestApp::new();
        let session = app.sign_in("alice@example.com").await;
        let codec = TokenCodec::new(&AuthConfig::for_tests()).unwrap();
        let lapsed = codec
            .issue_at(
                "alice@example.com",
                TokenKind::Access,
                Some(&session.session_id),
                Duration::minutes(60),
                Utc::now() - Duration::minutes(61),
            )
            .unwrap();
        let cookie = format!(
            "access_token={}; refresh_token={}",
            lapsed, session.refresh_token
        );

        let response = app
            .router()
            .oneshot(with_cookie(Request::post("/auth/logout"), &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        assert!(app
            .store
            .get(&keys::session(&session.session_id))
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            app.state.sessions.resolve(&session.access_token).await,
            Err(crate::auth::GuardError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn inactive_account_cannot_refresh() {
        let app = TestApp::new();
        let session = app.sign_in("alice@example.com").await;
        let user = app.directory.user_by_email("alice@example.com").unwrap();
        app.directory.force_status(user.id, UserStatus::Deleted);

        let cookie = format!("refresh_token={}", session.refresh_token);
        let response = app
            .router()
            .oneshot(with_cookie(Request::post("/auth/refresh"), &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookies(&response).iter().all(|c| c.contains("Max-Age=0")));

        // the session is gone even if the account comes back
        app.directory.force_status(user.id, UserStatus::Active);
        assert!(app.state.sessions.resolve(&session.access_token).await.is_err());
        assert!(app.state.sessions.refresh(&session.refresh_token).await.is_err());
    }
}
