use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{AppendHeaders, IntoResponse, Response},
};
use shared_types::{
    AuthorSummary, CreatePostRequest, CreatePostResponse, CreateReplyRequest,
    CreateReplyResponse, PageQuery, PostResponse, ReplyResponse, UpdateProfileRequest, User,
    UserStatus,
};
use uuid::Uuid;

use crate::auth::{cleared_cookies, CurrentProfile, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 50;
const MAX_USER_PAGE_SIZE: i64 = 10;
const USERNAME_LENGTH: std::ops::RangeInclusive<usize> = 3..=30;

pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

// User handlers
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    Ok(Json(user))
}

/// Public directory of active accounts.
pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<PageQuery>,
) -> ApiResult<Json<Vec<User>>> {
    let (limit, offset) = params.resolve(DEFAULT_PAGE_SIZE, MAX_USER_PAGE_SIZE);
    let users = state.users.list_active(limit, offset).await?;
    Ok(Json(users))
}

pub async fn update_me(
    State(state): State<AppState>,
    CurrentProfile { user, .. }: CurrentProfile,
    Json(payload): Json<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    let changes = UpdateProfileRequest {
        username: payload.username.map(|u| u.trim().to_lowercase()),
        full_name: payload.full_name.map(|n| n.trim().to_string()),
        bio: payload.bio,
    };
    if let Some(username) = &changes.username {
        validate_username(username)?;
    }

    let updated = state.users.update_profile(user.id, &changes).await?;
    tracing::info!("Profile updated for {}", updated.email);
    Ok(Json(updated))
}

fn validate_username(username: &str) -> ApiResult<()> {
    if !USERNAME_LENGTH.contains(&username.len()) {
        return Err(ApiError::bad_request(format!(
            "Username must be {} to {} characters",
            USERNAME_LENGTH.start(),
            USERNAME_LENGTH.end()
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ApiError::bad_request(
            "Username may only contain letters, digits and underscores",
        ));
    }
    Ok(())
}

/// Soft-delete the caller's account and end the current session. The
/// account's other sessions are revoked the next time they are presented.
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentProfile { user, identity }: CurrentProfile,
) -> ApiResult<Response> {
    state.users.set_status(user.id, UserStatus::Deleted).await?;
    state.sessions.revoke_session(&identity.session_id).await?;
    tracing::info!("Account deleted: {}", user.email);

    Ok((
        StatusCode::NO_CONTENT,
        AppendHeaders(cleared_cookies(&state.auth_config)),
    )
        .into_response())
}

// Post handlers
pub async fn create_post(
    State(state): State<AppState>,
    CurrentProfile { user, .. }: CurrentProfile,
    Json(payload): Json<CreatePostRequest>,
) -> ApiResult<(StatusCode, Json<CreatePostResponse>)> {
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ApiError::bad_request("Post content must not be empty"));
    }

    let post = state.posts.create(user.id, content, &payload.media).await?;
    tracing::debug!("Post {} created by {}", post.id, user.email);

    Ok((
        StatusCode::CREATED,
        Json(CreatePostResponse {
            message: "Post created successfully".to_string(),
            post_id: post.id,
        }),
    ))
}

pub async fn list_posts(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Query(params): Query<PageQuery>,
) -> ApiResult<Json<Vec<PostResponse>>> {
    let (limit, offset) = params.resolve(DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);

    let posts = state
        .posts
        .list_recent(limit, offset)
        .await?
        .into_iter()
        .map(|(post, author)| PostResponse::new(post, AuthorSummary::from(&author)))
        .collect();

    Ok(Json(posts))
}

// Reply handlers
pub async fn create_reply(
    State(state): State<AppState>,
    CurrentProfile { user, .. }: CurrentProfile,
    Path(post_id): Path<Uuid>,
    Json(payload): Json<CreateReplyRequest>,
) -> ApiResult<(StatusCode, Json<CreateReplyResponse>)> {
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ApiError::bad_request("Reply content must not be empty"));
    }
    if !state.posts.exists(post_id).await? {
        return Err(ApiError::not_found("Post"));
    }

    let reply = state
        .posts
        .create_reply(post_id, user.id, content, &payload.media)
        .await?;
    tracing::debug!("Reply {} to post {} by {}", reply.id, post_id, user.email);

    Ok((
        StatusCode::CREATED,
        Json(CreateReplyResponse {
            message: "Reply created successfully".to_string(),
            reply_id: reply.id,
        }),
    ))
}

pub async fn list_replies(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Path(post_id): Path<Uuid>,
    Query(params): Query<PageQuery>,
) -> ApiResult<Json<Vec<ReplyResponse>>> {
    if !state.posts.exists(post_id).await? {
        return Err(ApiError::not_found("Post"));
    }
    let (limit, offset) = params.resolve(DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);

    let replies = state
        .posts
        .list_replies(post_id, limit, offset)
        .await?
        .into_iter()
        .map(|(reply, author)| ReplyResponse::new(reply, AuthorSummary::from(&author)))
        .collect();

    Ok(Json(replies))
}
