//! Persistence seams used by the HTTP layer.
//!
//! Handlers only see [`UserDirectory`] and [`PostRepository`]; the Postgres
//! implementations below delegate to the query functions in [`crate::db`].

use async_trait::async_trait;
use chrono::Utc;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::PoolError;
use shared_types::{Post, Reply, UpdateProfileRequest, User, UserStatus};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::models::{NewPost, NewReply, NewUser, ProfileChanges, UserRow};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("database connection error: {0}")]
    Pool(#[from] PoolError),

    #[error("database error: {0}")]
    Database(DieselError),

    /// Unique constraint violation
    #[error("{0}")]
    Conflict(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),
}

impl From<DieselError> for RepoError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                RepoError::Conflict(info.message().to_string())
            }
            other => RepoError::Database(other),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Who the users are. The auth core only asks whether an email has an
/// account; profile management goes through the rest.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>>;

    /// Create an active account for `email`.
    async fn insert(&self, email: &str) -> RepoResult<User>;

    async fn update_profile(&self, id: Uuid, changes: &UpdateProfileRequest) -> RepoResult<User>;

    async fn set_status(&self, id: Uuid, status: UserStatus) -> RepoResult<User>;

    /// A page of active accounts, oldest first.
    async fn list_active(&self, limit: i64, offset: i64) -> RepoResult<Vec<User>>;
}

/// Posts and the replies under them.
#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn create(&self, user_id: Uuid, content: &str, media: &[String]) -> RepoResult<Post>;

    /// Newest first, with each post's author.
    async fn list_recent(&self, limit: i64, offset: i64) -> RepoResult<Vec<(Post, User)>>;

    async fn exists(&self, post_id: Uuid) -> RepoResult<bool>;

    async fn create_reply(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        content: &str,
        media: &[String],
    ) -> RepoResult<Reply>;

    /// Oldest first, with each reply's author.
    async fn list_replies(
        &self,
        post_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepoResult<Vec<(Reply, User)>>;
}

/// Postgres-backed implementation of both repositories.
#[derive(Clone)]
pub struct PgRepository {
    pool: DbPool,
}

impl PgRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn into_user(row: UserRow) -> RepoResult<User> {
    User::try_from(row).map_err(RepoError::InvalidRow)
}

#[async_trait]
impl UserDirectory for PgRepository {
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let mut conn = self.pool.get().await?;
        db::users::get_by_email(&mut conn, email)
            .await?
            .map(into_user)
            .transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        let mut conn = self.pool.get().await?;
        db::users::get_by_id(&mut conn, id)
            .await?
            .map(into_user)
            .transpose()
    }

    async fn insert(&self, email: &str) -> RepoResult<User> {
        let mut conn = self.pool.get().await?;
        let new_user = NewUser {
            id: Uuid::new_v4(),
            email,
            status: UserStatus::Active.as_str(),
            created_at: Utc::now(),
        };
        into_user(db::users::create(&mut conn, &new_user).await?)
    }

    async fn update_profile(&self, id: Uuid, changes: &UpdateProfileRequest) -> RepoResult<User> {
        let mut conn = self.pool.get().await?;
        let changes = ProfileChanges {
            username: changes.username.as_deref(),
            full_name: changes.full_name.as_deref(),
            bio: changes.bio.as_deref(),
        };
        let row = db::users::update_profile(&mut conn, id, &changes)
            .await
            .map_err(|e| match RepoError::from(e) {
                RepoError::Conflict(_) => RepoError::Conflict("Username already taken".to_string()),
                other => other,
            })?;
        into_user(row)
    }

    async fn set_status(&self, id: Uuid, status: UserStatus) -> RepoResult<User> {
        let mut conn = self.pool.get().await?;
        into_user(db::users::set_status(&mut conn, id, status).await?)
    }

    async fn list_active(&self, limit: i64, offset: i64) -> RepoResult<Vec<User>> {
        let mut conn = self.pool.get().await?;
        db::users::list_active(&mut conn, limit, offset)
            .await?
            .into_iter()
            .map(into_user)
            .collect()
    }
}

#[async_trait]
impl PostRepository for PgRepository {
    async fn create(&self, user_id: Uuid, content: &str, media: &[String]) -> RepoResult<Post> {
        let mut conn = self.pool.get().await?;
        let post = db::posts::create(&mut conn, &NewPost::new(user_id, content, media)).await?;
        Ok(post)
    }

    async fn list_recent(&self, limit: i64, offset: i64) -> RepoResult<Vec<(Post, User)>> {
        let mut conn = self.pool.get().await?;
        db::posts::list_recent(&mut conn, limit, offset)
            .await?
            .into_iter()
            .map(|(post, author)| into_user(author).map(|author| (post, author)))
            .collect()
    }

    async fn exists(&self, post_id: Uuid) -> RepoResult<bool> {
        let mut conn = self.pool.get().await?;
        Ok(db::posts::exists(&mut conn, post_id).await?)
    }

    async fn create_reply(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        content: &str,
        media: &[String],
    ) -> RepoResult<Reply> {
        let mut conn = self.pool.get().await?;
        let reply = NewReply::new(post_id, user_id, content, media);
        Ok(db::replies::create(&mut conn, &reply).await?)
    }

    async fn list_replies(
        &self,
        post_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepoResult<Vec<(Reply, User)>> {
        let mut conn = self.pool.get().await?;
        db::replies::list_for_post(&mut conn, post_id, limit, offset)
            .await?
            .into_iter()
            .map(|(reply, author)| into_user(author).map(|author| (reply, author)))
            .collect()
    }
}
