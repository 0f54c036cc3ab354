//! Test doubles shared by the flow and handler tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Body, http::header, response::Response, Router};
use chrono::Utc;
use serde_json::Value;
use shared_types::{Post, Reply, UpdateProfileRequest, User, UserStatus};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::jwt::TokenCodec;
use crate::auth::types::IssuedSession;
use crate::auth::{LoginFlow, SessionManager};
use crate::config::AuthConfig;
use crate::mailer::{MailError, Mailer};
use crate::repository::{PostRepository, RepoError, RepoResult, UserDirectory};
use crate::store::{EphemeralStore, MemoryStore, StoreError, StoreResult};
use crate::AppState;

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Forwards every message to a channel the test holds.
pub struct RecordingMailer {
    outbox: mpsc::UnboundedSender<SentMail>,
}

impl RecordingMailer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SentMail>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { outbox: tx }, rx)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        self.outbox
            .send(SentMail {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            })
            .map_err(|_| MailError::Transport("outbox closed".to_string()))
    }
}

pub struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
        Err(MailError::Transport("connection refused".to_string()))
    }
}

/// Pull the login token out of a login email body.
pub fn token_from_email(body: &str) -> String {
    let start = body.find("token=").expect("login link in email body") + "token=".len();
    let encoded = body[start..]
        .split_whitespace()
        .next()
        .expect("token after marker");
    urlencoding::decode(encoded)
        .expect("token is valid utf-8")
        .into_owned()
}

/// A store whose backend is unreachable.
pub struct UnavailableStore;

fn refused<T>() -> StoreResult<T> {
    Err(StoreError::Backend("connection refused".to_string()))
}

#[async_trait]
impl EphemeralStore for UnavailableStore {
    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<()> {
        refused()
    }

    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        refused()
    }

    async fn ttl(&self, _key: &str) -> StoreResult<Option<Duration>> {
        refused()
    }

    async fn delete(&self, _key: &str) -> StoreResult<bool> {
        refused()
    }

    async fn take(&self, _key: &str) -> StoreResult<Option<String>> {
        refused()
    }

    async fn delete_if_eq(&self, _key: &str, _expected: &str) -> StoreResult<bool> {
        refused()
    }

    async fn replace_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<bool> {
        refused()
    }

    async fn rotate(
        &self,
        _old_key: &str,
        _expected: &str,
        _new_key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> StoreResult<bool> {
        refused()
    }
}

/// In-memory users, posts and replies.
#[derive(Default)]
pub struct MemoryDirectory {
    users: Mutex<Vec<User>>,
    posts: Mutex<Vec<Post>>,
    replies: Mutex<Vec<Reply>>,
    last_page: Mutex<Option<(i64, i64)>>,
}

impl MemoryDirectory {
    pub fn seed(&self, email: &str, status: UserStatus) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            username: None,
            full_name: None,
            bio: None,
            status,
            created_at: Utc::now(),
        };
        self.users.lock().unwrap().push(user.clone());
        user
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned()
    }

    pub fn force_status(&self, id: Uuid, status: UserStatus) {
        if let Some(user) = self.users.lock().unwrap().iter_mut().find(|u| u.id == id) {
            user.status = status;
        }
    }

    /// `(limit, offset)` of the most recent listing call.
    pub fn last_page_request(&self) -> Option<(i64, i64)> {
        *self.last_page.lock().unwrap()
    }

    fn record_page(&self, limit: i64, offset: i64) {
        *self.last_page.lock().unwrap() = Some((limit, offset));
    }

    fn author_of(&self, user_id: Uuid) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
    }

    fn modify(&self, id: Uuid, f: impl FnOnce(&mut User)) -> RepoResult<User> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(RepoError::Database(diesel::result::Error::NotFound))?;
        f(user);
        Ok(user.clone())
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        Ok(self.user_by_email(email))
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }

    async fn insert(&self, email: &str) -> RepoResult<User> {
        if self.user_by_email(email).is_some() {
            return Err(RepoError::Conflict("User already exists".to_string()));
        }
        Ok(self.seed(email, UserStatus::Active))
    }

    async fn update_profile(&self, id: Uuid, changes: &UpdateProfileRequest) -> RepoResult<User> {
        if let Some(username) = &changes.username {
            let taken = self
                .users
                .lock()
                .unwrap()
                .iter()
                .any(|u| u.id != id && u.username.as_ref() == Some(username));
            if taken {
                return Err(RepoError::Conflict("Username already taken".to_string()));
            }
        }

        self.modify(id, |user| {
            if let Some(username) = &changes.username {
                user.username = Some(username.clone());
            }
            if let Some(full_name) = &changes.full_name {
                user.full_name = Some(full_name.clone());
            }
            if let Some(bio) = &changes.bio {
                user.bio = Some(bio.clone());
            }
        })
    }

    async fn set_status(&self, id: Uuid, status: UserStatus) -> RepoResult<User> {
        self.modify(id, |user| user.status = status)
    }

    async fn list_active(&self, limit: i64, offset: i64) -> RepoResult<Vec<User>> {
        self.record_page(limit, offset);
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.is_active())
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PostRepository for MemoryDirectory {
    async fn create(&self, user_id: Uuid, content: &str, media: &[String]) -> RepoResult<Post> {
        let now = Utc::now();
        let post = Post {
            id: Uuid::new_v4(),
            user_id,
            content: content.to_string(),
            media: media.to_vec(),
            likes: 0,
            edited: false,
            created_at: now,
            updated_at: now,
        };
        self.posts.lock().unwrap().push(post.clone());
        Ok(post)
    }

    async fn list_recent(&self, limit: i64, offset: i64) -> RepoResult<Vec<(Post, User)>> {
        self.record_page(limit, offset);

        let mut posts = self.posts.lock().unwrap().clone();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(posts
            .into_iter()
            .filter_map(|post| {
                let author = self.author_of(post.user_id)?;
                Some((post, author))
            })
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn exists(&self, post_id: Uuid) -> RepoResult<bool> {
        Ok(self.posts.lock().unwrap().iter().any(|p| p.id == post_id))
    }

    async fn create_reply(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        content: &str,
        media: &[String],
    ) -> RepoResult<Reply> {
        let reply = Reply {
            id: Uuid::new_v4(),
            post_id,
            user_id,
            content: content.to_string(),
            media: media.to_vec(),
            likes: 0,
            created_at: Utc::now(),
        };
        self.replies.lock().unwrap().push(reply.clone());
        Ok(reply)
    }

    async fn list_replies(
        &self,
        post_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepoResult<Vec<(Reply, User)>> {
        self.record_page(limit, offset);

        let replies = self.replies.lock().unwrap().clone();
        Ok(replies
            .into_iter()
            .filter(|r| r.post_id == post_id)
            .filter_map(|reply| {
                let author = self.author_of(reply.user_id)?;
                Some((reply, author))
            })
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

/// A fully wired `AppState` over in-memory collaborators.
pub struct TestApp {
    pub state: AppState,
    pub outbox: mpsc::UnboundedReceiver<SentMail>,
    pub directory: Arc<MemoryDirectory>,
    pub store: Arc<dyn EphemeralStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn EphemeralStore>) -> Self {
        let config = AuthConfig::for_tests();
        let codec = TokenCodec::new(&config).expect("test codec");
        let (mailer, outbox) = RecordingMailer::new();
        let directory = Arc::new(MemoryDirectory::default());

        let state = AppState {
            logins: Arc::new(LoginFlow::new(
                &config,
                codec.clone(),
                store.clone(),
                Arc::new(mailer),
            )),
            sessions: Arc::new(SessionManager::new(&config, codec, store.clone())),
            users: directory.clone(),
            posts: directory.clone(),
            auth_config: Arc::new(config),
        };

        Self {
            state,
            outbox,
            directory,
            store,
        }
    }

    pub fn router(&self) -> Router {
        crate::build_router(self.state.clone())
    }

    /// Open a session for `email`, creating an active account if needed.
    pub async fn sign_in(&self, email: &str) -> IssuedSession {
        if self.directory.user_by_email(email).is_none() {
            self.directory.seed(email, UserStatus::Active);
        }
        self.state.sessions.issue(email).await.expect("session issued")
    }
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}
