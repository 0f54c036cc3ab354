// Database models for Diesel
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared_types::{User, UserStatus};
use uuid::Uuid;

/// Database representation of users.
/// `status` is stored as VARCHAR and parsed into [`UserStatus`] on the way out.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = String;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            username: row.username,
            full_name: row.full_name,
            bio: row.bio,
            status: row.status.parse::<UserStatus>()?,
            created_at: row.created_at,
        })
    }
}

/// Insertable struct for new users
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::users)]
pub struct NewUser<'a> {
    pub id: Uuid,
    pub email: &'a str,
    pub status: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Profile fields a user may change. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = crate::schema::users)]
pub struct ProfileChanges<'a> {
    pub username: Option<&'a str>,
    pub full_name: Option<&'a str>,
    pub bio: Option<&'a str>,
}

impl ProfileChanges<'_> {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.full_name.is_none() && self.bio.is_none()
    }
}

/// Insertable struct for new posts
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::posts)]
pub struct NewPost<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: &'a str,
    pub media: Vec<String>,
    pub likes: i32,
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'a> NewPost<'a> {
    pub fn new(user_id: Uuid, content: &'a str, media: &[String]) -> Self {
        let now = Utc::now();
        NewPost {
            id: Uuid::new_v4(),
            user_id,
            content,
            media: media.to_vec(),
            likes: 0,
            edited: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Insertable struct for new replies
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::replies)]
pub struct NewReply<'a> {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: &'a str,
    pub media: Vec<String>,
    pub likes: i32,
    pub created_at: DateTime<Utc>,
}

impl<'a> NewReply<'a> {
    pub fn new(post_id: Uuid, user_id: Uuid, content: &'a str, media: &[String]) -> Self {
        NewReply {
            id: Uuid::new_v4(),
            post_id,
            user_id,
            content,
            media: media.to_vec(),
            likes: 0,
            created_at: Utc::now(),
        }
    }
}
