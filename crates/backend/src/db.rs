use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager, ManagerConfig},
    AsyncPgConnection, RunQueryDsl,
};
use uuid::Uuid;

use crate::models::{NewPost, NewReply, NewUser, ProfileChanges, UserRow};

pub type DbPool = Pool<AsyncPgConnection>;

async fn establish_tls_connection(config: String) -> diesel::ConnectionResult<AsyncPgConnection> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let (client, connection) = tokio_postgres::connect(&config, tls)
        .await
        .map_err(|e| diesel::ConnectionError::BadConnection(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    AsyncPgConnection::try_from(client).await
}

/// Local databases usually run without TLS; opt out with `sslmode=disable`.
fn wants_tls(database_url: &str) -> bool {
    !database_url.contains("sslmode=disable")
}

pub fn establish_connection_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let config = if wants_tls(database_url) {
        let mut manager_config = ManagerConfig::default();
        manager_config.custom_setup =
            Box::new(|url| Box::pin(establish_tls_connection(url.to_string())));
        AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
            database_url,
            manager_config,
        )
    } else {
        tracing::warn!("Connecting to the database without TLS");
        AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url)
    };

    let pool = Pool::builder(config).build()?;
    Ok(pool)
}

pub mod users {
    use super::*;
    use shared_types::UserStatus;

    pub async fn get_by_id(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> QueryResult<Option<UserRow>> {
        use crate::schema::users::dsl::*;

        users
            .find(user_id)
            .select(UserRow::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn get_by_email(
        conn: &mut AsyncPgConnection,
        email_address: &str,
    ) -> QueryResult<Option<UserRow>> {
        use crate::schema::users::dsl::*;

        users
            .filter(email.eq(email_address))
            .select(UserRow::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn create(conn: &mut AsyncPgConnection, new_user: &NewUser<'_>) -> QueryResult<UserRow> {
        use crate::schema::users::dsl::*;

        diesel::insert_into(users)
            .values(new_user)
            .returning(UserRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn update_profile(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        changes: &ProfileChanges<'_>,
    ) -> QueryResult<UserRow> {
        use crate::schema::users::dsl::*;

        if changes.is_empty() {
            return users
                .find(user_id)
                .select(UserRow::as_select())
                .first(conn)
                .await;
        }

        diesel::update(users.find(user_id))
            .set(changes)
            .returning(UserRow::as_returning())
            .get_result(conn)
            .await
    }

    /// Active accounts, oldest first.
    pub async fn list_active(
        conn: &mut AsyncPgConnection,
        limit: i64,
        offset: i64,
    ) -> QueryResult<Vec<UserRow>> {
        use crate::schema::users::dsl::*;

        users
            .filter(status.eq(UserStatus::Active.as_str()))
            .order_by((created_at.asc(), id.asc()))
            .select(UserRow::as_select())
            .limit(limit)
            .offset(offset)
            .load(conn)
            .await
    }

    pub async fn set_status(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        new_status: UserStatus,
    ) -> QueryResult<UserRow> {
        use crate::schema::users::dsl::*;

        diesel::update(users.find(user_id))
            .set(status.eq(new_status.as_str()))
            .returning(UserRow::as_returning())
            .get_result(conn)
            .await
    }
}

pub mod posts {
    use super::*;
    use shared_types::Post;

    pub async fn create(conn: &mut AsyncPgConnection, new_post: &NewPost<'_>) -> QueryResult<Post> {
        use crate::schema::posts::dsl::*;

        diesel::insert_into(posts)
            .values(new_post)
            .get_result::<Post>(conn)
            .await
    }

    /// Newest first, each post paired with its author.
    pub async fn list_recent(
        conn: &mut AsyncPgConnection,
        limit: i64,
        offset: i64,
    ) -> QueryResult<Vec<(Post, UserRow)>> {
        use crate::schema::{posts, users};

        posts::table
            .inner_join(users::table)
            .select((posts::all_columns, users::all_columns))
            .order_by(posts::created_at.desc())
            .limit(limit)
            .offset(offset)
            .load::<(Post, UserRow)>(conn)
            .await
    }

    pub async fn exists(conn: &mut AsyncPgConnection, post_id: Uuid) -> QueryResult<bool> {
        use crate::schema::posts::dsl::*;

        diesel::select(diesel::dsl::exists(posts.find(post_id)))
            .get_result(conn)
            .await
    }
}

pub mod replies {
    use super::*;
    use shared_types::Reply;

    pub async fn create(conn: &mut AsyncPgConnection, new_reply: &NewReply<'_>) -> QueryResult<Reply> {
        use crate::schema::replies::dsl::*;

        diesel::insert_into(replies)
            .values(new_reply)
            .get_result::<Reply>(conn)
            .await
    }

    /// Replies to one post in the order they were written, with authors.
    pub async fn list_for_post(
        conn: &mut AsyncPgConnection,
        post: Uuid,
        limit: i64,
        offset: i64,
    ) -> QueryResult<Vec<(Reply, UserRow)>> {
        use crate::schema::{replies, users};

        replies::table
            .inner_join(users::table)
            .filter(replies::post_id.eq(post))
            .select((replies::all_columns, users::all_columns))
            .order_by((replies::created_at.asc(), replies::id.asc()))
            .limit(limit)
            .offset(offset)
            .load::<(Reply, UserRow)>(conn)
            .await
    }
}
