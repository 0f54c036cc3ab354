use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod config;
mod db;
pub mod error;
mod handlers;
mod mailer;
mod models;
pub mod repository;
mod schema;
mod store;
#[cfg(test)]
mod testing;

use auth::jwt::TokenCodec;
use auth::{LoginFlow, SessionManager};
use config::{AppConfig, AuthConfig};
use mailer::{LogMailer, Mailer, SmtpMailer};
use repository::{PgRepository, PostRepository, UserDirectory};

#[derive(Parser, Debug)]
#[command(name = "connector")]
#[command(about = "Connector API server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    port: u16,
}

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub auth_config: Arc<AuthConfig>,
    pub logins: Arc<LoginFlow>,
    pub sessions: Arc<SessionManager>,
    pub users: Arc<dyn UserDirectory>,
    pub posts: Arc<dyn PostRepository>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("connector=debug,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env()?;

    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = db::establish_connection_pool(database_url)?;
    let repository = Arc::new(PgRepository::new(pool));

    let store = store::connect(config.redis_url.as_deref()).await?;
    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => {
            tracing::info!("Sending email through {}", smtp.host);
            Arc::new(SmtpMailer::new(smtp, &config.sender_email)?)
        }
        None => {
            tracing::warn!("SMTP_HOST not set, login links will only be logged");
            Arc::new(LogMailer)
        }
    };

    let codec = TokenCodec::new(&config.auth)?;
    let state = AppState {
        logins: Arc::new(LoginFlow::new(
            &config.auth,
            codec.clone(),
            store.clone(),
            mailer,
        )),
        sessions: Arc::new(SessionManager::new(&config.auth, codec, store)),
        users: repository.clone(),
        posts: repository,
        auth_config: Arc::new(config.auth.clone()),
    };

    let app = build_router(state).layer(build_cors_layer(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/users/me",
            put(handlers::update_me).delete(handlers::delete_me),
        )
        .route(
            "/posts",
            post(handlers::create_post).get(handlers::list_posts),
        )
        .route(
            "/posts/:id/replies",
            post(handlers::create_reply).get(handlers::list_replies),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        // Auth routes
        .route("/auth/login", post(auth::auth_login))
        .route("/auth/verify", get(auth::auth_verify))
        .route("/auth/refresh", post(auth::auth_refresh))
        .route("/auth/logout", post(auth::auth_logout))
        .route("/auth/me", get(auth::auth_me))
        // User routes
        .route("/users", get(handlers::list_users))
        .route("/users/:id", get(handlers::get_user))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build CORS layer based on environment configuration.
///
/// If CORS_ALLOWED_ORIGINS is set, only those origins are allowed.
/// If not set, defaults to permissive CORS (for development only).
///
/// Auth travels in cookies, so an explicit origin list is needed for
/// credentialed requests from the web app.
fn build_cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    match allowed_origins {
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                tracing::warn!(
                    "CORS_ALLOWED_ORIGINS is set but empty, using permissive CORS (not recommended for production)"
                );
                CorsLayer::permissive()
            } else {
                tracing::info!("CORS configured for origins: {:?}", origins);
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::DELETE,
                        Method::OPTIONS,
                    ])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .allow_credentials(true)
            }
        }
        None => {
            tracing::warn!(
                "CORS_ALLOWED_ORIGINS not set, using permissive CORS (not recommended for production)"
            );
            CorsLayer::permissive()
        }
    }
}
