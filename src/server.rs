//!
//! depot HTTP server
//! -----------------
//! Axum router, shared state and startup for the depot API.
//!
//! Responsibilities:
//! - Discord sign in, logout and bearer session management.
//! - Activity log, public profile and download lookups.
//! - Permission gated admin routes.
//! - Background expiry sweeping and snapshotting of the session KV store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, Request};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::access::{PermissionName, RoleRegistry};
use crate::activity::ActivityStore;
use crate::config::ServerConfig;
use crate::directory::{MemoryDirectory, PgDirectory, ProfileStore, ProgramStore};
use crate::error::AppError;
use crate::identity::{authorize, client_ip, require_permission, user_agent, Authorizer, DiscordProvider, KvSessionStore, OAuthProvider, SessionStore, UserStore};
use crate::storage::{KvStore, PersistenceSettings, StoreSettings};

pub mod auth;
pub mod sessions;
pub mod activities;
pub mod profile;
pub mod download;
pub mod admin;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub programs: Arc<dyn ProgramStore>,
    pub activity: Arc<dyn ActivityStore>,
    pub oauth: Arc<dyn OAuthProvider>,
    pub roles: Arc<RoleRegistry>,
    pub authorizer: Arc<Authorizer>,
    pub trust_forwarded_for: bool,
}

/// A backend providing every durable collaborator.
pub trait Directory: UserStore + ProfileStore + ProgramStore + ActivityStore + 'static {}

impl<T: UserStore + ProfileStore + ProgramStore + ActivityStore + 'static> Directory for T {}

impl AppState {
    /// Wire the session store over `kv` and every collaborator over `directory`.
    pub fn new<D: Directory>(
        directory: Arc<D>,
        kv: KvStore,
        oauth: Arc<dyn OAuthProvider>,
        roles: Arc<RoleRegistry>,
        session_ttl: Duration,
        trust_forwarded_for: bool,
    ) -> Self {
        let activity: Arc<dyn ActivityStore> = directory.clone();
        let sessions: Arc<dyn SessionStore> = Arc::new(KvSessionStore::new(kv, activity.clone(), session_ttl));
        let users: Arc<dyn UserStore> = directory.clone();
        let authorizer = Arc::new(Authorizer {
            sessions: sessions.clone(),
            users: users.clone(),
            roles: roles.clone(),
            trust_forwarded_for,
        });
        Self {
            sessions,
            users,
            profiles: directory.clone(),
            programs: directory,
            activity,
            oauth,
            roles,
            authorizer,
            trust_forwarded_for,
        }
    }
}

/// Caller address and user agent as seen by the server.
#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub ip: String,
    pub user_agent: String,
}

impl FromRequestParts<AppState> for ClientMeta {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(ClientMeta {
            ip: client_ip(&parts.headers, &parts.extensions, state.trust_forwarded_for),
            user_agent: user_agent(&parts.headers),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/dashboard", get(admin::dashboard))
        .route_layer(from_fn_with_state(PermissionName::admin_dashboard(), require_permission));

    let authed = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/session", get(sessions::current))
        .route("/sessions", get(sessions::list))
        .route("/sessions/other", delete(sessions::delete_other))
        .route("/sessions/{id}", delete(sessions::delete_by_id))
        .route("/activities", get(activities::list))
        .merge(admin)
        .route_layer(from_fn_with_state(state.authorizer.clone(), authorize));

    Router::new()
        .route("/status", get(status))
        .route("/auth/discord", get(auth::redirect).post(auth::login))
        .route("/profile/{user_id}", get(profile::show))
        .route("/download/{file_type}", get(download::latest))
        .merge(authed)
        .fallback(not_found)
        .layer(from_fn_with_state(state.trust_forwarded_for, request_log))
        .with_state(state)
}

async fn status() -> Json<serde_json::Value> { Json(json!({"status": "ok"})) }

async fn not_found() -> AppError { AppError::not_found("Not Found") }

async fn request_log(State(trust_forwarded_for): State<bool>, req: Request<Body>, next: Next) -> Response {
    let referer = req.headers().get(header::REFERER).and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
    let forwarded = req.headers().get("x-forwarded-for").and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
    let remote = client_ip(req.headers(), req.extensions(), trust_forwarded_for);
    let agent = user_agent(req.headers());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let resp = next.run(req).await;
    info!(
        target: "http",
        remote_addr = %remote,
        %method,
        path = %path,
        status = resp.status().as_u16(),
        z_referer = %referer,
        z_user_agent = %agent,
        z_x_forwarded_for = %forwarded,
        "handled request"
    );
    resp
}

fn spawn_kv_maintenance(kv: KvStore) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let removed = kv.sweep();
            if removed > 0 { debug!(removed = removed, "kv_sweep"); }
        }
    });
}

/// Start the depot HTTP server with the given configuration.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!(target: "startup", "depot starting. data_dir={:?}, http_port={}, debug={}", config.data_dir, config.http_port, config.debug);

    let roles = Arc::new(RoleRegistry::builtin().context("building role registry")?);

    let kv_settings = StoreSettings {
        name: "sessions".into(),
        persistence: Some(PersistenceSettings { enabled: true, interval_ms: config.snapshot_interval_ms }),
    };
    let kv = KvStore::open(config.data_dir.join("sessions"), kv_settings)
        .with_context(|| format!("While opening session store under {:?}", config.data_dir))?;
    spawn_kv_maintenance(kv.clone());

    let oauth: Arc<dyn OAuthProvider> = Arc::new(
        DiscordProvider::new(config.discord.clone(), config.outbound_timeout).context("building discord client")?,
    );
    if config.discord.guild.is_none() {
        warn!(target: "startup", "no discord guild configured, guild join disabled");
    }

    let state = match config.postgres_dsn.as_deref() {
        Some(dsn) => {
            let dir = tokio::time::timeout(config.outbound_timeout, PgDirectory::connect(dsn))
                .await
                .context("postgres connect timed out")?
                .context("connecting to postgres")?
                .with_timeout(config.outbound_timeout);
            AppState::new(Arc::new(dir), kv.clone(), oauth, roles, config.session_ttl, config.trust_forwarded_for)
        }
        None => {
            warn!(target: "startup", "POSTGRES_DSN not set, using in-memory directory");
            AppState::new(Arc::new(MemoryDirectory::new()), kv.clone(), oauth, roles, config.session_ttl, config.trust_forwarded_for)
        }
    };

    let app = router(state);
    let addr: SocketAddr = format!("{}:{}", config.bind_host(), config.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await;
    if let Err(e) = kv.save_snapshot() {
        warn!(error = %e, "final kv snapshot failed");
    }
    served?;
    Ok(())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod server_tests;
