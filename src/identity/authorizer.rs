//! Bearer authorization and permission gates for axum routes.
//!
//! `authorize` turns a bearer token into an [`AuthContext`]: the session is
//! refreshed (sliding its TTL), the owning user loaded and their roles
//! resolved. `require_permission` runs after it and answers every denial with
//! the same generic 401 an unauthenticated caller gets.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, info};

use crate::access::{PermissionName, RoleRegistry};
use crate::error::AppError;
use super::request_context::{client_ip, user_agent, AuthContext};
use super::{SessionError, SessionStore, UserStore};

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, PartialEq, Eq)]
pub enum Credential<'a> {
    Missing,
    WrongScheme,
    Bearer(&'a str),
}

pub fn extract_bearer(headers: &HeaderMap) -> Credential<'_> {
    let raw = match headers.get(header::AUTHORIZATION) {
        None => return Credential::Missing,
        Some(v) => v.to_str().unwrap_or_default(),
    };
    if raw.is_empty() { return Credential::Missing; }
    match raw.strip_prefix(BEARER_PREFIX) {
        Some(token) => Credential::Bearer(token),
        None => Credential::WrongScheme,
    }
}

/// Everything the authorization middleware needs.
pub struct Authorizer {
    pub sessions: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserStore>,
    pub roles: Arc<RoleRegistry>,
    pub trust_forwarded_for: bool,
}

impl Authorizer {
    /// Resolve a presented token into a refreshed session plus its user.
    pub async fn acquire(&self, token: &str, ip: &str, user_agent: &str) -> Result<AuthContext, AppError> {
        let session = match self.sessions.acquire_and_refresh(token, ip, user_agent).await {
            Ok(s) => s,
            Err(SessionError::NotFound) => return Err(AppError::unauthorized()),
            Err(e) => return Err(AppError::server("acquire and refresh session", e)),
        };
        let user = self
            .users
            .by_id(session.user_id)
            .await
            .map_err(|e| AppError::server("retrieve user by id", e))?;
        let roles = user.roles(&self.roles);
        Ok(AuthContext { session, user, roles })
    }
}

pub async fn authorize(State(auth): State<Arc<Authorizer>>, mut req: Request<Body>, next: Next) -> Response {
    let token = match extract_bearer(req.headers()) {
        Credential::Missing => return AppError::unauthorized().into_response(),
        Credential::WrongScheme => return AppError::user("invalid auth type").into_response(),
        Credential::Bearer(t) => t.to_string(),
    };
    let ip = client_ip(req.headers(), req.extensions(), auth.trust_forwarded_for);
    let agent = user_agent(req.headers());
    let ctx = match auth.acquire(&token, &ip, &agent).await {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    info!(target: "auth", user_id = %ctx.user.id, session_id = %ctx.session.id, "authorized access");
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// Gate a route on a permission. Must be layered inside `authorize`.
pub async fn require_permission(State(permission): State<PermissionName>, req: Request<Body>, next: Next) -> Response {
    let allowed = req
        .extensions()
        .get::<AuthContext>()
        .map(|ctx| ctx.access(&permission).is_allowed())
        .unwrap_or(false);
    if !allowed {
        debug!(target: "auth", permission = %permission, "permission denied");
        return AppError::unauthorized().into_response();
    }
    next.run(req).await
}

#[cfg(test)]
#[path = "authorizer_tests.rs"]
mod authorizer_tests;
