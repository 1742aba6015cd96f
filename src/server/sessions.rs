//! Session management for the signed in user. Tokens never leave the server
//! here; sessions are addressed by their public id.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::identity::{AuthContext, Session, SessionError, UserId};
use super::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub id: String,
    pub ip: String,
    pub user_agent: String,
    /// Unix seconds.
    pub last_accessed_at: i64,
}

impl From<&Session> for SessionMeta {
    fn from(s: &Session) -> Self {
        Self { id: s.id.clone(), ip: s.ip.clone(), user_agent: s.user_agent.clone(), last_accessed_at: s.last_accessed_at.timestamp() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSession {
    pub id: String,
    pub user_id: UserId,
    pub ip: String,
    pub user_agent: String,
    pub last_accessed_at: i64,
    pub expires_at: i64,
}

pub async fn current(Extension(ctx): Extension<AuthContext>) -> Json<CurrentSession> {
    let s = ctx.session;
    Json(CurrentSession {
        id: s.id,
        user_id: s.user_id,
        ip: s.ip,
        user_agent: s.user_agent,
        last_accessed_at: s.last_accessed_at.timestamp(),
        expires_at: s.expires_at.timestamp(),
    })
}

pub async fn list(State(state): State<AppState>, Extension(ctx): Extension<AuthContext>) -> Result<Json<Vec<SessionMeta>>, AppError> {
    let sessions = match state.sessions.active_sessions(&ctx.session.token) {
        Ok(s) => s,
        // revoked between authorization and now
        Err(SessionError::NotFound) => return Err(AppError::forbidden("Forbidden")),
        Err(e) => return Err(AppError::server("list active sessions", e)),
    };
    Ok(Json(sessions.iter().map(SessionMeta::from).collect()))
}

pub async fn delete_by_id(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if session_id.is_empty() {
        return Err(AppError::user("no session id"));
    }
    let res = if session_id == ctx.session.id {
        state.sessions.invalidate_by_auth_token(&ctx.session.token)
    } else {
        state.sessions.invalidate_by_id(ctx.user.id, &session_id)
    };
    match res {
        Ok(()) => Ok(StatusCode::OK),
        Err(SessionError::NotFound) | Err(SessionError::WrongOwner { .. }) => Err(AppError::forbidden("Forbidden")),
        Err(e) => Err(AppError::server("session invalidate", e)),
    }
}

pub async fn delete_other(State(state): State<AppState>, Extension(ctx): Extension<AuthContext>) -> Result<StatusCode, AppError> {
    match state.sessions.invalidate_all_except(&ctx.session.token) {
        Ok(_) => Ok(StatusCode::OK),
        Err(SessionError::NotFound) => Err(AppError::forbidden("Forbidden")),
        Err(e) => Err(AppError::server("invalidate other sessions", e)),
    }
}
