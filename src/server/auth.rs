//! Discord sign in and logout.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::identity::{AuthContext, OAuthError, UserId};
use super::{AppState, ClientMeta};

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub id: String,
    pub user_id: UserId,
    pub access_token: String,
    /// Unix seconds.
    pub expires_at: i64,
}

pub async fn redirect(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.oauth.authorize_url())
}

pub async fn login(State(state): State<AppState>, client: ClientMeta, body: Result<Json<LoginBody>, JsonRejection>) -> Result<Response, AppError> {
    let Json(body) = body.map_err(|e| {
        info!(target: "auth", error = %e, "invalid login body");
        AppError::user("invalid body")
    })?;
    if body.code.is_empty() {
        return Err(AppError::auth("invalid code"));
    }

    let token = match state.oauth.exchange_code(&body.code).await {
        Ok(t) => t,
        Err(OAuthError::InvalidCode) => return Err(AppError::auth("invalid code")),
        Err(e) => return Err(AppError::server("access token exchange", e)),
    };
    let identity = state.oauth.identity(&token).await.map_err(|e| AppError::server("discord user me", e))?;
    if identity.email.as_deref().unwrap_or_default().is_empty() {
        return Err(AppError::user("missing email"));
    }

    match state.oauth.join_guild(&token.access_token, &identity.id).await {
        Ok(status) => info!(target: "auth", external_id = %identity.id, ?status, "discord guild member add"),
        Err(OAuthError::Unauthorized) => return Err(AppError::auth("discord guild join unauthorized")),
        Err(e) => return Err(AppError::server("discord guild member add", e)),
    }

    let user = state
        .users
        .register_or_update(&identity, &token.refresh_token)
        .await
        .map_err(|e| AppError::server("user register", e))?;
    let session = state
        .sessions
        .register_new(user.id, &client.ip, &client.user_agent)
        .await
        .map_err(|e| AppError::server("session register new", e))?;

    let body = LoginResponse {
        id: session.id,
        user_id: session.user_id,
        access_token: session.token,
        expires_at: session.expires_at.timestamp(),
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn logout(State(state): State<AppState>, Extension(ctx): Extension<AuthContext>) -> Result<StatusCode, AppError> {
    state
        .sessions
        .invalidate_by_auth_token(&ctx.session.token)
        .map_err(|e| AppError::server("session invalidate", e))?;
    Ok(StatusCode::OK)
}
