use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::directory::DirectoryError;
use crate::error::AppError;
use crate::identity::UserId;
use super::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub name: String,
    pub avatar_url: String,
}

pub async fn show(State(state): State<AppState>, Path(raw_id): Path<String>) -> Result<Json<ProfileResponse>, AppError> {
    let user_id: i64 = raw_id.parse().map_err(|_| AppError::user("invalid user id"))?;
    match state.profiles.by_user_id(UserId(user_id)).await {
        Ok(p) => Ok(Json(ProfileResponse { name: p.name, avatar_url: p.avatar_url })),
        Err(DirectoryError::ProfileNotFound) => Err(AppError::not_found("profile not found")),
        Err(e) => Err(AppError::server("get profile by user id", e)),
    }
}
