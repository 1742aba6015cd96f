use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::activity::NO_CURSOR;
use crate::error::AppError;
use crate::identity::AuthContext;
use super::AppState;

pub const DEFAULT_PAGE: i32 = 25;
pub const MAX_PAGE: i32 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub before: Option<i64>,
    pub limit: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub id: i64,
    /// Unix seconds.
    pub created_at: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

/// The caller's activity log, newest first. `before` is the id of the last item already seen.
pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    query: Result<Query<PageQuery>, axum::extract::rejection::QueryRejection>,
) -> Result<Json<Vec<ActivityItem>>, AppError> {
    let Query(page) = query.map_err(|_| AppError::user("invalid query"))?;
    let limit = page.limit.unwrap_or(DEFAULT_PAGE);
    if limit > MAX_PAGE {
        return Err(AppError::user(format!("limit must not exceed {MAX_PAGE}")));
    }
    let before = page.before.unwrap_or(NO_CURSOR);
    let logs = state
        .activity
        .by_user_id(ctx.user.id, before, limit)
        .await
        .map_err(|e| AppError::server("get logs by user id", e))?;
    Ok(Json(
        logs.into_iter()
            .map(|l| ActivityItem { id: l.id, created_at: l.created_at.timestamp(), name: l.name, data: l.data })
            .collect(),
    ))
}
