use axum::extract::Extension;
use axum::Json;
use serde_json::{json, Value};

use crate::identity::AuthContext;

/// Reachable only with the `admin.dashboard` permission.
pub async fn dashboard(Extension(ctx): Extension<AuthContext>) -> Json<Value> {
    Json(json!({"status": "ok", "user_id": ctx.user.id}))
}
