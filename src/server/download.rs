use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::directory::DirectoryError;
use crate::error::AppError;
use super::AppState;

pub const DEFAULT_BRANCH: &str = "stable";

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    pub branch: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub path: String,
    pub download_url: String,
    pub hash: String,
}

/// Files of the newest build for `file_type` on the requested platform.
pub async fn latest(
    State(state): State<AppState>,
    Path(file_type): Path<String>,
    Query(q): Query<DownloadQuery>,
) -> Result<Json<Vec<FileResponse>>, AppError> {
    let branch = q.branch.filter(|b| !b.is_empty()).unwrap_or_else(|| DEFAULT_BRANCH.to_string());
    match state.programs.latest_program_files(&file_type, &q.os, &q.arch, &branch).await {
        Ok(files) => Ok(Json(
            files.into_iter().map(|f| FileResponse { path: f.path, download_url: f.download_url, hash: f.hash }).collect(),
        )),
        Err(DirectoryError::ProgramNotFound) => Err(AppError::not_found("Not Found")),
        Err(e) => Err(AppError::server("latest program files", e)),
    }
}
