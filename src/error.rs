//! Unified HTTP error model.
//! Collaborator errors are classified into one of these variants once, at the
//! handler or middleware boundary, and rendered as `{"error_message": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::error;

pub const GENERIC_SERVER_ERROR: &str = "Internal Server Error";
pub const GENERIC_UNAUTHORIZED: &str = "Unauthorized";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { message: String },
    Auth { message: String },
    Forbidden { message: String },
    NotFound { message: String },
    Internal { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_message: String,
}

impl AppError {
    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message }
            | AppError::Auth { message }
            | AppError::Forbidden { message }
            | AppError::NotFound { message }
            | AppError::Internal { message } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(msg: S) -> Self { AppError::UserInput { message: msg.into() } }
    pub fn auth<S: Into<String>>(msg: S) -> Self { AppError::Auth { message: msg.into() } }
    pub fn forbidden<S: Into<String>>(msg: S) -> Self { AppError::Forbidden { message: msg.into() } }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { AppError::NotFound { message: msg.into() } }

    /// The generic 401 used for every authentication and permission failure.
    pub fn unauthorized() -> Self { Self::auth(GENERIC_UNAUTHORIZED) }

    /// Log `err` with `context` and return the generic 500. Nothing from `err`
    /// reaches the response body.
    pub fn server(context: &str, err: impl Display) -> Self {
        error!(target: "http", context, error = %err, "request failed");
        AppError::Internal { message: GENERIC_SERVER_ERROR.into() }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::Auth { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::NotFound { .. } => 404,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.http_status(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody { error_message: self.message().to_string() };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
