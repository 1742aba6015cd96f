//! Durable collaborators around the session core: users, public profiles,
//! program builds. Two backends share the traits below: an in-memory
//! directory and PostgreSQL.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::UserId;

pub mod memory;
pub mod pg;

pub use memory::MemoryDirectory;
pub use pg::PgDirectory;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("user not found")]
    UserNotFound,
    #[error("profile not found")]
    ProfileNotFound,
    #[error("program not found")]
    ProgramNotFound,
    #[error("database: {0}")]
    Database(#[from] tokio_postgres::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("database call timed out after {0:?}")]
    Timeout(Duration),
}

/// Run a store call under `limit`. A call still pending at the deadline is
/// dropped and reported as `Timeout`.
pub async fn with_deadline<T, E, F>(limit: Duration, call: F) -> Result<T, DirectoryError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<DirectoryError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(res) => res.map_err(Into::into),
        Err(_) => Err(DirectoryError::Timeout(limit)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub user_id: UserId,
    pub name: String,
    pub avatar_url: String,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn by_user_id(&self, user_id: UserId) -> Result<Profile, DirectoryError>;
}

/// A single distributed file, e.g. an installer or a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramFile {
    /// Path relative to the install directory.
    pub path: String,
    pub download_url: String,
    /// sha256, hex encoded.
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: i64,
    pub file_type: String,
    pub os: String,
    pub arch: String,
    pub branch: String,
    pub files: Vec<ProgramFile>,
}

impl Program {
    fn matches(&self, file_type: &str, os: &str, arch: &str, branch: &str) -> bool {
        self.file_type == file_type && self.os == os && self.arch == arch && self.branch == branch
    }
}

#[async_trait]
pub trait ProgramStore: Send + Sync {
    /// Files of the newest build matching all four keys.
    async fn latest_program_files(&self, file_type: &str, os: &str, arch: &str, branch: &str) -> Result<Vec<ProgramFile>, DirectoryError>;
}

#[cfg(test)]
mod directory_tests;
