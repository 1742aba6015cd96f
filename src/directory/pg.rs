//! PostgreSQL directory over `tokio-postgres`.
//!
//! Expected tables (see [`SCHEMA`]): `"user"`, `profile`, `program` and
//! `activity_log`. Schema management is done outside the service;
//! [`PgDirectory::ensure_schema`] only bootstraps empty test databases.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

use crate::access::RoleId;
use crate::activity::{page_size, Activity, ActivityError, ActivityLog, ActivityStore};
use crate::identity::{ExternalIdentity, LinkedIdentity, User, UserId, UserStore};
use super::{with_deadline, DirectoryError, Profile, ProfileStore, ProgramFile, ProgramStore};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS "user" (
    id BIGSERIAL PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    roles_names TEXT[] NOT NULL DEFAULT '{}',
    discord_id TEXT NOT NULL UNIQUE,
    discord_refresh_token TEXT NOT NULL,
    email TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS profile (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL UNIQUE REFERENCES "user"(id),
    name TEXT NOT NULL,
    avatar_url TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS program (
    id BIGSERIAL PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    destroyed_at TIMESTAMPTZ,
    type VARCHAR(30) NOT NULL,
    os VARCHAR(30) NOT NULL,
    arch VARCHAR(10) NOT NULL,
    branch VARCHAR(255) NOT NULL,
    files JSONB NOT NULL
);
CREATE TABLE IF NOT EXISTS activity_log (
    id BIGSERIAL PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    user_id BIGINT NOT NULL,
    name TEXT NOT NULL,
    data JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS activity_log_user_id_id ON activity_log (user_id, id DESC);
"#;

/// Per-call deadline unless `with_timeout` says otherwise.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

const USER_COLUMNS: &str = "id, created_at, roles_names, discord_id, discord_refresh_token, email";

pub struct PgDirectory {
    client: Client,
    timeout: Duration,
}

fn user_from_row(row: &Row) -> Result<User, DirectoryError> {
    let roles: Vec<String> = row.try_get("roles_names")?;
    Ok(User {
        id: UserId(row.try_get("id")?),
        created_at: row.try_get::<_, DateTime<Utc>>("created_at")?,
        role_ids: roles.into_iter().map(RoleId).collect(),
        linked: LinkedIdentity { id: row.try_get("discord_id")?, refresh_token: row.try_get("discord_refresh_token")? },
        email: row.try_get("email")?,
    })
}

fn activity_err(e: impl std::fmt::Display) -> ActivityError { ActivityError::Storage(e.to_string()) }

impl PgDirectory {
    pub async fn connect(dsn: &str) -> Result<Self, DirectoryError> {
        let (client, connection) = tokio_postgres::connect(dsn, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(target: "directory", error = %e, "postgres connection closed");
            }
        });
        info!(target: "startup", "postgres directory connected");
        Ok(Self { client, timeout: DEFAULT_QUERY_TIMEOUT })
    }

    /// Bound every query by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn ensure_schema(&self) -> Result<(), DirectoryError> {
        with_deadline(self.timeout, self.client.batch_execute(SCHEMA)).await?;
        Ok(())
    }

    /// Insert a build row. Returns its id.
    pub async fn publish_program(&self, file_type: &str, os: &str, arch: &str, branch: &str, files: &[ProgramFile]) -> Result<i64, DirectoryError> {
        let files = serde_json::to_value(files).map_err(|e| DirectoryError::Corrupt(e.to_string()))?;
        let row = with_deadline(
            self.timeout,
            self.client.query_one(
                "INSERT INTO program (type, os, arch, branch, files) VALUES ($1, $2, $3, $4, $5) RETURNING id",
                &[&file_type, &os, &arch, &branch, &files],
            ),
        )
        .await?;
        Ok(row.try_get("id")?)
    }
}

#[async_trait]
impl UserStore for PgDirectory {
    async fn register_or_update(&self, identity: &ExternalIdentity, refresh_token: &str) -> Result<User, DirectoryError> {
        // one statement, so user and profile commit together
        let sql = format!(
            r#"WITH u AS (
                INSERT INTO "user" (discord_id, discord_refresh_token, email) VALUES ($1, $2, $3)
                ON CONFLICT (discord_id) DO UPDATE
                    SET email = EXCLUDED.email, discord_refresh_token = EXCLUDED.discord_refresh_token
                RETURNING {USER_COLUMNS}
            ), p AS (
                INSERT INTO profile (user_id, name, avatar_url) SELECT id, $4, $5 FROM u
                ON CONFLICT (user_id) DO UPDATE SET name = EXCLUDED.name, avatar_url = EXCLUDED.avatar_url
            )
            SELECT {USER_COLUMNS} FROM u"#
        );
        let email = identity.email.clone().unwrap_or_default();
        let avatar = identity.avatar_url();
        let row = with_deadline(
            self.timeout,
            self.client.query_one(sql.as_str(), &[&identity.id, &refresh_token, &email, &identity.username, &avatar]),
        )
        .await?;
        user_from_row(&row)
    }

    async fn by_id(&self, id: UserId) -> Result<User, DirectoryError> {
        let sql = format!(r#"SELECT {USER_COLUMNS} FROM "user" WHERE id = $1"#);
        match with_deadline(self.timeout, self.client.query_opt(sql.as_str(), &[&id.0])).await? {
            Some(row) => user_from_row(&row),
            None => Err(DirectoryError::UserNotFound),
        }
    }

    async fn update(&self, user: &User) -> Result<(), DirectoryError> {
        let roles: Vec<&str> = user.role_ids.iter().map(RoleId::as_str).collect();
        let n = with_deadline(
            self.timeout,
            self.client.execute(
                r#"UPDATE "user" SET roles_names = $2, discord_id = $3, discord_refresh_token = $4, email = $5 WHERE id = $1"#,
                &[&user.id.0, &roles, &user.linked.id, &user.linked.refresh_token, &user.email],
            ),
        )
        .await?;
        if n == 0 { return Err(DirectoryError::UserNotFound); }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for PgDirectory {
    async fn by_user_id(&self, user_id: UserId) -> Result<Profile, DirectoryError> {
        let row = with_deadline(
            self.timeout,
            self.client.query_opt("SELECT id, user_id, name, avatar_url FROM profile WHERE user_id = $1", &[&user_id.0]),
        )
        .await?
        .ok_or(DirectoryError::ProfileNotFound)?;
        Ok(Profile {
            id: row.try_get("id")?,
            user_id: UserId(row.try_get("user_id")?),
            name: row.try_get("name")?,
            avatar_url: row.try_get("avatar_url")?,
        })
    }
}

#[async_trait]
impl ProgramStore for PgDirectory {
    async fn latest_program_files(&self, file_type: &str, os: &str, arch: &str, branch: &str) -> Result<Vec<ProgramFile>, DirectoryError> {
        let row = with_deadline(
            self.timeout,
            self.client.query_opt(
                "SELECT files FROM program \
                 WHERE type = $1 AND os = $2 AND arch = $3 AND branch = $4 AND destroyed_at IS NULL \
                 ORDER BY id DESC LIMIT 1",
                &[&file_type, &os, &arch, &branch],
            ),
        )
        .await?
        .ok_or(DirectoryError::ProgramNotFound)?;
        let files: Value = row.try_get("files")?;
        serde_json::from_value(files).map_err(|e| DirectoryError::Corrupt(format!("program files: {e}")))
    }
}

#[async_trait]
impl ActivityStore for PgDirectory {
    async fn add_log(&self, user_id: UserId, activity: Activity) -> Result<(), ActivityError> {
        let data = Value::Object(activity.data);
        with_deadline(
            self.timeout,
            self.client.execute(
                "INSERT INTO activity_log (user_id, name, data) VALUES ($1, $2, $3)",
                &[&user_id.0, &activity.name, &data],
            ),
        )
        .await
        .map_err(activity_err)?;
        Ok(())
    }

    async fn by_user_id(&self, user_id: UserId, before_id: i64, limit: i32) -> Result<Vec<ActivityLog>, ActivityError> {
        let Some(limit) = page_size(limit)? else { return Ok(Vec::new()); };
        let rows = with_deadline(
            self.timeout,
            self.client.query(
                "SELECT id, created_at, user_id, name, data FROM activity_log \
                 WHERE user_id = $1 AND ($2::BIGINT < 0 OR id < $2) \
                 ORDER BY id DESC LIMIT $3",
                &[&user_id.0, &before_id, &(limit as i64)],
            ),
        )
        .await
        .map_err(activity_err)?;
        rows.iter()
            .map(|row| {
                let data = match row.try_get::<_, Value>("data").map_err(activity_err)? {
                    Value::Object(map) => map,
                    other => return Err(ActivityError::Storage(format!("activity data is not an object: {other}"))),
                };
                Ok(ActivityLog {
                    id: row.try_get("id").map_err(activity_err)?,
                    created_at: row.try_get("created_at").map_err(activity_err)?,
                    user_id: UserId(row.try_get("user_id").map_err(activity_err)?),
                    name: row.try_get("name").map_err(activity_err)?,
                    data,
                })
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "pg_tests.rs"]
mod pg_tests;
