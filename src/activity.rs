//! Per-user audit trail of security relevant events.
//!
//! Logs are append-only and carry a store-assigned, monotonically increasing
//! id. Pages are read newest first using the id of the last item seen as the
//! cursor.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::identity::UserId;

pub const SESSION_CREATED: &str = "session_created";
pub const SESSION_CHANGED_IP: &str = "session_changed_ip";
pub const SESSION_CHANGED_USER_AGENT: &str = "session_changed_user_agent";

/// Largest page a store will return in one call.
pub const MAX_PAGE_LIMIT: i32 = 10_000;

/// Cursor value meaning "start from the newest entry".
pub const NO_CURSOR: i64 = -1;

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("too big limit {limit}/{max}")]
    LimitTooLarge { limit: i32, max: i32 },
    #[error("activity storage: {0}")]
    Storage(String),
}

/// An event about to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub name: String,
    pub data: Map<String, Value>,
}

impl Activity {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into(), data: Map::new() } }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
    pub name: String,
    pub data: Map<String, Value>,
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn add_log(&self, user_id: UserId, activity: Activity) -> Result<(), ActivityError>;

    /// Up to `limit` logs of `user_id` with id strictly below `before_id`,
    /// newest first. A negative `before_id` starts from the newest log.
    async fn by_user_id(&self, user_id: UserId, before_id: i64, limit: i32) -> Result<Vec<ActivityLog>, ActivityError>;
}

/// Validate a page size. `Ok(None)` means the page is trivially empty.
pub fn page_size(limit: i32) -> Result<Option<usize>, ActivityError> {
    if limit > MAX_PAGE_LIMIT {
        return Err(ActivityError::LimitTooLarge { limit, max: MAX_PAGE_LIMIT });
    }
    if limit <= 0 { return Ok(None); }
    Ok(Some(limit as usize))
}

#[derive(Default)]
struct Logs {
    last_id: i64,
    by_user: HashMap<UserId, Vec<ActivityLog>>,
}

/// Process-local activity store. Ids start at 1.
#[derive(Default)]
pub struct MemoryActivityStore {
    inner: Mutex<Logs>,
}

impl MemoryActivityStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn add_log(&self, user_id: UserId, activity: Activity) -> Result<(), ActivityError> {
        let mut g = self.inner.lock();
        g.last_id += 1;
        let log = ActivityLog { id: g.last_id, created_at: Utc::now(), user_id, name: activity.name, data: activity.data };
        g.by_user.entry(user_id).or_default().push(log);
        Ok(())
    }

    async fn by_user_id(&self, user_id: UserId, before_id: i64, limit: i32) -> Result<Vec<ActivityLog>, ActivityError> {
        let Some(limit) = page_size(limit)? else { return Ok(Vec::new()); };
        let g = self.inner.lock();
        let Some(logs) = g.by_user.get(&user_id) else { return Ok(Vec::new()); };
        // logs are appended in id order
        let end = if before_id < 0 { logs.len() } else { logs.partition_point(|l| l.id < before_id) };
        let start = end.saturating_sub(limit);
        Ok(logs[start..end].iter().rev().cloned().collect())
    }
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod activity_tests;
