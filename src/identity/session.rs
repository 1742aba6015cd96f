//! Login sessions kept in the embedded KV store.
//!
//! Every session lives under two keys written in the same transaction with
//! the same TTL:
//!
//! * `session:{token}` holds the JSON encoded [`Session`]
//! * `session_by_id:{id}` holds the token, so a session can be revoked by
//!   its public id without ever exposing the token
//!
//! Both keys are created, refreshed and deleted together.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activity::{Activity, ActivityError, ActivityStore, SESSION_CHANGED_IP, SESSION_CHANGED_USER_AGENT, SESSION_CREATED};
use crate::storage::{KvError, KvRead, KvStore};
use super::user::UserId;

pub const SESSION_PREFIX: &str = "session:";
pub const SESSION_BY_ID_PREFIX: &str = "session_by_id:";
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const TOKEN_BYTES: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: UserId,
    pub token: String,
    pub ip: String,
    pub user_agent: String,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session {session_id} is not owned by user {required} (owner {found})")]
    WrongOwner { session_id: String, required: UserId, found: UserId },
    #[error("session id collision: {0}")]
    IdCollision(String),
    #[error("generate token: {0}")]
    Token(String),
    #[error("kv: {0}")]
    Kv(KvError),
    #[error("session serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("activity log: {0}")]
    Activity(#[from] ActivityError),
}

impl From<KvError> for SessionError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::NotFound => SessionError::NotFound,
            other => SessionError::Kv(other),
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a new session for `user_id`. A `session_created` activity is
    /// recorded before anything is stored.
    async fn register_new(&self, user_id: UserId, ip: &str, user_agent: &str) -> Result<Session, SessionError>;

    fn by_token(&self, token: &str) -> Result<Session, SessionError>;

    fn exists(&self, token: &str) -> Result<bool, SessionError>;

    /// Live sessions owned by the owner of `anchor_token`, most recently used first.
    fn active_sessions(&self, anchor_token: &str) -> Result<Vec<Session>, SessionError>;

    /// Slide the expiry of a session and record ip / user agent changes.
    async fn acquire_and_refresh(&self, token: &str, ip: &str, user_agent: &str) -> Result<Session, SessionError>;

    /// Revoke a session by its public id. Fails with `WrongOwner` (and
    /// changes nothing) when the session belongs to someone else.
    fn invalidate_by_id(&self, user_id: UserId, session_id: &str) -> Result<(), SessionError>;

    fn invalidate_by_auth_token(&self, token: &str) -> Result<(), SessionError>;

    /// Revoke every other session of the owner of `keep_token`. Returns the number revoked.
    fn invalidate_all_except(&self, keep_token: &str) -> Result<usize, SessionError>;
}

/// URL safe random token. `:` never appears since it separates key namespaces.
pub fn generate_session_token() -> Result<String, SessionError> {
    let mut buf = [0u8; TOKEN_BYTES];
    getrandom::getrandom(&mut buf).map_err(|e| SessionError::Token(e.to_string()))?;
    let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf);
    Ok(token.replace(':', "_"))
}

fn token_key(token: &str) -> String { format!("{SESSION_PREFIX}{token}") }
fn id_key(id: &str) -> String { format!("{SESSION_BY_ID_PREFIX}{id}") }

fn read_session(tx: &impl KvRead, token: &str) -> Result<Session, SessionError> {
    let raw = tx.get(&token_key(token))?;
    Ok(serde_json::from_str(&raw)?)
}

fn sessions_of(tx: &impl KvRead, owner: UserId) -> Result<Vec<Session>, SessionError> {
    let mut out = Vec::new();
    let mut bad: Option<serde_json::Error> = None;
    tx.ascend_prefix(SESSION_PREFIX, |_, raw| match serde_json::from_str::<Session>(raw) {
        Ok(s) => {
            if s.user_id == owner { out.push(s); }
            true
        }
        Err(e) => {
            bad = Some(e);
            false
        }
    });
    match bad {
        Some(e) => Err(e.into()),
        None => Ok(out),
    }
}

pub struct KvSessionStore {
    kv: KvStore,
    activity: Arc<dyn ActivityStore>,
    ttl: Duration,
}

impl KvSessionStore {
    pub fn new(kv: KvStore, activity: Arc<dyn ActivityStore>, ttl: Duration) -> Self {
        Self { kv, activity, ttl }
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::milliseconds(self.ttl.as_millis() as i64)
    }
}

#[async_trait]
impl SessionStore for KvSessionStore {
    async fn register_new(&self, user_id: UserId, ip: &str, user_agent: &str) -> Result<Session, SessionError> {
        let token = generate_session_token()?;
        let id = Uuid::new_v4().to_string();

        let created = Activity::new(SESSION_CREATED)
            .with("ip", ip)
            .with("userAgent", user_agent)
            .with("session_id", id.as_str());
        self.activity.add_log(user_id, created).await?;

        let now = Utc::now();
        let session = Session {
            id,
            user_id,
            token,
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            last_accessed_at: now,
            expires_at: self.expiry_from(now),
        };
        let serialized = serde_json::to_string(&session)?;
        let ttl = Some(self.ttl);
        self.kv.update(|tx| {
            if tx.set(id_key(&session.id), session.token.as_str(), ttl)? {
                return Err(SessionError::IdCollision(session.id.clone()));
            }
            tx.set(token_key(&session.token), serialized, ttl)?;
            Ok::<_, SessionError>(())
        })?;
        debug!(target: "session", user_id = %user_id, session_id = %session.id, "session registered");
        Ok(session)
    }

    fn by_token(&self, token: &str) -> Result<Session, SessionError> {
        self.kv.view(|tx| read_session(tx, token))
    }

    fn exists(&self, token: &str) -> Result<bool, SessionError> {
        match self.kv.view(|tx| tx.get(&token_key(token))) {
            Ok(_) => Ok(true),
            Err(KvError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn active_sessions(&self, anchor_token: &str) -> Result<Vec<Session>, SessionError> {
        let mut sessions = self.kv.view(|tx| {
            let anchor = read_session(tx, anchor_token)?;
            sessions_of(tx, anchor.user_id)
        })?;
        sessions.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        Ok(sessions)
    }

    async fn acquire_and_refresh(&self, token: &str, ip: &str, user_agent: &str) -> Result<Session, SessionError> {
        let previous = self.by_token(token)?;
        let now = Utc::now();
        let session = Session {
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            last_accessed_at: now,
            expires_at: self.expiry_from(now),
            ..previous.clone()
        };

        // audit entries are written before the session changes
        if previous.ip != session.ip {
            let changed = Activity::new(SESSION_CHANGED_IP)
                .with("session_id", session.id.as_str())
                .with("previous_ip", previous.ip.as_str())
                .with("new_ip", session.ip.as_str());
            self.activity.add_log(session.user_id, changed).await?;
        }
        if previous.user_agent != session.user_agent {
            let changed = Activity::new(SESSION_CHANGED_USER_AGENT)
                .with("session_id", session.id.as_str())
                .with("previous_user_agent", previous.user_agent.as_str())
                .with("new_user_agent", session.user_agent.as_str());
            self.activity.add_log(session.user_id, changed).await?;
        }

        let serialized = serde_json::to_string(&session)?;
        let ttl = Some(self.ttl);
        self.kv.update(|tx| {
            // revoked while the audit entries were written
            tx.get(&token_key(token))?;
            tx.set(token_key(token), serialized, ttl)?;
            tx.set(id_key(&session.id), token, ttl)?;
            Ok::<_, SessionError>(())
        })?;
        Ok(session)
    }

    fn invalidate_by_id(&self, user_id: UserId, session_id: &str) -> Result<(), SessionError> {
        self.kv.update(|tx| {
            let token = tx.get(&id_key(session_id))?;
            let raw = tx.delete(&token_key(&token))?;
            let session: Session = serde_json::from_str(&raw)?;
            if session.user_id != user_id {
                return Err(SessionError::WrongOwner { session_id: session_id.to_string(), required: user_id, found: session.user_id });
            }
            tx.delete(&id_key(session_id))?;
            Ok(())
        })
    }

    fn invalidate_by_auth_token(&self, token: &str) -> Result<(), SessionError> {
        self.kv.update(|tx| {
            let raw = tx.delete(&token_key(token))?;
            let session: Session = serde_json::from_str(&raw)?;
            match tx.delete(&id_key(&session.id)) {
                Ok(_) => Ok(()),
                Err(KvError::NotFound) => {
                    warn!(target: "session", session_id = %session.id, "session id index already gone");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn invalidate_all_except(&self, keep_token: &str) -> Result<usize, SessionError> {
        self.kv.update(|tx| {
            let keep = read_session(&*tx, keep_token)?;
            let doomed: Vec<Session> = sessions_of(&*tx, keep.user_id)?
                .into_iter()
                .filter(|s| s.token != keep.token)
                .collect();
            for s in &doomed {
                tx.delete(&token_key(&s.token))?;
                match tx.delete(&id_key(&s.id)) {
                    Ok(_) => {}
                    Err(KvError::NotFound) => {
                        warn!(target: "session", session_id = %s.id, "session id index already gone");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(doomed.len())
        })
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
