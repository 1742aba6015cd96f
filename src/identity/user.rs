use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::{RoleId, RoleRegistry, Roles};
use crate::directory::DirectoryError;
use super::provider::ExternalIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// The external account a user signed in with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedIdentity {
    pub id: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
    /// Stored in priority order; resolved against the registry on read.
    pub role_ids: Vec<RoleId>,
    pub linked: LinkedIdentity,
    pub email: String,
}

impl User {
    pub fn roles(&self, registry: &RoleRegistry) -> Roles { registry.resolve(&self.role_ids) }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create the user on first sign in, otherwise refresh email and refresh
    /// token. The user's public profile is upserted alongside.
    async fn register_or_update(&self, identity: &ExternalIdentity, refresh_token: &str) -> Result<User, DirectoryError>;

    async fn by_id(&self, id: UserId) -> Result<User, DirectoryError>;

    async fn update(&self, user: &User) -> Result<(), DirectoryError>;
}
