//! Roles, permissions and three-valued access resolution.
//!
//! A user carries an ordered list of roles. Each role either grants a
//! permission, forbids it, or says nothing about it. Roles are folded left to
//! right: a later defined verdict overrides an earlier one, while a role that
//! says nothing never overrides anything.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Undefined,
    Forbidden,
    Allowed,
}

impl Access {
    /// Fold `next` into `self`: an undefined side yields the other side,
    /// otherwise the later (right-hand) verdict wins.
    pub fn merge(self, next: Access) -> Access {
        match (self, next) {
            (current, Access::Undefined) => current,
            (_, defined) => defined,
        }
    }

    pub fn is_allowed(self) -> bool { self == Access::Allowed }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionName(pub String);

impl PermissionName {
    pub fn new(name: impl Into<String>) -> Self { Self(name.into()) }
    pub fn download_pro() -> Self { Self::new("download.pro") }
    pub fn admin_dashboard() -> Self { Self::new("admin.dashboard") }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
    pub fn admin() -> Self { Self::new("admin") }
    pub fn pro() -> Self { Self::new("pro") }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub permissions: HashMap<PermissionName, bool>,
}

impl Role {
    pub fn new(id: RoleId) -> Self { Self { id, permissions: HashMap::new() } }

    pub fn grant(mut self, permission: PermissionName, allowed: bool) -> Self {
        self.permissions.insert(permission, allowed);
        self
    }

    pub fn access(&self, permission: &PermissionName) -> Access {
        match self.permissions.get(permission) {
            None => Access::Undefined,
            Some(true) => Access::Allowed,
            Some(false) => Access::Forbidden,
        }
    }
}

/// Ordered role list. Order matters: later roles override earlier verdicts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roles(pub Vec<Role>);

impl Roles {
    pub fn access(&self, permission: &PermissionName) -> Access {
        self.0.iter().fold(Access::Undefined, |acc, role| acc.merge(role.access(permission)))
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoleRegistryError {
    #[error("duplicated role id: `{0}`")]
    DuplicateRole(RoleId),
}

/// Immutable id-keyed role table built once at startup.
#[derive(Debug)]
pub struct RoleRegistry {
    roles: HashMap<RoleId, Role>,
    dropped: AtomicU64,
}

impl RoleRegistry {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Result<Self, RoleRegistryError> {
        let mut map = HashMap::new();
        for role in roles {
            if map.contains_key(&role.id) {
                return Err(RoleRegistryError::DuplicateRole(role.id));
            }
            map.insert(role.id.clone(), role);
        }
        Ok(Self { roles: map, dropped: AtomicU64::new(0) })
    }

    /// The roles shipped with the service: `admin` and `pro`.
    pub fn builtin() -> Result<Self, RoleRegistryError> {
        Self::new([
            Role::new(RoleId::admin())
                .grant(PermissionName::download_pro(), true)
                .grant(PermissionName::admin_dashboard(), true),
            Role::new(RoleId::pro())
                .grant(PermissionName::download_pro(), true),
        ])
    }

    pub fn get(&self, id: &RoleId) -> Option<&Role> { self.roles.get(id) }

    /// Resolve stored role ids in order. Ids missing from the registry are
    /// skipped, logged and counted.
    pub fn resolve(&self, ids: &[RoleId]) -> Roles {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.roles.get(id) {
                Some(role) => out.push(role.clone()),
                None => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(role_id = %id, "unknown role id dropped during role resolution");
                }
            }
        }
        Roles(out)
    }

    /// Total unknown role ids skipped by `resolve` since startup.
    pub fn dropped_role_ids(&self) -> u64 { self.dropped.load(Ordering::Relaxed) }

    pub fn len(&self) -> usize { self.roles.len() }
    pub fn is_empty(&self) -> bool { self.roles.is_empty() }
}

#[cfg(test)]
#[path = "access_tests.rs"]
mod access_tests;
