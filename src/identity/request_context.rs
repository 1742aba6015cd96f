use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{header, Extensions, HeaderMap};

use crate::access::{Access, PermissionName, Roles};
use super::{Session, User};

/// Attached to the request extensions once the bearer token is accepted.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub session: Session,
    pub user: User,
    /// The user's roles, resolved in stored order.
    pub roles: Roles,
}

impl AuthContext {
    pub fn access(&self, permission: &PermissionName) -> Access { self.roles.access(permission) }
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or_default().to_string()
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Best known client address. `X-Forwarded-For` is only honoured behind a trusted proxy.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(ip) = forwarded_for(headers) { return ip; }
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}
