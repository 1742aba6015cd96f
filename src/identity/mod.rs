//! Identity: users, login sessions, the external sign-in provider and the
//! request authorization middleware built on them.
//! Keep the public surface thin and split implementation across sub-modules.

mod user;
mod session;
mod provider;
mod request_context;
mod authorizer;

pub use user::{LinkedIdentity, User, UserId, UserStore};
pub use session::{generate_session_token, KvSessionStore, Session, SessionError, SessionStore, DEFAULT_SESSION_TTL, SESSION_BY_ID_PREFIX, SESSION_PREFIX};
pub use provider::{authorize_url, AccessTokenResponse, DiscordProvider, ExternalIdentity, GuildJoin, OAuthError, OAuthProvider, DISCORD_API};
pub use request_context::{client_ip, user_agent, AuthContext};
pub use authorizer::{authorize, extract_bearer, require_permission, Authorizer, Credential};
