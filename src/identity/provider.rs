//! External sign-in (Discord OAuth2) used to mint local sessions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::DiscordSettings;

pub const DISCORD_API: &str = "https://discord.com/api";
const OAUTH_SCOPE: &str = "email+identify+guilds.join";
const INVALID_CODE_DESCRIPTION: &str = r#"Invalid "code" in request."#;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("oauth invalid code")]
    InvalidCode,
    #[error("oauth provider rejected credentials")]
    Unauthorized,
    #[error("oauth http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oauth unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("oauth response decode: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: i64,
    pub refresh_token: String,
    pub token_type: String,
}

impl AccessTokenResponse {
    /// `Authorization` header value, e.g. `Bearer abc`.
    pub fn authorization(&self) -> String { format!("{} {}", self.token_type, self.access_token) }
}

/// The account as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "avatar")]
    pub avatar_hash: Option<String>,
}

impl ExternalIdentity {
    pub fn avatar_url(&self) -> String {
        match &self.avatar_hash {
            Some(hash) => format!("https://cdn.discordapp.com/avatars/{}/{}.png", self.id, hash),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuildJoin {
    Added,
    AlreadyMember,
    /// No guild configured.
    Skipped,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Where the browser is sent to start the login.
    fn authorize_url(&self) -> String;

    async fn exchange_code(&self, code: &str) -> Result<AccessTokenResponse, OAuthError>;

    async fn identity(&self, token: &AccessTokenResponse) -> Result<ExternalIdentity, OAuthError>;

    async fn join_guild(&self, access_token: &str, external_id: &str) -> Result<GuildJoin, OAuthError>;
}

pub struct DiscordProvider {
    client: reqwest::Client,
    settings: DiscordSettings,
    api_base: String,
}

impl DiscordProvider {
    pub fn new(settings: DiscordSettings, timeout: Duration) -> Result<Self, OAuthError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, settings, api_base: DISCORD_API.to_string() })
    }

    /// Point the provider at a different API root (used against local fakes).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

pub fn authorize_url(api_base: &str, client_id: &str, redirect_uri: &str) -> String {
    format!(
        "{}/oauth2/authorize?client_id={}&redirect_uri={}&response_type=code&scope={}",
        api_base,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        OAUTH_SCOPE,
    )
}

/// Map a failed token exchange to an error, singling out a bad or reused code.
pub fn token_exchange_error(status: u16, body: &str) -> OAuthError {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error_description: String,
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(b) if b.error_description == INVALID_CODE_DESCRIPTION => OAuthError::InvalidCode,
        _ => OAuthError::Status { status, body: body.to_string() },
    }
}

#[async_trait]
impl OAuthProvider for DiscordProvider {
    fn authorize_url(&self) -> String {
        authorize_url(&self.api_base, &self.settings.client_id, &self.settings.redirect_uri)
    }

    async fn exchange_code(&self, code: &str) -> Result<AccessTokenResponse, OAuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
        ];
        let resp = self.client.post(format!("{}/oauth2/token", self.api_base)).form(&form).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if status != StatusCode::OK {
            return Err(token_exchange_error(status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn identity(&self, token: &AccessTokenResponse) -> Result<ExternalIdentity, OAuthError> {
        let resp = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header(reqwest::header::AUTHORIZATION, token.authorization())
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        match status {
            StatusCode::OK => Ok(serde_json::from_str(&body)?),
            StatusCode::UNAUTHORIZED => Err(OAuthError::Unauthorized),
            other => Err(OAuthError::Status { status: other.as_u16(), body }),
        }
    }

    async fn join_guild(&self, access_token: &str, external_id: &str) -> Result<GuildJoin, OAuthError> {
        let Some(guild) = self.settings.guild.as_ref() else { return Ok(GuildJoin::Skipped); };
        let url = format!(
            "{}/guilds/{}/members/{}",
            self.api_base,
            urlencoding::encode(&guild.guild_id),
            urlencoding::encode(external_id),
        );
        let resp = self
            .client
            .put(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", guild.bot_token))
            .json(&serde_json::json!({ "access_token": access_token }))
            .send()
            .await?;
        let status = resp.status();
        debug!(target: "oauth", status = status.as_u16(), "guild member add");
        match status {
            StatusCode::CREATED => Ok(GuildJoin::Added),
            StatusCode::NO_CONTENT => Ok(GuildJoin::AlreadyMember),
            StatusCode::UNAUTHORIZED => Err(OAuthError::Unauthorized),
            other => Err(OAuthError::Status { status: other.as_u16(), body: resp.text().await.unwrap_or_default() }),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod provider_tests;
