//!
//! depot configuration
//! -------------------
//! Defaults, overridden by environment variables, overridden by CLI flags.
//! Lookups go through a closure so tests never touch the process environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_HTTP_PORT: u16 = 2137;
pub const DEFAULT_SESSION_TTL_DAYS: u64 = 30;
pub const SESSION_TTL_DAYS_RANGE: std::ops::RangeInclusive<u64> = 30..=60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSettings {
    pub guild_id: String,
    pub bot_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Guild joined on sign in. `None` disables the join step.
    pub guild: Option<GuildSettings>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    /// Bind to loopback only.
    pub debug: bool,
    pub data_dir: PathBuf,
    pub snapshot_interval_ms: u64,
    pub session_ttl: Duration,
    pub postgres_dsn: Option<String>,
    /// Take the client address from `X-Forwarded-For` (behind a reverse proxy).
    pub trust_forwarded_for: bool,
    pub discord: DiscordSettings,
    pub outbound_timeout: Duration,
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        i += 1;
    }
    None
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn parse_num<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(v) => Ok(Some(v.trim().parse::<T>().with_context(|| format!("invalid {name}: {v:?}"))?)),
        None => Ok(None),
    }
}

fn required(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    match env(name) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("missing required setting {name}"),
    }
}

impl ServerConfig {
    /// Build from CLI `args` and an environment lookup.
    pub fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_http = parse_num::<u16>("DEPOT_HTTP_PORT", env("DEPOT_HTTP_PORT"))?;
        let arg_http = parse_num::<u16>("--http-port", arg_value(args, "--http-port").map(str::to_string))?;
        let http_port = arg_http.or(env_http).unwrap_or(DEFAULT_HTTP_PORT);

        let debug = has_flag(args, "--debug") || env("DEBUG").and_then(|v| parse_bool(&v)).unwrap_or(false);

        let data_dir = arg_value(args, "--data-dir")
            .map(str::to_string)
            .or_else(|| env("DEPOT_DATA_DIR"))
            .unwrap_or_else(|| "data".to_string());

        let snapshot_interval_ms = parse_num::<u64>("DEPOT_KV_SNAPSHOT_MS", env("DEPOT_KV_SNAPSHOT_MS"))?.unwrap_or(5_000);

        let ttl_days = parse_num::<u64>("DEPOT_SESSION_TTL_DAYS", env("DEPOT_SESSION_TTL_DAYS"))?.unwrap_or(DEFAULT_SESSION_TTL_DAYS);
        if !SESSION_TTL_DAYS_RANGE.contains(&ttl_days) {
            bail!("DEPOT_SESSION_TTL_DAYS must be within 30..=60 days, got {ttl_days}");
        }

        let postgres_dsn = arg_value(args, "--postgres").map(str::to_string).or_else(|| env("POSTGRES_DSN"));
        let trust_forwarded_for = env("DEPOT_TRUST_FORWARDED_FOR").and_then(|v| parse_bool(&v)).unwrap_or(false);

        let guild = match (env("DISCORD_GUILD_ID"), env("DISCORD_BOT_TOKEN")) {
            (Some(guild_id), Some(bot_token)) => Some(GuildSettings { guild_id, bot_token }),
            (None, None) => None,
            _ => bail!("DISCORD_GUILD_ID and DISCORD_BOT_TOKEN must be set together"),
        };
        let discord = DiscordSettings {
            client_id: required(&env, "DISCORD_CLIENT_ID")?,
            client_secret: required(&env, "DISCORD_CLIENT_SECRET")?,
            redirect_uri: required(&env, "DISCORD_AUTH_URI")?,
            guild,
        };

        let timeout_secs = parse_num::<u64>("DEPOT_OUTBOUND_TIMEOUT_SECS", env("DEPOT_OUTBOUND_TIMEOUT_SECS"))?.unwrap_or(10);

        Ok(Self {
            http_port,
            debug,
            data_dir: PathBuf::from(data_dir),
            snapshot_interval_ms,
            session_ttl: Duration::from_secs(ttl_days * 24 * 60 * 60),
            postgres_dsn,
            trust_forwarded_for,
            discord,
            outbound_timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }

    pub fn from_env_and_args(args: &[String]) -> Result<Self> {
        Self::from_sources(args, |name| std::env::var(name).ok())
    }

    pub fn bind_host(&self) -> &'static str {
        if self.debug { "127.0.0.1" } else { "0.0.0.0" }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
