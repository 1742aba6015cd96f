//!
//! depot server binary
//! -------------------
//! Command-line entry point for the depot HTTP API. Settings come from
//! environment variables, with CLI flags taking precedence.

use anyhow::Result;
use std::env;

use depot::config::{has_flag, ServerConfig};

const USAGE: &str = "depot Server

USAGE:
  depot_server [--http-port N] [--data-dir PATH] [--postgres DSN] [--debug]

OPTIONS:
  --http-port N       HTTP API port (env: DEPOT_HTTP_PORT, default 2137)
  --data-dir PATH     Session store folder (env: DEPOT_DATA_DIR, default data)
  --postgres DSN      Directory database (env: POSTGRES_DSN). In-memory when unset.
  --debug             Bind to 127.0.0.1 only (env: DEBUG)

ENVIRONMENT:
  DISCORD_CLIENT_ID, DISCORD_CLIENT_SECRET, DISCORD_AUTH_URI   required
  DISCORD_GUILD_ID, DISCORD_BOT_TOKEN                          optional guild join
  DEPOT_SESSION_TTL_DAYS                                       30..=60, default 30
  DEPOT_TRUST_FORWARDED_FOR                                    honour X-Forwarded-For
  RUST_LOG                                                     log filter, default info
";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let config = ServerConfig::from_env_and_args(&args)?;
    tracing::info!("depot starting on port {}", config.http_port);
    depot::server::run(config).await
}
