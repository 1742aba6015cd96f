use std::collections::HashMap;

use super::*;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |name| map.get(name).cloned()
}

const DISCORD: [(&str, &str); 3] = [
    ("DISCORD_CLIENT_ID", "id"),
    ("DISCORD_CLIENT_SECRET", "secret"),
    ("DISCORD_AUTH_URI", "https://depot.example/login"),
];

fn args(list: &[&str]) -> Vec<String> { list.iter().map(|s| s.to_string()).collect() }

#[test]
fn defaults_apply() {
    let cfg = ServerConfig::from_sources(&[], env_of(&DISCORD)).unwrap();
    assert_eq!(cfg.http_port, DEFAULT_HTTP_PORT);
    assert!(!cfg.debug);
    assert_eq!(cfg.bind_host(), "0.0.0.0");
    assert_eq!(cfg.data_dir, PathBuf::from("data"));
    assert_eq!(cfg.session_ttl, Duration::from_secs(30 * 86_400));
    assert_eq!(cfg.postgres_dsn, None);
    assert_eq!(cfg.discord.guild, None);
    assert_eq!(cfg.outbound_timeout, Duration::from_secs(10));
}

#[test]
fn flags_override_env() {
    let mut pairs = DISCORD.to_vec();
    pairs.extend([("DEPOT_HTTP_PORT", "9000"), ("DEPOT_DATA_DIR", "/env"), ("POSTGRES_DSN", "postgres://env")]);
    let cfg = ServerConfig::from_sources(
        &args(&["depot_server", "--http-port", "9100", "--data-dir", "/flag", "--debug"]),
        env_of(&pairs),
    ).unwrap();
    assert_eq!(cfg.http_port, 9100);
    assert_eq!(cfg.data_dir, PathBuf::from("/flag"));
    assert_eq!(cfg.postgres_dsn.as_deref(), Some("postgres://env"));
    assert_eq!(cfg.bind_host(), "127.0.0.1");
}

#[test]
fn session_ttl_is_bounded() {
    for (days, ok) in [("29", false), ("30", true), ("45", true), ("60", true), ("61", false), ("x", false)] {
        let mut pairs = DISCORD.to_vec();
        pairs.push(("DEPOT_SESSION_TTL_DAYS", days));
        assert_eq!(ServerConfig::from_sources(&[], env_of(&pairs)).is_ok(), ok, "ttl {}", days);
    }
}

#[test]
fn oauth_settings_are_required_and_guild_is_paired() {
    let err = ServerConfig::from_sources(&[], env_of(&DISCORD[..2])).unwrap_err();
    assert!(err.to_string().contains("DISCORD_AUTH_URI"));

    let mut half = DISCORD.to_vec();
    half.push(("DISCORD_GUILD_ID", "g"));
    assert!(ServerConfig::from_sources(&[], env_of(&half)).is_err());

    half.push(("DISCORD_BOT_TOKEN", "b"));
    let cfg = ServerConfig::from_sources(&[], env_of(&half)).unwrap();
    assert_eq!(cfg.discord.guild, Some(GuildSettings { guild_id: "g".into(), bot_token: "b".into() }));
}
