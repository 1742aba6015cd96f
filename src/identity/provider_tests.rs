use super::*;

#[test]
fn authorize_url_carries_client_redirect_and_scope() {
    let cases = [
        ("2115", "https://depot.example/discord_login",
         "https://discord.com/api/oauth2/authorize?client_id=2115&redirect_uri=https%3A%2F%2Fdepot.example%2Fdiscord_login&response_type=code&scope=email+identify+guilds.join"),
        ("3721", "https://depot.example/discord",
         "https://discord.com/api/oauth2/authorize?client_id=3721&redirect_uri=https%3A%2F%2Fdepot.example%2Fdiscord&response_type=code&scope=email+identify+guilds.join"),
    ];
    for (i, (client_id, redirect, expected)) in cases.into_iter().enumerate() {
        assert_eq!(authorize_url(DISCORD_API, client_id, redirect), expected, "case {}", i);
    }
}

#[test]
fn invalid_code_is_recognised() {
    let body = r#"{"error":"invalid_grant","error_description":"Invalid \"code\" in request."}"#;
    assert!(matches!(token_exchange_error(400, body), OAuthError::InvalidCode));

    let other = r#"{"error":"invalid_client","error_description":"Unknown client"}"#;
    assert!(matches!(token_exchange_error(401, other), OAuthError::Status { status: 401, .. }));
    assert!(matches!(token_exchange_error(502, "<html>bad gateway</html>"), OAuthError::Status { status: 502, .. }));
}

#[test]
fn identity_decodes_discord_user() {
    let raw = r#"{"id":"80351110224678912","username":"Nelly","email":"nelly@example.com","avatar":"8342729096ea3675442027381ff50dfe","verified":true}"#;
    let id: ExternalIdentity = serde_json::from_str(raw).unwrap();
    assert_eq!(id.email.as_deref(), Some("nelly@example.com"));
    assert_eq!(id.avatar_url(), "https://cdn.discordapp.com/avatars/80351110224678912/8342729096ea3675442027381ff50dfe.png");

    let bare: ExternalIdentity = serde_json::from_str(r#"{"id":"1","username":"x","avatar":null}"#).unwrap();
    assert_eq!(bare.email, None);
    assert_eq!(bare.avatar_url(), "");
}

#[test]
fn token_authorization_header() {
    let t = AccessTokenResponse { access_token: "abc".into(), expires_in: 10, refresh_token: "r".into(), token_type: "Bearer".into() };
    assert_eq!(t.authorization(), "Bearer abc");
}
