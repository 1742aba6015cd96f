use axum::http::HeaderValue;

use super::*;

fn headers(auth: Option<&str>) -> HeaderMap {
    let mut h = HeaderMap::new();
    if let Some(v) = auth {
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(v).unwrap());
    }
    h
}

#[test]
fn bearer_extraction_classifies_headers() {
    assert_eq!(extract_bearer(&headers(None)), Credential::Missing);
    assert_eq!(extract_bearer(&headers(Some(""))), Credential::Missing);
    assert_eq!(extract_bearer(&headers(Some("Basic dXNlcjpwYXNz"))), Credential::WrongScheme);
    assert_eq!(extract_bearer(&headers(Some("bearer abc"))), Credential::WrongScheme);
    assert_eq!(extract_bearer(&headers(Some("Bearer abc"))), Credential::Bearer("abc"));
    assert_eq!(extract_bearer(&headers(Some("Bearer "))), Credential::Bearer(""));
}

#[test]
fn forwarded_for_needs_trust() {
    let req = Request::builder()
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(Body::empty())
        .unwrap();
    assert_eq!(client_ip(req.headers(), req.extensions(), true), "203.0.113.7");
    assert_eq!(client_ip(req.headers(), req.extensions(), false), "");

    let mut req = req;
    req.extensions_mut().insert(axum::extract::ConnectInfo(std::net::SocketAddr::from(([192, 0, 2, 1], 4711))));
    assert_eq!(client_ip(req.headers(), req.extensions(), false), "192.0.2.1");
}
