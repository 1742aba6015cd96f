use super::*;

#[test]
fn http_status_mapping() {
    assert_eq!(AppError::user("oops").http_status(), 400);
    assert_eq!(AppError::auth("no").http_status(), 401);
    assert_eq!(AppError::forbidden("not yours").http_status(), 403);
    assert_eq!(AppError::not_found("missing").http_status(), 404);
    assert_eq!(AppError::server("ctx", "boom").http_status(), 500);
}

#[test]
fn server_errors_hide_details() {
    let e = AppError::server("select user", "relation \"user\" does not exist at character 15");
    assert_eq!(e.message(), GENERIC_SERVER_ERROR);
    assert!(!e.to_string().contains("relation"));
}

#[tokio::test]
async fn response_body_shape() {
    let resp = AppError::user("invalid auth type").into_response();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
    let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body.error_message, "invalid auth type");
}
