//! Middleware for logging requests and responses.

use axum::{
    extract::Request,
    http::{HeaderValue, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

/// The maximum number of body bytes included in `info` level logs.
pub const LOG_BODY_LENGTH_LIMIT: usize = 64;

/// Log the request and response for each request.
///
/// Both the request and response are logged at the `info` level.
/// If a body is longer than [LOG_BODY_LENGTH_LIMIT] bytes, it is truncated and
/// the full body is logged at the `debug` level. The `Authorization` header
/// value is redacted so bearer credentials never reach the logs.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let (mut parts, body_text) = extract_parts_and_body_text_from_request(request).await;

    let credential = parts.headers.get(AUTHORIZATION).cloned();
    if credential.is_some() {
        parts
            .headers
            .insert(AUTHORIZATION, HeaderValue::from_static("********"));
    }
    log_request(&parts, &body_text);
    if let Some(credential) = credential {
        parts.headers.insert(AUTHORIZATION, credential);
    }

    let request = Request::from_parts(parts, body_text.into());
    let response = next.run(request).await;

    let (parts, body_text) = extract_parts_and_body_text_from_response(response).await;
    log_response(&parts, &body_text);

    Response::from_parts(parts, body_text.into())
}

async fn extract_parts_and_body_text_from_request(
    request: Request,
) -> (axum::http::request::Parts, String) {
    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();

    (parts, String::from_utf8_lossy(&body_bytes).to_string())
}

async fn extract_parts_and_body_text_from_response(
    response: Response,
) -> (axum::http::response::Parts, String) {
    let (parts, body) = response.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();

    (parts, String::from_utf8_lossy(&body_bytes).to_string())
}

fn log_request(parts: &axum::http::request::Parts, body: &str) {
    if body.len() > LOG_BODY_LENGTH_LIMIT {
        tracing::info!(
            "Received request: {parts:#?}\nbody: {:}...",
            &body[..LOG_BODY_LENGTH_LIMIT]
        );
        tracing::debug!("Full request body: {body:?}");
    } else {
        tracing::info!("Received request: {parts:#?}\nbody: {body:?}");
    }
}

fn log_response(parts: &axum::http::response::Parts, body: &str) {
    if body.len() > LOG_BODY_LENGTH_LIMIT {
        tracing::info!(
            "Sending response: {parts:#?}\nbody: {:}...",
            &body[..LOG_BODY_LENGTH_LIMIT]
        );
        tracing::debug!("Full response body: {body:?}");
    } else {
        tracing::info!("Sending response: {parts:#?}\nbody: {body:?}");
    }
}

#[cfg(test)]
mod logging_middleware_tests {
    use axum::{
        Router,
        extract::Request,
        http::header::AUTHORIZATION,
        middleware,
        routing::get,
    };
    use axum_test::TestServer;

    use crate::logging::logging_middleware;

    /// Echo the Authorization header so a test can check the middleware did
    /// not swallow it.
    async fn echo_credential(request: Request) -> String {
        request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_owned()
    }

    #[tokio::test]
    async fn credential_reaches_the_handler_unredacted() {
        let app = Router::new()
            .route("/echo", get(echo_credential))
            .layer(middleware::from_fn(logging_middleware));
        let server = TestServer::new(app);

        let response = server
            .get("/echo")
            .add_header("Authorization", "Bearer sesame")
            .await;

        response.assert_status_ok();
        response.assert_text("Bearer sesame");
    }
}
