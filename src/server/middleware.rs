use axum::{extract::Request, http::header, middleware::Next, response::Response};
use uuid::Uuid;

/// Request ID stored in request extensions for correlation and debugging
#[derive(Clone, Debug)]
pub struct RequestId(pub Uuid);

/// Client-facing `Host` of the inbound request, captured before any rewriting.
///
/// Lives in the request's extensions, so every request sees only its own value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginalHost(pub String);

impl OriginalHost {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Middleware that generates and injects a unique request ID for each request.
///
/// The request ID is:
/// - Generated as a UUID v4
/// - Stored in request extensions for use by handlers
/// - Added to response headers as `x-request-id` for client-side debugging
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestId(Uuid::new_v4());

    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;

    response.headers_mut().insert(
        header::HeaderName::from_static("x-request-id"),
        header::HeaderValue::from_str(&request_id.0.to_string())
            .unwrap_or_else(|_| header::HeaderValue::from_static("invalid")),
    );

    response
}

/// Middleware that records the client-facing host in request extensions.
///
/// Uses the `Host` header, falling back to the URI authority (HTTP/2 requests
/// carry `:authority` instead).
pub async fn capture_host_middleware(mut request: Request, next: Next) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default();

    request.extensions_mut().insert(OriginalHost(host));

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        extract::Extension,
        http::{Request as HttpRequest, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt; // for `oneshot`

    async fn echo_host(Extension(host): Extension<OriginalHost>) -> String {
        host.0
    }

    #[tokio::test]
    async fn test_request_id_middleware_adds_header() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(request_id_middleware));

        let request = HttpRequest::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        let request_id_header = response.headers().get("x-request-id").unwrap();
        let request_id_str = request_id_header.to_str().unwrap();
        assert!(uuid::Uuid::parse_str(request_id_str).is_ok());
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_capture_host_from_header() {
        let app = Router::new()
            .route("/", get(echo_host))
            .layer(axum::middleware::from_fn(capture_host_middleware));

        let request = HttpRequest::builder()
            .uri("/")
            .header("host", "images.example.com")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        assert_eq!(&body[..], b"images.example.com");
    }

    #[tokio::test]
    async fn test_capture_host_falls_back_to_authority() {
        let app = Router::new()
            .route("/", get(echo_host))
            .layer(axum::middleware::from_fn(capture_host_middleware));

        let request = HttpRequest::builder()
            .uri("http://registry.internal:8443/")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        assert_eq!(&body[..], b"registry.internal:8443");
    }

    #[tokio::test]
    async fn test_captured_host_is_per_request() {
        let app = Router::new()
            .route("/", get(echo_host))
            .layer(axum::middleware::from_fn(capture_host_middleware));

        for host in ["a.example.com", "b.example.com"] {
            let request = HttpRequest::builder()
                .uri("/")
                .header("host", host)
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            let body = axum::body::to_bytes(response.into_body(), 1024)
                .await
                .unwrap();
            assert_eq!(&body[..], host.as_bytes());
        }
    }
}
