use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::PeerIpKeyExtractor, GovernorError, GovernorLayer};

/// Type alias for IP-based governor layers
pub type IpGovernorLayer = GovernorLayer<
    PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    Body,
>;

/// Create a GovernorLayer for global rate limiting (per IP address)
/// - 1000 requests per minute (one token every 60ms)
/// - Applied before authentication to protect against DDoS
pub fn create_global_governor() -> IpGovernorLayer {
    let config = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(60)
            .burst_size(1000)
            .finish()
            .expect("global governor config is valid"),
    );

    GovernorLayer::new(config).error_handler(rate_limit_error_handler)
}

/// Per-IP limit for unauthenticated routes, at the passenger level
pub fn create_public_governor() -> IpGovernorLayer {
    let config = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(600 * 2)
            .burst_size(100)
            .finish()
            .expect("public governor config is valid"),
    );

    GovernorLayer::new(config).error_handler(rate_limit_error_handler)
}

/// Render governor rejections in the same JSON shape as `AppError`
pub fn rate_limit_error_handler(error: GovernorError) -> Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "rate_limited",
                    "message": format!("Too many requests, retry in {wait_time}s"),
                })),
            )
                .into_response();
            if let Some(headers) = headers {
                response.headers_mut().extend(headers);
            }
            response
        }
        GovernorError::UnableToExtractKey => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "unauthorized",
                "message": "Unable to identify the caller",
            })),
        )
            .into_response(),
        GovernorError::Other { code, msg, .. } => (
            code,
            Json(json!({
                "error": "rate_limited",
                "message": msg.unwrap_or_else(|| "Request rejected".to_string()),
            })),
        )
            .into_response(),
    }
}

/// Middleware to log rate limiting and request details
pub async fn log_request(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    tracing::debug!(client_ip = %addr.ip(), %method, %uri, "Incoming request");

    let response = next.run(request).await;
    let status = response.status();
    let latency_ms = started.elapsed().as_millis() as u64;

    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(
            client_ip = %addr.ip(),
            %method,
            %uri,
            %status,
            "RATE LIMITED - Request rejected due to too many requests"
        );
    } else if status.is_client_error() || status.is_server_error() {
        tracing::warn!(client_ip = %addr.ip(), %method, %uri, %status, latency_ms, "Request failed");
    } else {
        tracing::debug!(client_ip = %addr.ip(), %method, %uri, %status, latency_ms, "Request completed");
    }

    response
}
