use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Duration;
use jsonwebtoken::{encode, EncodingKey, Header};
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use tower::ServiceExt;

use quickseat_backend::{
    auth::AuthorizationGate,
    booking::{BookingLedger, FareCalculator, InMemoryBookingStore},
    config::Config,
    routes,
    services::directions::StaticRouteTable,
    services::identity::{IdentityProvider, LocalIdentityProvider},
    services::payments::InMemoryPayments,
    utils::{clock::SystemClock, jwt},
    AppState,
};

fn app(provider: Arc<LocalIdentityProvider>) -> Router {
    let config = Config::for_tests();
    let ledger = BookingLedger::new(
        Arc::new(SystemClock),
        Arc::new(InMemoryBookingStore::new()),
        Arc::new(InMemoryPayments::new()),
        Duration::minutes(10),
        StdDuration::from_secs(1),
    );

    let state = AppState {
        db: DatabaseConnection::Disconnected,
        gate: Arc::new(AuthorizationGate::new(provider, StdDuration::from_secs(1))),
        ledger: Arc::new(ledger),
        fares: FareCalculator::new(config.service_fee),
        directions: Arc::new(StaticRouteTable::new()),
        config,
    };

    routes::create_router(state)
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(body) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };

    let mut request = builder.body(body).unwrap();
    // The IP governors key on the peer address
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    request
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn provider() -> Arc<LocalIdentityProvider> {
    Arc::new(LocalIdentityProvider::new("test-secret", 1))
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(app(provider()), request(Method::GET, "/health", None, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = app(provider());

    let (status, body) = send(app.clone(), request(Method::GET, "/api/auth/me", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(app.clone(), request(Method::GET, "/api/buses", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(app, request(Method::GET, "/api/admin/users", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_lock_without_token_is_unauthorized() {
    let uri = format!("/api/trips/{}/seats/A3/lock", uuid::Uuid::new_v4());
    let (status, _) = send(app(provider()), request(Method::POST, &uri, None, None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_garbage_token_is_invalid() {
    let (status, body) = send(
        app(provider()),
        request(Method::GET, "/api/bookings", Some("not.a.jwt"), None),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn test_expired_token_is_invalid() {
    let token = jwt::create_token("u1", None, false, "test-secret", -2).unwrap();
    let (status, body) = send(
        app(provider()),
        request(Method::GET, "/api/auth/me", Some(&token), None),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_invalid() {
    let token = jwt::create_token("u1", None, false, "someone-else", 1).unwrap();
    let (status, _) = send(
        app(provider()),
        request(Method::POST, "/api/auth/verify", Some(&token), None),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revoked_token_is_rejected() {
    let provider = provider();
    let token = provider.issue("u1", Some("u1@example.com")).unwrap();
    provider.revoke_sessions("u1").await.unwrap();

    let (status, body) = send(
        app(provider),
        request(Method::GET, "/api/bookings", Some(&token), None),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn test_webhook_with_bad_signature_is_rejected() {
    let forged = encode(
        &Header::default(),
        &json!({ "reference": "pay-1", "uid": "u1", "amount": 500, "status": "succeeded" }),
        &EncodingKey::from_secret(b"not-the-webhook-secret"),
    )
    .unwrap();

    let (status, body) = send(
        app(provider()),
        request(
            Method::POST,
            "/api/payments/webhook",
            None,
            Some(json!({ "token": forged })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}
