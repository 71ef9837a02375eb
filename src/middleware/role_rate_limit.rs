use axum::http::Request;
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder,
    key_extractor::KeyExtractor,
    GovernorError, GovernorLayer,
};

use crate::auth::Identity;
use crate::middleware::rate_limit::rate_limit_error_handler;

/// Key extractor that reads the uid of the `Identity` set by `auth_middleware`
#[derive(Debug, Clone, Copy)]
pub struct UserIdExtractor;

impl KeyExtractor for UserIdExtractor {
    type Key = String;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        req.extensions()
            .get::<Identity>()
            .map(|identity| identity.uid.clone())
            .ok_or(GovernorError::UnableToExtractKey)
    }
}

pub type RoleGovernorLayer = GovernorLayer<
    UserIdExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Route groups that get a per-uid limit. Admin routes have none.
#[derive(Debug, Clone, Copy)]
pub enum RateLimitedRole {
    Passenger,
    Operator,
}

/// - Operator: 250 requests per minute
/// - Passenger: 50 requests per minute
pub fn create_role_governor(role: RateLimitedRole) -> RoleGovernorLayer {
    let (per_ms, burst) = match role {
        RateLimitedRole::Operator => (120 * 2, 500),
        RateLimitedRole::Passenger => (600 * 2, 100),
    };

    let config = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(per_ms)
            .burst_size(burst)
            .key_extractor(UserIdExtractor)
            .finish()
            .expect("role governor config is valid"),
    );

    GovernorLayer::new(config).error_handler(rate_limit_error_handler)
}
