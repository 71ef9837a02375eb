use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeaderRejection,
    TypedHeader,
};
use sea_orm::EntityTrait;

use crate::auth::Identity;
use crate::entities::user;
use crate::error::{AppError, AppResult};
use crate::AppState;

/// Verify the bearer token and attach the caller's `Identity` to the request
pub async fn auth_middleware(
    State(state): State<AppState>,
    auth: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut request: Request,
    next: Next,
) -> AppResult<Response> {
    // A missing or malformed header is an authentication failure, not a bad request
    let TypedHeader(auth) =
        auth.map_err(|_| AppError::Unauthorized("Missing bearer token".to_string()))?;

    let verified = state.gate.authenticate(auth.token()).await?;
    let profile = user::Entity::find_by_id(verified.uid.clone())
        .one(&state.db)
        .await?;

    let identity = Identity::resolve(verified, profile.as_ref());
    tracing::debug!(
        uid = %identity.uid,
        role = ?identity.role,
        active = identity.active,
        registered = identity.registered,
        "Authenticated request"
    );

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
