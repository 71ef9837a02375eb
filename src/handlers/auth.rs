use axum::{
    extract::{Path, State},
    Extension, Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeaderRejection,
    TypedHeader,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};

use crate::auth::{Action, Identity, Resource};
use crate::entities::user;
use crate::error::{AppError, AppResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub identity: Identity,
    pub profile: Option<user::Model>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub uid: String,
}

async fn session(state: &AppState, identity: Identity) -> AppResult<SessionResponse> {
    let profile = user::Entity::find_by_id(identity.uid.clone())
        .one(&state.db)
        .await?;
    Ok(SessionResponse { identity, profile })
}

/// Check a token and report who it belongs to
pub async fn verify(
    State(state): State<AppState>,
    auth: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
) -> AppResult<Json<SessionResponse>> {
    let TypedHeader(auth) =
        auth.map_err(|_| AppError::Unauthorized("Missing bearer token".to_string()))?;

    let verified = state.gate.authenticate(auth.token()).await?;
    let profile = user::Entity::find_by_id(verified.uid.clone())
        .one(&state.db)
        .await?;
    let identity = Identity::resolve(verified, profile.as_ref());

    Ok(Json(SessionResponse { identity, profile }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> AppResult<Json<SessionResponse>> {
    state
        .gate
        .authorize(&identity, Action::Read, &Resource::account(&identity.uid))?;
    Ok(Json(session(&state, identity).await?))
}

/// Sign the caller out everywhere
pub async fn revoke(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> AppResult<Json<MessageResponse>> {
    state
        .gate
        .authorize(&identity, Action::RevokeSessions, &Resource::account(&identity.uid))?;
    state.gate.revoke_sessions(&identity.uid).await?;

    Ok(Json(MessageResponse {
        message: "All sessions revoked".to_string(),
    }))
}

/// Delete the account at the identity provider and deactivate its profile.
/// Bookings keep their uid reference.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(uid): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    state
        .gate
        .authorize(&identity, Action::Delete, &Resource::account(&uid))?;
    state.gate.delete_account(&uid).await?;

    if let Some(profile) = user::Entity::find_by_id(uid.clone()).one(&state.db).await? {
        let mut active: user::ActiveModel = profile.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now().into());
        active.update(&state.db).await?;
    }

    tracing::info!(uid = %uid, by = %identity.uid, "Account deleted");
    Ok(Json(MessageResponse {
        message: "Account deleted".to_string(),
    }))
}

pub async fn verify_email(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<VerifyEmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .gate
        .authorize(&identity, Action::VerifyEmail, &Resource::account(&payload.uid))?;
    state.gate.mark_email_verified(&payload.uid).await?;

    Ok(Json(MessageResponse {
        message: "Email marked as verified".to_string(),
    }))
}
