use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Deserialize;

use crate::auth::{Action, Identity, Resource};
use crate::entities::booking;
use crate::entities::user::{self, UserRole};
use crate::error::{AppError, AppResult};
use crate::handlers::required;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub full_name: String,
    pub phone: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: UserRole,
}

async fn find_user(state: &AppState, uid: &str) -> AppResult<user::Model> {
    user::Entity::find_by_id(uid.to_string())
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// Create the caller's own profile. Everyone starts as a passenger.
pub async fn create_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<user::Model>)> {
    state
        .gate
        .authorize(&identity, Action::Create, &Resource::profile(&identity.uid))?;

    let email = identity
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::BadRequest("Token carries no email address".to_string()))?;
    let full_name = required("full_name", &payload.full_name)?;
    let phone = required("phone", &payload.phone)?;

    if user::Entity::find_by_id(identity.uid.clone())
        .one(&state.db)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("Profile already exists".to_string()));
    }

    let email_taken = user::Entity::find()
        .filter(user::Column::Email.eq(email.as_str()))
        .one(&state.db)
        .await?
        .is_some();
    if email_taken {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let now = Utc::now();
    let profile = user::ActiveModel {
        uid: Set(identity.uid.clone()),
        email: Set(email),
        full_name: Set(full_name),
        phone: Set(phone),
        photo_url: Set(payload.photo_url.filter(|p| !p.trim().is_empty())),
        role: Set(UserRole::Passenger),
        is_active: Set(true),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.db)
    .await?;

    tracing::info!(uid = %profile.uid, "Profile created");
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(uid): Path<String>,
) -> AppResult<Json<user::Model>> {
    state
        .gate
        .authorize(&identity, Action::Read, &Resource::profile(&uid))?;
    Ok(Json(find_user(&state, &uid).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(uid): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<user::Model>> {
    state
        .gate
        .authorize(&identity, Action::Update, &Resource::profile(&uid))?;

    let existing = find_user(&state, &uid).await?;
    let mut active: user::ActiveModel = existing.into();

    if let Some(full_name) = payload.full_name {
        active.full_name = Set(required("full_name", &full_name)?);
    }
    if let Some(phone) = payload.phone {
        active.phone = Set(required("phone", &phone)?);
    }
    if let Some(photo_url) = payload.photo_url {
        let photo_url = photo_url.trim().to_string();
        active.photo_url = Set((!photo_url.is_empty()).then_some(photo_url));
    }
    active.updated_at = Set(Utc::now().into());

    Ok(Json(active.update(&state.db).await?))
}

async fn set_active(state: &AppState, uid: &str, is_active: bool) -> AppResult<user::Model> {
    let existing = find_user(state, uid).await?;
    let mut active: user::ActiveModel = existing.into();
    active.is_active = Set(is_active);
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(&state.db).await?)
}

/// Soft delete; the uid stays referenced by past bookings
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(uid): Path<String>,
) -> AppResult<Json<user::Model>> {
    state
        .gate
        .authorize(&identity, Action::Delete, &Resource::profile(&uid))?;

    let profile = set_active(&state, &uid, false).await?;
    tracing::info!(uid = %uid, by = %identity.uid, "Profile deleted");
    Ok(Json(profile))
}

/// List active profiles (admin)
pub async fn list_users(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> AppResult<Json<Vec<user::Model>>> {
    state
        .gate
        .authorize(&identity, Action::ListAll, &Resource::users())?;

    let users = user::Entity::find()
        .filter(user::Column::IsActive.eq(true))
        .order_by_desc(user::Column::CreatedAt)
        .all(&state.db)
        .await?;

    Ok(Json(users))
}

pub async fn deactivate_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(uid): Path<String>,
) -> AppResult<Json<user::Model>> {
    state
        .gate
        .authorize(&identity, Action::Deactivate, &Resource::profile(&uid))?;

    let profile = set_active(&state, &uid, false).await?;
    tracing::info!(uid = %uid, by = %identity.uid, "Profile deactivated");
    Ok(Json(profile))
}

/// Change a user's role (admin). Nobody can be made admin through the API.
pub async fn update_user_role(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(uid): Path<String>,
    Json(payload): Json<UpdateRoleRequest>,
) -> AppResult<Json<user::Model>> {
    let action = match payload.role {
        UserRole::Admin => Action::GrantAdmin,
        _ => Action::ChangeRole,
    };
    state
        .gate
        .authorize(&identity, action, &Resource::profile(&uid))?;

    let existing = find_user(&state, &uid).await?;
    let previous = existing.role;
    let mut active: user::ActiveModel = existing.into();
    active.role = Set(payload.role);
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&state.db).await?;

    tracing::info!(
        uid = %uid,
        from = ?previous,
        to = ?payload.role,
        by = %identity.uid,
        "Role changed"
    );
    Ok(Json(updated))
}

/// Self-service upgrade from passenger to operator
pub async fn request_operator(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> AppResult<Json<user::Model>> {
    state.gate.authorize(
        &identity,
        Action::RequestOperator,
        &Resource::profile(&identity.uid),
    )?;

    let existing = find_user(&state, &identity.uid).await?;
    match existing.role {
        UserRole::Passenger => {}
        UserRole::Operator => {
            return Err(AppError::BadRequest("Already an operator".to_string()));
        }
        UserRole::Admin => {
            return Err(AppError::BadRequest("Admins cannot become operators".to_string()));
        }
    }

    let mut active: user::ActiveModel = existing.into();
    active.role = Set(UserRole::Operator);
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&state.db).await?;

    tracing::info!(uid = %identity.uid, "Passenger upgraded to operator");
    Ok(Json(updated))
}

/// A user's bookings, most recent first
pub async fn user_bookings(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(uid): Path<String>,
) -> AppResult<Json<Vec<booking::Model>>> {
    state
        .gate
        .authorize(&identity, Action::ListBookings, &Resource::profile(&uid))?;

    Ok(Json(state.ledger.list_for_user(&uid).await?))
}
