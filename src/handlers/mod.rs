pub mod auth;
pub mod bookings;
pub mod buses;
pub mod payments;
pub mod trips;
pub mod users;

use axum::Json;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Trimmed value of a required text field
pub(crate) fn required(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    Ok(value.to_string())
}
