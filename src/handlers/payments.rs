use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::services::payments::{decode_webhook, record_payment};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub token: String,
}

/// Gateway callback reporting the outcome of a payment
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookRequest>,
) -> AppResult<Json<Value>> {
    let event = decode_webhook(&payload.token, &state.config.payment_webhook_secret)?;
    record_payment(&state.db, &event).await?;

    Ok(Json(json!({ "received": event.reference })))
}
