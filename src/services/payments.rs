use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};

use crate::entities::payment::{self, PaymentStatus};
use crate::error::{AppError, AppResult};

/// What the gateway has told us about a payment reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentCheck {
    Verified { uid: String, amount: i64 },
    Declined,
    Unknown,
}

#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn check(&self, reference: &str) -> AppResult<PaymentCheck>;
}

fn to_check(status: PaymentStatus, uid: String, amount: i64) -> PaymentCheck {
    match status {
        PaymentStatus::Succeeded => PaymentCheck::Verified { uid, amount },
        PaymentStatus::Declined => PaymentCheck::Declined,
    }
}

/// Gateway callback body, carried as an HS256 token signed with the shared secret
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub reference: String,
    pub uid: String,
    pub amount: i64,
    pub status: PaymentStatus,
}

pub fn decode_webhook(token: &str, secret: &str) -> AppResult<PaymentEvent> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;

    let event = decode::<PaymentEvent>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| AppError::InvalidToken(format!("webhook signature: {e}")))?
        .claims;

    if event.reference.trim().is_empty() {
        return Err(AppError::BadRequest("payment reference is required".to_string()));
    }
    if event.amount < 0 {
        return Err(AppError::BadRequest("payment amount cannot be negative".to_string()));
    }
    Ok(event)
}

/// Stores the gateway's latest word on a reference
pub async fn record_payment(db: &DatabaseConnection, event: &PaymentEvent) -> AppResult<()> {
    let model = payment::ActiveModel {
        reference: Set(event.reference.clone()),
        user_id: Set(event.uid.clone()),
        amount: Set(event.amount),
        status: Set(event.status),
        received_at: Set(Utc::now().into()),
    };

    payment::Entity::insert(model)
        .on_conflict(
            OnConflict::column(payment::Column::Reference)
                .update_columns([
                    payment::Column::UserId,
                    payment::Column::Amount,
                    payment::Column::Status,
                    payment::Column::ReceivedAt,
                ])
                .to_owned(),
        )
        .exec(db)
        .await?;

    tracing::info!(
        reference = %event.reference,
        uid = %event.uid,
        amount = event.amount,
        status = ?event.status,
        "Payment event recorded"
    );
    Ok(())
}

pub struct SeaOrmPaymentVerifier {
    db: DatabaseConnection,
}

impl SeaOrmPaymentVerifier {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PaymentVerifier for SeaOrmPaymentVerifier {
    async fn check(&self, reference: &str) -> AppResult<PaymentCheck> {
        let record = payment::Entity::find_by_id(reference.to_string())
            .one(&self.db)
            .await?;

        Ok(match record {
            Some(p) => to_check(p.status, p.user_id, p.amount),
            None => PaymentCheck::Unknown,
        })
    }
}

/// Payment outcomes held in memory, for tests and local tooling
#[derive(Default)]
pub struct InMemoryPayments {
    events: Mutex<HashMap<String, PaymentEvent>>,
}

impl InMemoryPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: PaymentEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event.reference.clone(), event);
    }
}

#[async_trait]
impl PaymentVerifier for InMemoryPayments {
    async fn check(&self, reference: &str) -> AppResult<PaymentCheck> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        Ok(match events.get(reference) {
            Some(e) => to_check(e.status, e.uid.clone(), e.amount),
            None => PaymentCheck::Unknown,
        })
    }
}

#[cfg(test)]
pub(crate) fn sign_event(event: &PaymentEvent, secret: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    encode(
        &Header::new(Algorithm::HS256),
        event,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
