use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{Action, Identity, Resource};
use crate::booking::{FareQuote, SeatLock};
use crate::entities::booking;
use crate::error::{AppError, AppResult};
use crate::handlers::trips::{departs_at, ensure_bookable, load_trip, quote_for, seating};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub trip_id: Uuid,
    pub seat_number: String,
    pub payment_reference: String,
}

#[derive(Debug, Serialize)]
pub struct SeatLockResponse {
    #[serde(flatten)]
    pub lock: SeatLock,
    pub amount_due: i64,
    pub quote: FareQuote,
}

/// Hold a seat while the passenger pays. The lock carries the price to pay.
pub async fn lock_seat(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((trip_id, seat)): Path<(Uuid, String)>,
) -> AppResult<(StatusCode, Json<SeatLockResponse>)> {
    state
        .gate
        .authorize(&identity, Action::Lock, &Resource::seat())?;

    let (trip, bus) = load_trip(&state, trip_id).await?;
    ensure_bookable(&trip, &bus, state.ledger.inventory().now())?;

    let quote = quote_for(&state, &trip, &bus).await?;
    let lock = state
        .ledger
        .lock_seat(seating(&trip, &bus), &seat, &identity.uid, quote.price())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SeatLockResponse {
            amount_due: lock.amount_due(),
            lock,
            quote,
        }),
    ))
}

pub async fn release_seat(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((trip_id, seat)): Path<(Uuid, String)>,
) -> AppResult<StatusCode> {
    state
        .gate
        .authorize(&identity, Action::Release, &Resource::seat())?;

    let (trip, bus) = load_trip(&state, trip_id).await?;
    state
        .ledger
        .release_seat(seating(&trip, &bus), &seat, &identity.uid)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Turn the caller's seat lock into a booking once the gateway has reported payment
pub async fn create_booking(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<CreateBookingRequest>,
) -> AppResult<(StatusCode, Json<booking::Model>)> {
    state
        .gate
        .authorize(&identity, Action::Confirm, &Resource::booking(&identity.uid))?;

    let (trip, bus) = load_trip(&state, payload.trip_id).await?;
    ensure_bookable(&trip, &bus, state.ledger.inventory().now())?;

    let booking = state
        .ledger
        .confirm(
            seating(&trip, &bus),
            &payload.seat_number,
            &identity.uid,
            &payload.payment_reference,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(booking)))
}

/// The caller's bookings, most recent first
pub async fn my_bookings(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> AppResult<Json<Vec<booking::Model>>> {
    state
        .gate
        .authorize(&identity, Action::ListBookings, &Resource::profile(&identity.uid))?;

    Ok(Json(state.ledger.list_for_user(&identity.uid).await?))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<booking::Model>> {
    let booking = state
        .ledger
        .find(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;
    state
        .gate
        .authorize(&identity, Action::Read, &Resource::booking(&booking.user_id))?;

    Ok(Json(booking))
}

/// Cancel a booking (owner or admin) and put the seat back on sale
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<booking::Model>> {
    let existing = state
        .ledger
        .find(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;
    state
        .gate
        .authorize(&identity, Action::Cancel, &Resource::booking(&existing.user_id))?;
    if existing.user_id != identity.uid && !identity.is_admin() {
        return Err(AppError::NotOwner);
    }

    let (trip, bus) = load_trip(&state, existing.trip_id).await?;
    if departs_at(&trip, &bus).is_some_and(|at| at <= state.ledger.inventory().now()) {
        return Err(AppError::BadRequest(
            "Bookings cannot be cancelled after departure".to_string(),
        ));
    }

    Ok(Json(state.ledger.cancel(booking_id, &identity).await?))
}
