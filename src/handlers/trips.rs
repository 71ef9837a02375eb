use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{Action, Identity, Resource};
use crate::booking::{FareQuote, SeatMap, TripSeating};
use crate::entities::booking;
use crate::entities::bus;
use crate::entities::trip::{self, TripStatus};
use crate::error::{conflict_on_unique, AppError, AppResult};
use crate::handlers::buses::{find_bus, matches_route};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ScheduleTripRequest {
    pub service_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct TripSearchQuery {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct TripResponse {
    #[serde(flatten)]
    pub trip: trip::Model,
    pub bus: bus::Model,
    pub departs_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TripSummary {
    #[serde(flatten)]
    pub trip: TripResponse,
    pub available_seats: usize,
}

#[derive(Debug, Serialize)]
pub struct SeatMapResponse {
    pub trip_id: Uuid,
    pub capacity: u32,
    pub rows: u32,
    pub seats: Vec<String>,
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelTripResponse {
    pub trip: trip::Model,
    pub cancelled_bookings: usize,
}

/// Departure instant of a trip. Timetables are kept in UTC.
pub(crate) fn departs_at(trip: &trip::Model, bus: &bus::Model) -> Option<DateTime<Utc>> {
    bus.departure()
        .map(|time| trip.service_date.and_time(time).and_utc())
}

/// Seating of a trip. Without a usable departure time the trip is held
/// open until the end of its service date.
pub(crate) fn seating(trip: &trip::Model, bus: &bus::Model) -> TripSeating {
    let departs_at = departs_at(trip, bus).unwrap_or_else(|| {
        trip.service_date.and_time(NaiveTime::MIN).and_utc() + Duration::days(1)
    });
    TripSeating {
        trip_id: trip.id,
        capacity: bus.seat_capacity.max(0) as u32,
        departs_at,
    }
}

fn has_departed(trip: &trip::Model, bus: &bus::Model, now: DateTime<Utc>) -> bool {
    trip.status == TripStatus::Scheduled && seating(trip, bus).has_departed(now)
}

/// Flips scheduled trips that have left to `completed`
async fn mark_completed(state: &AppState, trip_ids: Vec<Uuid>) -> AppResult<()> {
    if trip_ids.is_empty() {
        return Ok(());
    }

    let result = trip::Entity::update_many()
        .set(trip::ActiveModel {
            status: Set(TripStatus::Completed),
            ..Default::default()
        })
        .filter(trip::Column::Id.is_in(trip_ids))
        .filter(trip::Column::Status.eq(TripStatus::Scheduled))
        .exec(&state.db)
        .await?;

    if result.rows_affected > 0 {
        tracing::info!(count = result.rows_affected, "Departed trips marked completed");
    }
    Ok(())
}

pub(crate) async fn load_trip(state: &AppState, trip_id: Uuid) -> AppResult<(trip::Model, bus::Model)> {
    let (mut trip, bus) = trip::Entity::find_by_id(trip_id)
        .find_also_related(bus::Entity)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Trip not found".to_string()))?;
    let bus = bus.ok_or_else(|| AppError::Internal(format!("trip {trip_id} has no bus")))?;

    if has_departed(&trip, &bus, state.ledger.inventory().now()) {
        mark_completed(state, vec![trip.id]).await?;
        trip.status = TripStatus::Completed;
    }
    Ok((trip, bus))
}

/// Seats of this trip can still be sold
pub(crate) fn ensure_bookable(trip: &trip::Model, bus: &bus::Model, now: DateTime<Utc>) -> AppResult<()> {
    if trip.status != TripStatus::Scheduled || !bus.is_active {
        return Err(AppError::BadRequest("Trip is not open for booking".to_string()));
    }
    if departs_at(trip, bus).is_some_and(|at| at <= now) {
        return Err(AppError::BadRequest("Trip has already departed".to_string()));
    }
    Ok(())
}

/// Fare for one seat, from the road distance along the bus's stops
pub(crate) async fn quote_for(state: &AppState, trip: &trip::Model, bus: &bus::Model) -> AppResult<FareQuote> {
    let places = bus.route_places();
    let route = tokio::time::timeout(
        state.config.upstream_timeout(),
        state.directions.route(&places),
    )
    .await
    .map_err(|_| AppError::Unavailable("route distance lookup timed out".to_string()))??;

    state.fares.quote(trip.id, bus.rate_per_km, &route)
}

/// Free seats per trip; trips that cannot be booked count zero
async fn available_counts(
    state: &AppState,
    trips: &[(trip::Model, bus::Model)],
) -> AppResult<HashMap<Uuid, usize>> {
    let now = state.ledger.inventory().now();
    let bookable: Vec<TripSeating> = trips
        .iter()
        .filter(|(trip, bus)| ensure_bookable(trip, bus, now).is_ok())
        .map(|(trip, bus)| seating(trip, bus))
        .collect();

    state.ledger.available_counts(&bookable).await
}

/// Schedule a run of a bus on a date (owning operator or admin)
pub async fn schedule_trip(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(bus_id): Path<Uuid>,
    Json(payload): Json<ScheduleTripRequest>,
) -> AppResult<(StatusCode, Json<trip::Model>)> {
    let bus = find_bus(&state, bus_id).await?;
    state
        .gate
        .authorize(&identity, Action::Create, &Resource::trip(&bus.operator_id))?;

    if !bus.is_active {
        return Err(AppError::BadRequest("Bus is not active".to_string()));
    }
    let today = state.ledger.inventory().now().date_naive();
    if payload.service_date < today {
        return Err(AppError::BadRequest("Service date is in the past".to_string()));
    }
    if !bus.operating_days.runs_on(payload.service_date) {
        return Err(AppError::BadRequest(format!(
            "Bus does not run on {} ({:?} service)",
            payload.service_date, bus.operating_days
        )));
    }

    let existing = trip::Entity::find()
        .filter(trip::Column::BusId.eq(bus_id))
        .filter(trip::Column::ServiceDate.eq(payload.service_date))
        .filter(trip::Column::Status.ne(TripStatus::Cancelled))
        .one(&state.db)
        .await?;
    if existing.is_some() {
        return Err(AppError::Conflict(
            "Bus already has a trip on that date".to_string(),
        ));
    }

    let trip = trip::ActiveModel {
        id: Set(Uuid::new_v4()),
        bus_id: Set(bus_id),
        service_date: Set(payload.service_date),
        status: Set(TripStatus::Scheduled),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.db)
    .await
    .map_err(|e| conflict_on_unique(e, "Bus already has a trip on that date"))?;

    tracing::info!(
        trip_id = %trip.id,
        bus_id = %bus_id,
        service_date = %trip.service_date,
        "Trip scheduled"
    );
    Ok((StatusCode::CREATED, Json(trip)))
}

/// Public search: upcoming scheduled trips with live seat counts
pub async fn search_trips(
    State(state): State<AppState>,
    Query(query): Query<TripSearchQuery>,
) -> AppResult<Json<Vec<TripSummary>>> {
    let today = state.ledger.inventory().now().date_naive();

    let mut select = trip::Entity::find()
        .filter(trip::Column::Status.eq(TripStatus::Scheduled))
        .order_by_asc(trip::Column::ServiceDate);
    select = match query.date {
        Some(date) => select.filter(trip::Column::ServiceDate.eq(date)),
        None => select.filter(trip::Column::ServiceDate.gte(today)),
    };

    let rows = select.find_also_related(bus::Entity).all(&state.db).await?;
    let now = state.ledger.inventory().now();

    let mut departed = Vec::new();
    let mut matches = Vec::new();
    for (trip, bus) in rows {
        let Some(bus) = bus else { continue };
        if has_departed(&trip, &bus, now) {
            departed.push(trip.id);
            continue;
        }
        if bus.is_active
            && matches_route(&bus, query.origin.as_deref(), query.destination.as_deref())
        {
            matches.push((trip, bus));
        }
    }
    mark_completed(&state, departed).await?;

    let counts = available_counts(&state, &matches).await?;
    let mut summaries = Vec::with_capacity(matches.len());
    for (trip, bus) in matches {
        let available_seats = counts.get(&trip.id).copied().unwrap_or(0);
        summaries.push(TripSummary {
            trip: TripResponse {
                departs_at: departs_at(&trip, &bus),
                trip,
                bus,
            },
            available_seats,
        });
    }

    summaries.sort_by(|a, b| a.trip.departs_at.cmp(&b.trip.departs_at));
    Ok(Json(summaries))
}

pub async fn get_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> AppResult<Json<TripSummary>> {
    let (trip, bus) = load_trip(&state, trip_id).await?;
    let rows = [(trip, bus)];
    let available_seats = available_counts(&state, &rows)
        .await?
        .get(&trip_id)
        .copied()
        .unwrap_or(0);
    let [(trip, bus)] = rows;

    Ok(Json(TripSummary {
        trip: TripResponse {
            departs_at: departs_at(&trip, &bus),
            trip,
            bus,
        },
        available_seats,
    }))
}

/// Seat layout and which seats can be locked right now
pub async fn trip_seats(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> AppResult<Json<SeatMapResponse>> {
    let (trip, bus) = load_trip(&state, trip_id).await?;
    let seating = seating(&trip, &bus);
    let map = SeatMap::new(seating.capacity);

    let available = if ensure_bookable(&trip, &bus, state.ledger.inventory().now()).is_ok() {
        state.ledger.available_seats(seating).await?
    } else {
        Vec::new()
    };

    Ok(Json(SeatMapResponse {
        trip_id,
        capacity: map.capacity(),
        rows: map.rows(),
        seats: map.seats(),
        available,
    }))
}

pub async fn trip_quote(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> AppResult<Json<FareQuote>> {
    let (trip, bus) = load_trip(&state, trip_id).await?;
    Ok(Json(quote_for(&state, &trip, &bus).await?))
}

/// Cancel a trip and every confirmed booking on it (owning operator or admin)
pub async fn cancel_trip(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(trip_id): Path<Uuid>,
) -> AppResult<Json<CancelTripResponse>> {
    let (trip, bus) = load_trip(&state, trip_id).await?;
    state
        .gate
        .authorize(&identity, Action::Cancel, &Resource::trip(&bus.operator_id))?;

    if trip.status != TripStatus::Scheduled {
        return Err(AppError::BadRequest("Only scheduled trips can be cancelled".to_string()));
    }

    let mut active: trip::ActiveModel = trip.into();
    active.status = Set(TripStatus::Cancelled);
    let trip = active.update(&state.db).await?;

    let cancelled_bookings = state
        .ledger
        .cancel_trip(seating(&trip, &bus), &identity.uid)
        .await?;

    Ok(Json(CancelTripResponse {
        trip,
        cancelled_bookings,
    }))
}

pub async fn trip_bookings(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(trip_id): Path<Uuid>,
) -> AppResult<Json<Vec<booking::Model>>> {
    let (_, bus) = load_trip(&state, trip_id).await?;
    state
        .gate
        .authorize(&identity, Action::ListBookings, &Resource::trip(&bus.operator_id))?;

    Ok(Json(state.ledger.list_for_trip(trip_id).await?))
}
