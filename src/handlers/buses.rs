use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{NaiveTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{Action, Identity, Resource};
use crate::entities::bus::{self, OperatingDays};
use crate::entities::trip::{self, TripStatus};
use crate::entities::user::{self, UserRole};
use crate::error::{AppError, AppResult};
use crate::handlers::required;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterBusRequest {
    pub bus_number: String,
    pub route_number: String,
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub stops: Vec<String>,
    pub seat_capacity: i32,
    pub departure_time: String,
    pub arrival_time: String,
    pub operating_days: Option<OperatingDays>,
    pub rate_per_km: f64,
    /// Admins may register a bus for an operator; operators always own what they register
    pub operator_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBusRequest {
    pub bus_number: Option<String>,
    pub route_number: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub stops: Option<Vec<String>>,
    pub seat_capacity: Option<i32>,
    pub departure_time: Option<String>,
    pub arrival_time: Option<String>,
    pub operating_days: Option<OperatingDays>,
    pub rate_per_km: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct BusSearchQuery {
    pub origin: Option<String>,
    pub destination: Option<String>,
}

fn clock_time(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    match NaiveTime::parse_from_str(value, "%H:%M") {
        Ok(_) if value.len() == 5 => Ok(value.to_string()),
        _ => Err(AppError::BadRequest(format!("{field} must be HH:MM"))),
    }
}

fn bus_number(value: &str) -> AppResult<String> {
    Ok(required("bus_number", value)?.to_uppercase())
}

fn capacity(value: i32) -> AppResult<i32> {
    if value < 1 {
        return Err(AppError::BadRequest("seat_capacity must be at least 1".to_string()));
    }
    Ok(value)
}

fn rate(value: f64) -> AppResult<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(AppError::BadRequest("rate_per_km must be positive".to_string()));
    }
    Ok(value)
}

fn stops(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn distinct_ends(origin: &str, destination: &str) -> AppResult<()> {
    if origin.eq_ignore_ascii_case(destination) {
        return Err(AppError::BadRequest(
            "origin and destination must differ".to_string(),
        ));
    }
    Ok(())
}

async fn ensure_number_free(state: &AppState, number: &str, except: Option<Uuid>) -> AppResult<()> {
    let existing = bus::Entity::find()
        .filter(bus::Column::BusNumber.eq(number))
        .one(&state.db)
        .await?;

    match existing {
        Some(b) if Some(b.id) != except => Err(AppError::Conflict(format!(
            "Bus number {number} is already registered"
        ))),
        _ => Ok(()),
    }
}

pub(crate) async fn find_bus(state: &AppState, bus_id: Uuid) -> AppResult<bus::Model> {
    bus::Entity::find_by_id(bus_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Bus not found".to_string()))
}

/// Register a bus (operator or admin)
pub async fn register_bus(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<RegisterBusRequest>,
) -> AppResult<(StatusCode, Json<bus::Model>)> {
    let operator_id = payload
        .operator_id
        .clone()
        .unwrap_or_else(|| identity.uid.clone());
    state
        .gate
        .authorize(&identity, Action::Create, &Resource::bus(&operator_id))?;

    let owner = user::Entity::find_by_id(operator_id.clone())
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::BadRequest("Operator profile not found".to_string()))?;
    if owner.role != UserRole::Operator || !owner.is_active {
        return Err(AppError::BadRequest(
            "Buses can only be registered to an active operator".to_string(),
        ));
    }

    let number = bus_number(&payload.bus_number)?;
    let origin = required("origin", &payload.origin)?;
    let destination = required("destination", &payload.destination)?;
    distinct_ends(&origin, &destination)?;
    ensure_number_free(&state, &number, None).await?;

    let now = Utc::now();
    let bus = bus::ActiveModel {
        id: Set(Uuid::new_v4()),
        bus_number: Set(number),
        route_number: Set(required("route_number", &payload.route_number)?),
        operator_id: Set(operator_id),
        origin: Set(origin),
        destination: Set(destination),
        stops: Set(serde_json::json!(stops(&payload.stops))),
        seat_capacity: Set(capacity(payload.seat_capacity)?),
        departure_time: Set(clock_time("departure_time", &payload.departure_time)?),
        arrival_time: Set(clock_time("arrival_time", &payload.arrival_time)?),
        operating_days: Set(payload.operating_days.unwrap_or(OperatingDays::Daily)),
        rate_per_km: Set(rate(payload.rate_per_km)?),
        is_active: Set(true),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.db)
    .await?;

    tracing::info!(
        bus_id = %bus.id,
        bus_number = %bus.bus_number,
        operator_id = %bus.operator_id,
        "Bus registered"
    );
    Ok((StatusCode::CREATED, Json(bus)))
}

/// The caller's active buses, newest first
pub async fn my_buses(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> AppResult<Json<Vec<bus::Model>>> {
    state
        .gate
        .authorize(&identity, Action::Read, &Resource::bus(&identity.uid))?;

    let buses = bus::Entity::find()
        .filter(bus::Column::OperatorId.eq(identity.uid.as_str()))
        .filter(bus::Column::IsActive.eq(true))
        .order_by_desc(bus::Column::CreatedAt)
        .all(&state.db)
        .await?;

    Ok(Json(buses))
}

pub async fn get_bus(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(bus_id): Path<Uuid>,
) -> AppResult<Json<bus::Model>> {
    let bus = find_bus(&state, bus_id).await?;
    state
        .gate
        .authorize(&identity, Action::Read, &Resource::bus(&bus.operator_id))?;
    Ok(Json(bus))
}

/// Partial update. The owning operator never changes.
pub async fn update_bus(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(bus_id): Path<Uuid>,
    Json(payload): Json<UpdateBusRequest>,
) -> AppResult<Json<bus::Model>> {
    let existing = find_bus(&state, bus_id).await?;
    state
        .gate
        .authorize(&identity, Action::Update, &Resource::bus(&existing.operator_id))?;

    let origin = match &payload.origin {
        Some(origin) => required("origin", origin)?,
        None => existing.origin.clone(),
    };
    let destination = match &payload.destination {
        Some(destination) => required("destination", destination)?,
        None => existing.destination.clone(),
    };
    distinct_ends(&origin, &destination)?;

    if let Some(seat_capacity) = payload.seat_capacity {
        let seat_capacity = capacity(seat_capacity)?;
        if seat_capacity != existing.seat_capacity {
            let scheduled = trip::Entity::find()
                .filter(trip::Column::BusId.eq(bus_id))
                .filter(trip::Column::Status.eq(TripStatus::Scheduled))
                .count(&state.db)
                .await?;
            if scheduled > 0 {
                return Err(AppError::Conflict(
                    "Seat capacity cannot change while trips are scheduled".to_string(),
                ));
            }
        }
    }

    let mut active: bus::ActiveModel = existing.into();

    if let Some(number) = &payload.bus_number {
        let number = bus_number(number)?;
        ensure_number_free(&state, &number, Some(bus_id)).await?;
        active.bus_number = Set(number);
    }
    if let Some(route_number) = &payload.route_number {
        active.route_number = Set(required("route_number", route_number)?);
    }
    active.origin = Set(origin);
    active.destination = Set(destination);
    if let Some(values) = &payload.stops {
        active.stops = Set(serde_json::json!(stops(values)));
    }
    if let Some(seat_capacity) = payload.seat_capacity {
        active.seat_capacity = Set(seat_capacity);
    }
    if let Some(departure) = &payload.departure_time {
        active.departure_time = Set(clock_time("departure_time", departure)?);
    }
    if let Some(arrival) = &payload.arrival_time {
        active.arrival_time = Set(clock_time("arrival_time", arrival)?);
    }
    if let Some(days) = payload.operating_days {
        active.operating_days = Set(days);
    }
    if let Some(rate_per_km) = payload.rate_per_km {
        active.rate_per_km = Set(rate(rate_per_km)?);
    }
    active.updated_at = Set(Utc::now().into());

    let bus = active.update(&state.db).await?;
    tracing::info!(bus_id = %bus.id, by = %identity.uid, "Bus updated");
    Ok(Json(bus))
}

pub async fn deactivate_bus(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(bus_id): Path<Uuid>,
) -> AppResult<Json<bus::Model>> {
    let existing = find_bus(&state, bus_id).await?;
    state.gate.authorize(
        &identity,
        Action::Deactivate,
        &Resource::bus(&existing.operator_id),
    )?;

    let mut active: bus::ActiveModel = existing.into();
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now().into());
    let bus = active.update(&state.db).await?;

    tracing::info!(bus_id = %bus.id, by = %identity.uid, "Bus deactivated");
    Ok(Json(bus))
}

/// Case-insensitive substring match on the places a bus calls at; the
/// origin must come before the destination in travel order
pub(crate) fn matches_route(bus: &bus::Model, origin: Option<&str>, destination: Option<&str>) -> bool {
    let wanted = |needle: Option<&str>| {
        needle
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_lowercase)
    };
    let places: Vec<String> = bus
        .route_places()
        .iter()
        .map(|place| place.to_lowercase())
        .collect();
    let last = places.len() - 1;

    let boarding = match wanted(origin) {
        Some(origin) => match places[..last].iter().position(|p| p.contains(&origin)) {
            Some(at) => at,
            None => return false,
        },
        None => 0,
    };
    match wanted(destination) {
        Some(destination) => places[boarding + 1..].iter().any(|p| p.contains(&destination)),
        None => true,
    }
}

/// Public search over active buses, earliest departure first
pub async fn search_buses(
    State(state): State<AppState>,
    Query(query): Query<BusSearchQuery>,
) -> AppResult<Json<Vec<bus::Model>>> {
    let buses = bus::Entity::find()
        .filter(bus::Column::IsActive.eq(true))
        .order_by_asc(bus::Column::DepartureTime)
        .all(&state.db)
        .await?;

    let found = buses
        .into_iter()
        .filter(|b| matches_route(b, query.origin.as_deref(), query.destination.as_deref()))
        .collect();

    Ok(Json(found))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bus() -> bus::Model {
        let now = Utc::now().into();
        bus::Model {
            id: Uuid::new_v4(),
            bus_number: "NB-1234".to_string(),
            route_number: "01".to_string(),
            operator_id: "op1".to_string(),
            origin: "Colombo".to_string(),
            destination: "Kandy".to_string(),
            stops: serde_json::json!(["Kegalle"]),
            seat_capacity: 40,
            departure_time: "06:30".to_string(),
            arrival_time: "09:45".to_string(),
            operating_days: OperatingDays::Daily,
            rate_per_km: 12.0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_clock_time_requires_hh_mm() {
        assert_eq!(clock_time("t", "06:30").unwrap(), "06:30");
        assert!(clock_time("t", "6:30").is_err());
        assert!(clock_time("t", "24:00").is_err());
        assert!(clock_time("t", "06:30:00").is_err());
    }

    #[test]
    fn test_bus_number_is_upper_cased() {
        assert_eq!(bus_number(" nb-1234 ").unwrap(), "NB-1234");
        assert!(bus_number("  ").is_err());
    }

    #[test]
    fn test_bus_field_validation() {
        assert!(capacity(0).is_err());
        assert_eq!(capacity(1).unwrap(), 1);
        assert!(rate(0.0).is_err());
        assert!(rate(f64::INFINITY).is_err());
        assert!(distinct_ends("Colombo", "colombo").is_err());
        assert_eq!(stops(&[" Kegalle ".into(), "".into()]), vec!["Kegalle".to_string()]);
    }

    #[test]
    fn test_search_matches_substrings_ignoring_case() {
        let bus = sample_bus();
        assert!(matches_route(&bus, Some("colo"), Some("KAN")));
        assert!(matches_route(&bus, None, Some("kandy")));
        assert!(matches_route(&bus, Some(""), None));
        assert!(!matches_route(&bus, Some("matara"), None));
    }

    #[test]
    fn test_search_follows_stop_order() {
        let bus = sample_bus();
        assert!(matches_route(&bus, Some("kegalle"), Some("kandy")));
        assert!(matches_route(&bus, Some("colombo"), Some("kegalle")));
        assert!(!matches_route(&bus, Some("kandy"), Some("colombo")));
        assert!(!matches_route(&bus, Some("kegalle"), Some("colombo")));
        assert!(!matches_route(&bus, Some("kandy"), None));
        assert!(!matches_route(&bus, None, Some("colombo")));
    }
}
