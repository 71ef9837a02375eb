use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::directions::RouteDistance;

/// What a passenger pays for one seat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatPrice {
    pub fare: i64,
    pub service_fee: i64,
}

impl SeatPrice {
    pub fn total(&self) -> i64 {
        self.fare + self.service_fee
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FareQuote {
    pub trip_id: Uuid,
    pub distance_km: f64,
    pub duration_minutes: i64,
    pub rate_per_km: f64,
    pub fare: i64,
    pub service_fee: i64,
    pub total: i64,
}

impl FareQuote {
    pub fn price(&self) -> SeatPrice {
        SeatPrice {
            fare: self.fare,
            service_fee: self.service_fee,
        }
    }
}

/// Distance-based fares. Stateless apart from the flat service fee.
#[derive(Debug, Clone, Copy)]
pub struct FareCalculator {
    service_fee: i64,
}

impl FareCalculator {
    pub fn new(service_fee: i64) -> Self {
        Self {
            service_fee: service_fee.max(0),
        }
    }

    /// `round(distance_km * rate_per_km)` to the nearest whole unit, halves up
    pub fn fare(&self, distance_km: f64, rate_per_km: f64) -> AppResult<i64> {
        if !distance_km.is_finite() || distance_km <= 0.0 {
            return Err(AppError::InvalidRoute(format!(
                "distance must be positive, got {distance_km}"
            )));
        }
        if !rate_per_km.is_finite() || rate_per_km <= 0.0 {
            return Err(AppError::InvalidFare(format!(
                "rate per km must be positive, got {rate_per_km}"
            )));
        }

        // Both factors are positive, so round() (half away from zero) is half-up
        Ok((distance_km * rate_per_km).round() as i64)
    }

    pub fn quote(&self, trip_id: Uuid, rate_per_km: f64, route: &RouteDistance) -> AppResult<FareQuote> {
        let distance_km = route.distance_km();
        let fare = self.fare(distance_km, rate_per_km)?;

        Ok(FareQuote {
            trip_id,
            distance_km,
            duration_minutes: route.duration_minutes(),
            rate_per_km,
            fare,
            service_fee: self.service_fee,
            total: fare + self.service_fee,
        })
    }
}
