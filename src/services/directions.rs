use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

const DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteLeg {
    pub from: String,
    pub to: String,
    pub distance_km: f64,
    pub duration_minutes: i64,
}

/// Road distance along a route, one leg per consecutive pair of places
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDistance {
    pub legs: Vec<RouteLeg>,
}

impl RouteDistance {
    pub fn distance_km(&self) -> f64 {
        self.legs.iter().map(|leg| leg.distance_km).sum()
    }

    pub fn duration_minutes(&self) -> i64 {
        self.legs.iter().map(|leg| leg.duration_minutes).sum()
    }
}

#[async_trait]
pub trait RouteDistanceLookup: Send + Sync {
    /// `places` runs origin, intermediate stops, destination
    async fn route(&self, places: &[String]) -> AppResult<RouteDistance>;
}

fn require_two(places: &[String]) -> AppResult<()> {
    if places.len() < 2 {
        return Err(AppError::InvalidRoute(
            "a route needs an origin and a destination".to_string(),
        ));
    }
    Ok(())
}

// ---- Google Directions API ----

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    legs: Vec<DirectionsLeg>,
}

#[derive(Debug, Deserialize)]
struct DirectionsLeg {
    start_address: String,
    end_address: String,
    distance: TextValue,
    duration: TextValue,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: i64,
}

pub struct GoogleDirections {
    http: Client,
    api_key: String,
}

impl GoogleDirections {
    pub fn new(http: Client, api_key: String) -> Self {
        Self { http, api_key }
    }
}

#[async_trait]
impl RouteDistanceLookup for GoogleDirections {
    async fn route(&self, places: &[String]) -> AppResult<RouteDistance> {
        require_two(places)?;

        let origin = &places[0];
        let destination = &places[places.len() - 1];
        let waypoints = places[1..places.len() - 1].join("|");

        let mut query = vec![
            ("origin", origin.as_str()),
            ("destination", destination.as_str()),
            ("key", self.api_key.as_str()),
        ];
        if !waypoints.is_empty() {
            query.push(("waypoints", waypoints.as_str()));
        }

        let response: DirectionsResponse = self
            .http
            .get(DIRECTIONS_URL)
            .query(&query)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::Unavailable(format!("directions request failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Unavailable(format!("directions response unreadable: {e}")))?;

        match response.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" | "NOT_FOUND" => {
                return Err(AppError::InvalidRoute(format!(
                    "no road route between {origin} and {destination}"
                )));
            }
            other => {
                tracing::warn!(
                    status = other,
                    message = response.error_message.as_deref().unwrap_or(""),
                    "Directions lookup failed"
                );
                return Err(AppError::Unavailable(format!("directions status {other}")));
            }
        }

        // The first route is the one the API recommends
        let route = response
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| AppError::InvalidRoute("directions returned no routes".to_string()))?;

        let legs = route
            .legs
            .into_iter()
            .map(|leg| RouteLeg {
                from: leg.start_address,
                to: leg.end_address,
                distance_km: leg.distance.value as f64 / 1000.0,
                duration_minutes: (leg.duration.value as f64 / 60.0).round() as i64,
            })
            .collect();

        Ok(RouteDistance { legs })
    }
}

// ---- fixed table ----

/// Distances known up front. Lookups ignore case and direction.
#[derive(Debug, Clone, Default)]
pub struct StaticRouteTable {
    legs: HashMap<(String, String), (f64, i64)>,
}

impl StaticRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_leg(mut self, from: &str, to: &str, distance_km: f64, duration_minutes: i64) -> Self {
        self.legs
            .insert(Self::key(from, to), (distance_km, duration_minutes));
        self
    }

    /// Table from a JSON array of legs:
    /// `[{"from": "Colombo", "to": "Kandy", "distance_km": 115.0, "duration_minutes": 180}]`
    pub fn from_json(json: &str) -> AppResult<Self> {
        let legs: Vec<RouteLeg> = serde_json::from_str(json)
            .map_err(|e| AppError::Internal(format!("Invalid route table: {}", e)))?;
        if legs.is_empty() {
            return Err(AppError::Internal("Route table has no legs".to_string()));
        }

        let mut table = Self::new();
        for leg in legs {
            if leg.from.trim().is_empty() || leg.to.trim().is_empty() {
                return Err(AppError::Internal("Route table leg without a place name".to_string()));
            }
            if !(leg.distance_km > 0.0) || leg.duration_minutes < 0 {
                return Err(AppError::Internal(format!(
                    "Route table leg {} -> {} has a bad distance or duration",
                    leg.from, leg.to
                )));
            }
            table = table.with_leg(&leg.from, &leg.to, leg.distance_km, leg.duration_minutes);
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    fn key(a: &str, b: &str) -> (String, String) {
        let (a, b) = (a.trim().to_lowercase(), b.trim().to_lowercase());
        if a <= b { (a, b) } else { (b, a) }
    }
}

#[async_trait]
impl RouteDistanceLookup for StaticRouteTable {
    async fn route(&self, places: &[String]) -> AppResult<RouteDistance> {
        require_two(places)?;

        let legs = places
            .windows(2)
            .map(|pair| {
                let (from, to) = (&pair[0], &pair[1]);
                self.legs
                    .get(&Self::key(from, to))
                    .map(|&(distance_km, duration_minutes)| RouteLeg {
                        from: from.clone(),
                        to: to.clone(),
                        distance_km,
                        duration_minutes,
                    })
                    .ok_or_else(|| AppError::InvalidRoute(format!("no known route {from} -> {to}")))
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(RouteDistance { legs })
    }
}
