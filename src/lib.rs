pub mod auth;
pub mod booking;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::auth::AuthorizationGate;
use crate::booking::{BookingLedger, FareCalculator};
use crate::services::directions::RouteDistanceLookup;

pub use config::Config;
pub use error::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Config,
    pub gate: Arc<AuthorizationGate>,
    pub ledger: Arc<BookingLedger>,
    pub fares: FareCalculator,
    pub directions: Arc<dyn RouteDistanceLookup>,
}
