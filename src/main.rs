use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quickseat_backend::{
    auth::AuthorizationGate,
    booking::{BookingLedger, FareCalculator, SeaOrmBookingStore},
    config::{BootstrapAdmin, Config},
    db,
    entities::user::{self, UserRole},
    middleware::rate_limit::{create_global_governor, log_request},
    routes,
    services::directions::{GoogleDirections, RouteDistanceLookup, StaticRouteTable},
    services::identity::{FirebaseIdentityProvider, IdentityProvider, LocalIdentityProvider},
    services::payments::SeaOrmPaymentVerifier,
    utils::clock::SystemClock,
    AppState,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quickseat_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    tracing::info!("Starting server at {}", config.server_addr());

    // Connect to database
    let db = db::connect(&config)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Connected to database");

    // Run migrations
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");
    tracing::info!("Migrations complete");

    if let Some(admin) = &config.bootstrap_admin {
        provision_admin(&db, admin).await;
    }

    let http = reqwest::Client::builder()
        .timeout(config.upstream_timeout())
        .build()
        .expect("Failed to build HTTP client");

    let identity: Arc<dyn IdentityProvider> = match &config.firebase {
        Some(firebase) => {
            tracing::info!(project_id = %firebase.project_id, "Using Firebase identity tokens");
            Arc::new(FirebaseIdentityProvider::new(http.clone(), firebase.clone()))
        }
        None => {
            tracing::warn!("FIREBASE_PROJECT_ID not set, accepting locally signed tokens");
            Arc::new(LocalIdentityProvider::new(
                config.jwt_secret.clone(),
                config.jwt_expiration_hours,
            ))
        }
    };

    let directions: Arc<dyn RouteDistanceLookup> =
        match (&config.google_maps_api_key, &config.route_table_path) {
            (Some(key), _) => Arc::new(GoogleDirections::new(http.clone(), key.clone())),
            (None, Some(path)) => {
                let json = std::fs::read_to_string(path).expect("Failed to read ROUTE_TABLE_PATH");
                let table = StaticRouteTable::from_json(&json).expect("Invalid route table");
                tracing::warn!(
                    path = %path,
                    legs = table.len(),
                    "GOOGLE_MAPS_API_KEY not set, fares only work for routes in the table"
                );
                Arc::new(table)
            }
            (None, None) => panic!("Set GOOGLE_MAPS_API_KEY or ROUTE_TABLE_PATH to price fares"),
        };

    let ledger = BookingLedger::new(
        Arc::new(SystemClock),
        Arc::new(SeaOrmBookingStore::new(db.clone())),
        Arc::new(SeaOrmPaymentVerifier::new(db.clone())),
        config.seat_lock_ttl(),
        config.upstream_timeout(),
    );

    // Create app state
    let state = AppState {
        db,
        config: config.clone(),
        gate: Arc::new(AuthorizationGate::new(identity, config.upstream_timeout())),
        ledger: Arc::new(ledger),
        fares: FareCalculator::new(config.service_fee),
        directions,
    };

    // Create router with middleware
    let app = routes::create_router(state)
        .layer(axum::middleware::from_fn(log_request))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(create_global_governor());

    // Start server with socket address for rate limiting
    let addr: SocketAddr = config.server_addr().parse().expect("Invalid address");
    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}

/// Make sure the configured admin profile exists with the admin role
async fn provision_admin(db: &DatabaseConnection, admin: &BootstrapAdmin) {
    let existing = user::Entity::find_by_id(admin.uid.clone())
        .one(db)
        .await
        .expect("Failed to check for admin");
    let now = Utc::now();

    match existing {
        Some(profile) if profile.role == UserRole::Admin && profile.is_active => {}
        Some(profile) => {
            let mut active: user::ActiveModel = profile.into();
            active.role = Set(UserRole::Admin);
            active.is_active = Set(true);
            active.updated_at = Set(now.into());
            active.update(db).await.expect("Failed to promote admin");
            tracing::info!(uid = %admin.uid, "Existing profile promoted to admin");
        }
        None => {
            let profile = user::ActiveModel {
                uid: Set(admin.uid.clone()),
                email: Set(admin.email.trim().to_lowercase()),
                full_name: Set("Administrator".to_string()),
                phone: Set(String::new()),
                photo_url: Set(None),
                role: Set(UserRole::Admin),
                is_active: Set(true),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            };
            profile.insert(db).await.expect("Failed to create admin");
            tracing::info!(uid = %admin.uid, email = %admin.email, "Admin profile provisioned");
        }
    }
}
