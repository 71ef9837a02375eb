use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};

use crate::handlers::{self, auth, bookings, buses, payments, trips, users};
use crate::middleware::auth::auth_middleware;
use crate::middleware::rate_limit::create_public_governor;
use crate::middleware::role_rate_limit::{create_role_governor, RateLimitedRole};
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    let passenger_governor = create_role_governor(RateLimitedRole::Passenger);
    let operator_governor = create_role_governor(RateLimitedRole::Operator);
    // IP-based governor for public routes (with passenger-level limits)
    let public_governor = create_public_governor();

    // Public routes: token check, search, seat maps, quotes, gateway callback
    let public_routes = Router::new()
        .route("/auth/verify", post(auth::verify))
        .route("/buses/search", get(buses::search_buses))
        .route("/trips", get(trips::search_trips))
        .route("/trips/{id}", get(trips::get_trip))
        .route("/trips/{id}/seats", get(trips::trip_seats))
        .route("/trips/{id}/quote", get(trips::trip_quote))
        .route("/payments/webhook", post(payments::payment_webhook))
        .layer(public_governor);

    // Any signed-in identity: own profile, account, seats and bookings
    let passenger_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/revoke", post(auth::revoke))
        .route("/auth/account/{uid}", delete(auth::delete_account))
        .route("/users", post(users::create_user))
        .route(
            "/users/{uid}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users/me/operator-request", post(users::request_operator))
        .route("/users/{uid}/bookings", get(users::user_bookings))
        .route(
            "/trips/{id}/seats/{seat}/lock",
            post(bookings::lock_seat).delete(bookings::release_seat),
        )
        .route(
            "/bookings",
            post(bookings::create_booking).get(bookings::my_bookings),
        )
        .route("/bookings/{id}", get(bookings::get_booking))
        .route("/bookings/{id}/cancel", post(bookings::cancel_booking))
        .layer(passenger_governor)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Operators (and admins) managing their own fleet
    let operator_routes = Router::new()
        .route("/buses", post(buses::register_bus).get(buses::my_buses))
        .route(
            "/buses/{id}",
            get(buses::get_bus)
                .put(buses::update_bus)
                .delete(buses::deactivate_bus),
        )
        .route("/buses/{id}/trips", post(trips::schedule_trip))
        .route("/trips/{id}/cancel", post(trips::cancel_trip))
        .route("/trips/{id}/bookings", get(trips::trip_bookings))
        .layer(operator_governor)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Admin routes: no per-uid limit, the global IP governor still applies
    let admin_routes = Router::new()
        .route("/admin/users", get(users::list_users))
        .route("/admin/users/{uid}/deactivate", patch(users::deactivate_user))
        .route("/admin/users/{uid}/role", put(users::update_user_role))
        .route("/admin/verify-email", post(auth::verify_email))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let api = Router::new()
        .merge(public_routes)
        .merge(passenger_routes)
        .merge(operator_routes)
        .merge(admin_routes);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .with_state(state)
}
