use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{DbErr, SqlErr};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ---- authorization ----
    #[error("{0}")]
    Unauthorized(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The inner text is for logs only; callers always see a generic denial
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // ---- fare computation ----
    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Invalid fare: {0}")]
    InvalidFare(String),

    // ---- seat inventory ----
    #[error("Seat {0} no longer available, pick another")]
    SeatUnavailable(String),

    #[error("Seat {0} is not on this trip's seat map")]
    InvalidSeat(String),

    // ---- booking confirmation ----
    #[error("Seat lock expired")]
    LockExpired,

    #[error("Seat is held by another passenger")]
    LockNotOwned,

    #[error("Payment not verified: {0}")]
    PaymentNotVerified(String),

    #[error("Payment declined")]
    PaymentDeclined,

    // ---- cancellation ----
    #[error("{0}")]
    NotFound(String),

    #[error("Only the booking owner can do this")]
    NotOwner,

    #[error("Booking already cancelled")]
    AlreadyCancelled,

    // ---- upstream ----
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    // ---- generic ----
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Database(#[from] DbErr),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) | AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::NotOwner | AppError::LockNotOwned => {
                StatusCode::FORBIDDEN
            }
            AppError::InvalidRoute(_) | AppError::InvalidFare(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::SeatUnavailable(_)
            | AppError::LockExpired
            | AppError::AlreadyCancelled
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidSeat(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PaymentNotVerified(_) | AppError::PaymentDeclined => {
                StatusCode::PAYMENT_REQUIRED
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "unauthorized",
            AppError::InvalidToken(_) => "invalid_token",
            AppError::Forbidden(_) => "forbidden",
            AppError::InvalidRoute(_) => "invalid_route",
            AppError::InvalidFare(_) => "invalid_fare",
            AppError::SeatUnavailable(_) => "seat_unavailable",
            AppError::InvalidSeat(_) => "invalid_seat",
            AppError::LockExpired => "lock_expired",
            AppError::LockNotOwned => "lock_not_owned",
            AppError::PaymentNotVerified(_) => "payment_not_verified",
            AppError::PaymentDeclined => "payment_declined",
            AppError::NotFound(_) => "not_found",
            AppError::NotOwner => "not_owner",
            AppError::AlreadyCancelled => "already_cancelled",
            AppError::Unavailable(_) => "unavailable",
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal",
            AppError::Database(_) => "internal",
        }
    }

    /// Text shown to the caller
    fn public_message(&self) -> String {
        match self {
            AppError::Forbidden(_) => "Access denied".to_string(),
            AppError::PaymentNotVerified(_) | AppError::PaymentDeclined => {
                "Payment failed, seat held until lock expiry, try again".to_string()
            }
            AppError::Internal(_) | AppError::Database(_) => "Internal server error".to_string(),
            AppError::Unavailable(_) => {
                "A dependent service is unavailable, try again shortly".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else if matches!(self, AppError::Forbidden(_)) {
            tracing::debug!(reason = %self, "Access denied");
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.public_message(),
        }));

        (status, body).into_response()
    }
}

/// `Conflict` with `message` when `err` is a unique-constraint violation,
/// otherwise a plain database error
pub fn conflict_on_unique(err: DbErr, message: &str) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            tracing::warn!(%detail, "Unique constraint violated");
            AppError::Conflict(message.to_string())
        }
        _ => AppError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_db_errors_stay_database_errors() {
        let err = conflict_on_unique(DbErr::RecordNotInserted, "Bus already has a trip on that date");
        assert!(matches!(err, AppError::Database(DbErr::RecordNotInserted)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_forbidden_does_not_leak_reason() {
        let err = AppError::Forbidden("bus 42 belongs to op2".to_string());
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.public_message(), "Access denied");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::InvalidToken("bad".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::SeatUnavailable("A3".into()).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::InvalidSeat("Z9".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unavailable("maps".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            AppError::InvalidRoute("zero".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::PaymentNotVerified("unknown".into()).status(),
            StatusCode::PAYMENT_REQUIRED
        );
    }

    #[test]
    fn test_seat_contention_message() {
        let err = AppError::SeatUnavailable("A3".into());
        assert_eq!(err.public_message(), "Seat A3 no longer available, pick another");
    }
}
