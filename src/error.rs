use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Ticket numbers out of range: {0:?}")]
    InvalidNumberRange(Vec<i32>),

    #[error("Lottery is not open for tickets")]
    LotteryNotActive,

    #[error("Ticket numbers unavailable: {0:?}")]
    NumberUnavailable(Vec<i32>),

    #[error("Reservation expired")]
    ReservationExpired,

    #[error("Payment rejected: {0}")]
    PaymentRejected(String),

    #[error("Insufficient paid tickets: {paid} paid, {required} required")]
    InsufficientPaidTickets { paid: u64, required: u64 },

    #[error("Invalid lottery transition: {0}")]
    InvalidTransition(String),

    #[error("Auth error: {0}")]
    AuthError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl AppError {
    /// Contention is expected under load; the caller should re-query the
    /// available numbers and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::NumberUnavailable(_))
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::InvalidNumberRange(_) => (StatusCode::BAD_REQUEST, "INVALID_NUMBER_RANGE"),
            AppError::LotteryNotActive => (StatusCode::BAD_REQUEST, "LOTTERY_NOT_ACTIVE"),
            AppError::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            AppError::NumberUnavailable(_) => (StatusCode::CONFLICT, "NUMBER_UNAVAILABLE"),
            AppError::ReservationExpired => (StatusCode::GONE, "RESERVATION_EXPIRED"),
            AppError::PaymentRejected(_) => (StatusCode::PAYMENT_REQUIRED, "PAYMENT_REJECTED"),
            AppError::InsufficientPaidTickets { .. } => {
                (StatusCode::CONFLICT, "INSUFFICIENT_PAID_TICKETS")
            }
            AppError::AuthError(_) | AppError::JwtError(_) => {
                (StatusCode::UNAUTHORIZED, "AUTH_ERROR")
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.status_and_code().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status_code, error_code) = self.status_and_code();
        let message = if status_code.is_server_error() {
            log::error!("Internal error: {self}");
            match self {
                AppError::DatabaseError(_) => "Database error".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            log::warn!("Request rejected ({error_code}): {self}");
            self.to_string()
        };

        let mut error = json!({
            "code": error_code,
            "message": message,
            "retryable": self.is_retryable(),
        });
        if let AppError::NumberUnavailable(numbers) = self {
            error["numbers"] = json!(numbers);
        }

        HttpResponse::build(status_code).json(json!({
            "success": false,
            "error": error
        }))
    }
}
