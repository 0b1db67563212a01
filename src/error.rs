use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Line busy: {0}")]
    LineBusy(String),
    #[error("Invalid edge mode: {0}")]
    InvalidEdgeMode(String),
    #[error("Invalid pull mode: {0}")]
    InvalidPullMode(String),
    #[error("Invalid request shape: {0}")]
    InvalidRequestShape(String),
    #[error("Line write failed: {0}")]
    LineWrite(String),
    #[error("Line read failed: {0}")]
    LineRead(String),
    #[error("Entity not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) | AppError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            AppError::LineBusy(_) => StatusCode::CONFLICT,
            AppError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidEdgeMode(_)
            | AppError::InvalidPullMode(_)
            | AppError::InvalidRequestShape(_)
            | AppError::LineWrite(_)
            | AppError::LineRead(_)
            | AppError::Config(_)
            | AppError::Gpio(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
