//! Transport-level error mapping (§7): every `DeviceError`/`LocatorError`
//! the core can raise is rendered as `{kind, message}` JSON with a status
//! code that reflects the taxonomy, never the server-side `Display` alone
//! leaking implementation detail beyond what §7 already calls "opaque text
//! whose content is the server-side `what()`".

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use obs_core::error::{DeviceError, LocatorError};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn classify(error: &DeviceError) -> (StatusCode, &'static str) {
    match error {
        DeviceError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
        DeviceError::BadState { .. } => (StatusCode::CONFLICT, "BadState"),
        DeviceError::BadDatabase(_) => (StatusCode::INTERNAL_SERVER_ERROR, "BadDatabase"),
        DeviceError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "Timeout"),
        DeviceError::DeviceFailure(_) => (StatusCode::BAD_GATEWAY, "DeviceFailure"),
        DeviceError::CannotStream(_) => (StatusCode::UNPROCESSABLE_ENTITY, "CannotStream"),
        DeviceError::Degenerate(_) => (StatusCode::UNPROCESSABLE_ENTITY, "Degenerate"),
        DeviceError::Cancelled => (StatusCode::CONFLICT, "Cancelled"),
        DeviceError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Io"),
    }
}

impl From<DeviceError> for ApiError {
    fn from(error: DeviceError) -> Self {
        let (status, kind) = classify(&error);
        ApiError {
            status,
            body: ErrorBody {
                kind,
                message: error.to_string(),
            },
        }
    }
}

impl From<LocatorError> for ApiError {
    fn from(error: LocatorError) -> Self {
        match error {
            LocatorError::ModuleNotFound(name) => ApiError {
                status: StatusCode::NOT_FOUND,
                body: ErrorBody {
                    kind: "ModuleNotFound",
                    message: format!("module not found: {}", name),
                },
            },
            LocatorError::Device(e) => e.into(),
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                kind: "BadRequest",
                message: message.into(),
            },
        }
    }
}
