//! Error types for the kiosk process

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::remote::RemoteError;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The requested operation does not apply to the current session state
    #[error("Invalid session transition: {0}")]
    InvalidTransition(String),

    #[error("Not authenticated as {0}")]
    NotAuthenticated(String),

    #[error("Device is not registered")]
    DeviceNotRegistered,

    /// Free-mode lab and no `KIOSK_SUGGESTED_NUMBER` to bind sessions to
    #[error("Lab {0} is in free mode and no device number is configured")]
    DeviceNumberRequired(i32),

    /// Backend unreachable; login stays disabled until it answers again
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream rejected the request ({status}): {message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("Local state error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RemoteError> for KioskError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Unavailable(message) => KioskError::UpstreamUnavailable(message),
            RemoteError::Rejected { status, message } => {
                KioskError::UpstreamRejected { status, message }
            }
            RemoteError::Decode(message) => KioskError::UpstreamUnavailable(format!(
                "undecodable response: {}",
                message
            )),
        }
    }
}

impl IntoResponse for KioskError {
    fn into_response(self) -> Response {
        let status = match &self {
            KioskError::InvalidCredentials | KioskError::NotAuthenticated(_) => {
                StatusCode::UNAUTHORIZED
            }
            KioskError::InvalidTransition(_)
            | KioskError::DeviceNotRegistered
            | KioskError::DeviceNumberRequired(_) => StatusCode::CONFLICT,
            KioskError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            KioskError::UpstreamRejected { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(StatusCode::is_client_error)
                .unwrap_or(StatusCode::BAD_GATEWAY),
            KioskError::Persistence(_) | KioskError::Serialization(_) => {
                tracing::error!("Local state failure: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type KioskResult<T> = Result<T, KioskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_errors_keep_their_class() {
        let unavailable: KioskError = RemoteError::Unavailable("connect refused".into()).into();
        assert!(matches!(unavailable, KioskError::UpstreamUnavailable(_)));

        let rejected: KioskError = RemoteError::Rejected {
            status: 409,
            message: "taken".into(),
        }
        .into();
        assert_eq!(rejected.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_upstream_server_status_is_not_forwarded() {
        let error = KioskError::UpstreamRejected {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(error.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
