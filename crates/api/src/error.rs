use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use domain::error::DispatchError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// HTTP status for a dispatch error code.
fn dispatch_status(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
        DispatchError::ActiveRideExists => StatusCode::CONFLICT,
        DispatchError::RideNotFound => StatusCode::NOT_FOUND,
        DispatchError::RideNotAvailable => StatusCode::CONFLICT,
        DispatchError::RideNotCancellable => StatusCode::CONFLICT,
        DispatchError::DriverNotAvailable => StatusCode::CONFLICT,
        DispatchError::OfferNotFound => StatusCode::NOT_FOUND,
        DispatchError::OfferExpired => StatusCode::GONE,
        DispatchError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Dispatch(err) => {
                if matches!(err, DispatchError::Internal(_)) {
                    tracing::error!(error = %err, "Internal dispatch error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        err.code(),
                        "An internal error occurred".to_string(),
                    )
                } else {
                    (dispatch_status(err), err.code(), err.to_string())
                }
            }
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION", msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: code,
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(format!("Database error: {}", err))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| {
                    format!(
                        "{}: {}",
                        field,
                        e.message.clone().map(|m| m.to_string()).unwrap_or_default()
                    )
                })
            })
            .collect();

        ApiError::Validation(details.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_status_mapping() {
        assert_eq!(
            dispatch_status(&DispatchError::ActiveRideExists),
            StatusCode::CONFLICT
        );
        assert_eq!(
            dispatch_status(&DispatchError::RideNotFound),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            dispatch_status(&DispatchError::OfferExpired),
            StatusCode::GONE
        );
        assert_eq!(
            dispatch_status(&DispatchError::Unauthorized("no".into())),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_sqlx_error_maps_to_internal() {
        let err: ApiError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
