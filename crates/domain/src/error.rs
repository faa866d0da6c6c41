//! Typed errors for dispatch operations.
//!
//! Every failure surfaced by the core carries one of the stable codes below;
//! the HTTP layer maps them onto status codes without reinterpreting them.

use thiserror::Error;

/// Failure of a dispatch operation.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Passenger already has an active ride")]
    ActiveRideExists,

    #[error("Ride not found")]
    RideNotFound,

    #[error("Ride is no longer available")]
    RideNotAvailable,

    #[error("Ride can no longer be cancelled")]
    RideNotCancellable,

    #[error("Driver is not available")]
    DriverNotAvailable,

    #[error("No offer found for this driver and ride")]
    OfferNotFound,

    #[error("The offer has expired")]
    OfferExpired,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Stable wire code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "VALIDATION",
            DispatchError::ActiveRideExists => "ACTIVE_RIDE_EXISTS",
            DispatchError::RideNotFound => "RIDE_NOT_FOUND",
            DispatchError::RideNotAvailable => "RIDE_NOT_AVAILABLE",
            DispatchError::RideNotCancellable => "RIDE_NOT_CANCELLABLE",
            DispatchError::DriverNotAvailable => "DRIVER_NOT_AVAILABLE",
            DispatchError::OfferNotFound => "OFFER_NOT_FOUND",
            DispatchError::OfferExpired => "OFFER_EXPIRED",
            DispatchError::Unauthorized(_) => "UNAUTHORIZED",
            DispatchError::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(DispatchError::ActiveRideExists.code(), "ACTIVE_RIDE_EXISTS");
        assert_eq!(DispatchError::RideNotAvailable.code(), "RIDE_NOT_AVAILABLE");
        assert_eq!(DispatchError::OfferExpired.code(), "OFFER_EXPIRED");
        assert_eq!(
            DispatchError::Validation("bad latitude".into()).code(),
            "VALIDATION"
        );
        assert_eq!(
            DispatchError::Internal("pool exhausted".into()).code(),
            "INTERNAL"
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = DispatchError::Validation("pickup_latitude out of range".into());
        assert!(err.to_string().contains("pickup_latitude"));
    }
}
