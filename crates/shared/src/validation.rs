//! Common validation utilities.

use validator::ValidationError;

/// Maximum broadcast / subscription radius in meters (50 km).
const MAX_RADIUS_M: f64 = 50_000.0;

/// Maximum passengers a single ride may carry.
const MAX_PASSENGERS: i32 = 8;

/// Validates that a latitude value is within valid range (-90 to 90).
pub fn validate_latitude(lat: f64) -> Result<(), ValidationError> {
    if (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        let mut err = ValidationError::new("latitude_range");
        err.message = Some("Latitude must be between -90 and 90".into());
        Err(err)
    }
}

/// Validates that a longitude value is within valid range (-180 to 180).
pub fn validate_longitude(lon: f64) -> Result<(), ValidationError> {
    if (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        let mut err = ValidationError::new("longitude_range");
        err.message = Some("Longitude must be between -180 and 180".into());
        Err(err)
    }
}

/// Validates that a radius in meters is non-negative and within the cap.
pub fn validate_radius_m(radius: f64) -> Result<(), ValidationError> {
    if (0.0..=MAX_RADIUS_M).contains(&radius) {
        Ok(())
    } else {
        let mut err = ValidationError::new("radius_range");
        err.message = Some("Radius must be between 0 and 50000 meters".into());
        Err(err)
    }
}

/// Validates a passenger count (at least 1, at most 8).
pub fn validate_passenger_count(count: i32) -> Result<(), ValidationError> {
    if (1..=MAX_PASSENGERS).contains(&count) {
        Ok(())
    } else {
        let mut err = ValidationError::new("passenger_count_range");
        err.message = Some("Number of passengers must be between 1 and 8".into());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_latitude() {
        assert!(validate_latitude(0.0).is_ok());
        assert!(validate_latitude(-90.0).is_ok());
        assert!(validate_latitude(90.0).is_ok());
        assert!(validate_latitude(90.0001).is_err());
        assert!(validate_latitude(-90.0001).is_err());
    }

    #[test]
    fn test_validate_longitude() {
        assert!(validate_longitude(0.0).is_ok());
        assert!(validate_longitude(-180.0).is_ok());
        assert!(validate_longitude(180.0).is_ok());
        assert!(validate_longitude(180.0001).is_err());
        assert!(validate_longitude(-180.0001).is_err());
    }

    #[test]
    fn test_validate_radius() {
        assert!(validate_radius_m(0.0).is_ok());
        assert!(validate_radius_m(1000.0).is_ok());
        assert!(validate_radius_m(50_000.0).is_ok());
        assert!(validate_radius_m(-1.0).is_err());
        assert!(validate_radius_m(50_000.1).is_err());
    }

    #[test]
    fn test_validate_passenger_count() {
        assert!(validate_passenger_count(1).is_ok());
        assert!(validate_passenger_count(8).is_ok());
        assert!(validate_passenger_count(0).is_err());
        assert!(validate_passenger_count(9).is_err());
        assert!(validate_passenger_count(-3).is_err());
    }
}
