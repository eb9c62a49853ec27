pub mod assignment;
pub mod drivers;
pub mod matching;
pub mod payments;
pub mod rides;
pub mod trips;

use crate::errors::{DispatchError, DispatchResult};

/// Coordinate validation shared by intake and the driver registry
pub fn validate_coordinates(lat: f64, lon: f64) -> DispatchResult<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(DispatchError::ValidationFailed(format!(
            "latitude out of range [-90, 90]: {}",
            lat
        )));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(DispatchError::ValidationFailed(format!(
            "longitude out of range [-180, 180]: {}",
            lon
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_coordinates() {
        assert!(validate_coordinates(37.7749, -122.4194).is_ok());
        assert!(validate_coordinates(-90.0, 180.0).is_ok());
        assert!(validate_coordinates(90.0, -180.0).is_ok());

        assert!(validate_coordinates(90.1, 0.0).is_err());
        assert!(validate_coordinates(-90.1, 0.0).is_err());
        assert!(validate_coordinates(0.0, 180.1).is_err());
        assert!(validate_coordinates(0.0, -180.1).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
        assert!(validate_coordinates(0.0, f64::INFINITY).is_err());
    }
}
