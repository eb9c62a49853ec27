//! Fare computation
//!
//! Fares are exact decimals end to end. The pre-surge subtotal is kept as
//! `base_fare`; the surge-multiplied total is what the rider pays. Both are
//! rounded half-up to two decimal places, so a given
//! (distance, duration, tier, surge) tuple always yields the same fare.

use crate::errors::{DispatchError, DispatchResult};
use rust_decimal::{Decimal, RoundingStrategy};

pub const MAX_DISTANCE_KM: i64 = 1000;
pub const MAX_DURATION_SEC: i32 = 86_400;

/// Per-tier pricing: flag fall, per-kilometre and per-minute components
#[derive(Debug, Clone, Copy)]
pub struct TierRates {
    pub base: Decimal,
    pub per_km: Decimal,
    pub per_min: Decimal,
}

/// Rate table lookup; the tier string has been validated at intake
pub fn rates_for(tier: &str) -> DispatchResult<TierRates> {
    match tier {
        "ECONOMY" => Ok(TierRates {
            base: Decimal::new(500, 2),
            per_km: Decimal::new(150, 2),
            per_min: Decimal::new(25, 2),
        }),
        "PREMIUM" => Ok(TierRates {
            base: Decimal::new(800, 2),
            per_km: Decimal::new(250, 2),
            per_min: Decimal::new(40, 2),
        }),
        "LUXURY" => Ok(TierRates {
            base: Decimal::new(1500, 2),
            per_km: Decimal::new(400, 2),
            per_min: Decimal::new(60, 2),
        }),
        other => Err(DispatchError::ValidationFailed(format!(
            "unknown tier: {}",
            other
        ))),
    }
}

/// Computed fare: `base_fare` is the pre-surge subtotal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fare {
    pub base_fare: Decimal,
    pub total_fare: Decimal,
}

/// Compute the fare for a finished trip
///
/// `fare = (base + distance_km * per_km + minutes * per_min) * surge`,
/// rounded half-up to 2 dp.
pub fn compute_fare(
    tier: &str,
    distance_km: Decimal,
    duration_sec: i32,
    surge_multiplier: Decimal,
) -> DispatchResult<Fare> {
    if distance_km < Decimal::ZERO || distance_km > Decimal::from(MAX_DISTANCE_KM) {
        return Err(DispatchError::ValidationFailed(format!(
            "distance_km out of range [0, {}]: {}",
            MAX_DISTANCE_KM, distance_km
        )));
    }
    if !(0..=MAX_DURATION_SEC).contains(&duration_sec) {
        return Err(DispatchError::ValidationFailed(format!(
            "duration_sec out of range [0, {}]: {}",
            MAX_DURATION_SEC, duration_sec
        )));
    }
    if surge_multiplier < Decimal::ONE {
        return Err(DispatchError::ValidationFailed(format!(
            "surge_multiplier must be >= 1.00: {}",
            surge_multiplier
        )));
    }

    let rates = rates_for(tier)?;
    let minutes = Decimal::from(duration_sec) / Decimal::from(60);

    let subtotal = rates.base + distance_km * rates.per_km + minutes * rates.per_min;

    let base_fare = subtotal.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let total_fare = (subtotal * surge_multiplier)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

    Ok(Fare {
        base_fare,
        total_fare,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_economy_fare() {
        // 10 km, 20 min: 5.00 + 10*1.50 + 20*0.25 = 25.00
        let fare = compute_fare("ECONOMY", dec("10"), 1200, Decimal::ONE).unwrap();
        assert_eq!(fare.base_fare, dec("25.00"));
        assert_eq!(fare.total_fare, dec("25.00"));
    }

    #[test]
    fn test_premium_surge_fare() {
        // 10 km, 20 min: 8.00 + 10*2.50 + 20*0.40 = 41.00; x2.0 = 82.00
        let fare = compute_fare("PREMIUM", dec("10"), 1200, dec("2.0")).unwrap();
        assert_eq!(fare.base_fare, dec("41.00"));
        assert_eq!(fare.total_fare, dec("82.00"));
    }

    #[test]
    fn test_luxury_fare() {
        // 3.5 km, 10 min: 15.00 + 3.5*4.00 + 10*0.60 = 35.00
        let fare = compute_fare("LUXURY", dec("3.5"), 600, Decimal::ONE).unwrap();
        assert_eq!(fare.total_fare, dec("35.00"));
    }

    #[test]
    fn test_half_up_rounding() {
        // 1 km, 1 sec economy: 5.00 + 1.50 + (1/60)*0.25 = 6.504166...
        let fare = compute_fare("ECONOMY", dec("1"), 1, Decimal::ONE).unwrap();
        assert_eq!(fare.total_fare, dec("6.50"));

        // 0 km, 30 sec: 5.00 + 0.5*0.25 = 5.125 -> rounds up to 5.13
        let fare = compute_fare("ECONOMY", dec("0"), 30, Decimal::ONE).unwrap();
        assert_eq!(fare.total_fare, dec("5.13"));
    }

    #[test]
    fn test_surge_applies_to_subtotal_not_rounded_base() {
        // 0 km, 30 sec at 1.5x: 5.125 * 1.5 = 7.6875 -> 7.69
        // (rounding the subtotal first would give 5.13 * 1.5 = 7.695 -> 7.70)
        let fare = compute_fare("ECONOMY", dec("0"), 30, dec("1.5")).unwrap();
        assert_eq!(fare.base_fare, dec("5.13"));
        assert_eq!(fare.total_fare, dec("7.69"));
    }

    #[test]
    fn test_fare_determinism() {
        let a = compute_fare("PREMIUM", dec("12.34"), 2345, dec("1.7")).unwrap();
        for _ in 0..100 {
            let b = compute_fare("PREMIUM", dec("12.34"), 2345, dec("1.7")).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_zero_trip_charges_base_only() {
        let fare = compute_fare("ECONOMY", dec("0"), 0, Decimal::ONE).unwrap();
        assert_eq!(fare.total_fare, dec("5.00"));
    }

    #[test]
    fn test_range_validation() {
        assert!(compute_fare("ECONOMY", dec("-1"), 60, Decimal::ONE).is_err());
        assert!(compute_fare("ECONOMY", dec("1001"), 60, Decimal::ONE).is_err());
        assert!(compute_fare("ECONOMY", dec("1"), -1, Decimal::ONE).is_err());
        assert!(compute_fare("ECONOMY", dec("1"), 86_401, Decimal::ONE).is_err());
        assert!(compute_fare("ECONOMY", dec("1"), 60, dec("0.5")).is_err());
        assert!(compute_fare("SUPERSONIC", dec("1"), 60, Decimal::ONE).is_err());

        // boundaries are inclusive
        assert!(compute_fare("ECONOMY", dec("1000"), 86_400, Decimal::ONE).is_ok());
    }
}
