//! Fare policy: maps accrued distance and waiting time to a fare.
//!
//! Formula: `max(base + distance_km * per_km + waiting_min * per_min, minimum) * night_multiplier`.
//! Always evaluated with the rate configuration frozen at ride start.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default base fare in currency units.
pub const DEFAULT_BASE_FARE: f64 = 50.0;

/// Default per-kilometre rate.
pub const DEFAULT_PER_KM_RATE: f64 = 20.0;

/// Default per-minute waiting rate.
pub const DEFAULT_PER_MINUTE_WAITING_RATE: f64 = 5.0;

/// Default minimum fare.
pub const DEFAULT_MINIMUM_FARE: f64 = 100.0;

/// Default night multiplier (no surcharge).
pub const DEFAULT_NIGHT_MULTIPLIER: f64 = 1.0;

/// Rate configuration used for one ride.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateConfig {
    pub base_fare: f64,
    pub per_km_rate: f64,
    pub per_minute_waiting_rate: f64,
    pub minimum_fare: f64,
    /// Multiplier applied after the minimum fare; never below 1.0.
    pub night_multiplier: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            base_fare: DEFAULT_BASE_FARE,
            per_km_rate: DEFAULT_PER_KM_RATE,
            per_minute_waiting_rate: DEFAULT_PER_MINUTE_WAITING_RATE,
            minimum_fare: DEFAULT_MINIMUM_FARE,
            night_multiplier: DEFAULT_NIGHT_MULTIPLIER,
        }
    }
}

/// Rejected rate configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A rate field is negative, NaN or infinite.
    InvalidRate { field: &'static str, value: f64 },
    /// Night multiplier below 1.0 would discount the fare.
    DiscountingMultiplier(f64),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::InvalidRate { field, value } => {
                write!(f, "{field} must be a finite non-negative number, got {value}")
            }
            ConfigurationError::DiscountingMultiplier(value) => {
                write!(f, "night_multiplier must be at least 1.0, got {value}")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

impl RateConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let fields = [
            ("base_fare", self.base_fare),
            ("per_km_rate", self.per_km_rate),
            ("per_minute_waiting_rate", self.per_minute_waiting_rate),
            ("minimum_fare", self.minimum_fare),
            ("night_multiplier", self.night_multiplier),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidRate { field, value });
            }
        }
        if self.night_multiplier < 1.0 {
            return Err(ConfigurationError::DiscountingMultiplier(self.night_multiplier));
        }
        Ok(())
    }

    /// `self` when valid, otherwise the defaults together with the reason.
    pub fn or_default(self) -> (Self, Option<ConfigurationError>) {
        match self.validate() {
            Ok(()) => (self, None),
            Err(error) => (Self::default(), Some(error)),
        }
    }
}

/// Calculate the fare for the given accrual.
pub fn compute_fare(distance_km: f64, waiting_seconds: u64, config: &RateConfig) -> f64 {
    let distance_fare = distance_km * config.per_km_rate;
    let waiting_fare = (waiting_seconds as f64 / 60.0) * config.per_minute_waiting_rate;
    let subtotal = config.base_fare + distance_fare + waiting_fare;
    subtotal.max(config.minimum_fare) * config.night_multiplier
}

/// Fare split into its components, for receipts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub base: f64,
    pub distance: f64,
    pub waiting: f64,
    /// Amount added to reach the minimum fare (zero when the subtotal already exceeds it).
    pub minimum_top_up: f64,
    /// Amount added by the night multiplier.
    pub night_surcharge: f64,
}

impl FareBreakdown {
    pub fn new(distance_km: f64, waiting_seconds: u64, config: &RateConfig) -> Self {
        let base = config.base_fare;
        let distance = distance_km * config.per_km_rate;
        let waiting = (waiting_seconds as f64 / 60.0) * config.per_minute_waiting_rate;
        let subtotal = base + distance + waiting;
        let floored = subtotal.max(config.minimum_fare);
        Self {
            base,
            distance,
            waiting,
            minimum_top_up: floored - subtotal,
            night_surcharge: floored * config.night_multiplier - floored,
        }
    }

    pub fn total(&self) -> f64 {
        let floored = self.base + self.distance + self.waiting + self.minimum_top_up;
        floored + self.night_surcharge
    }
}

impl fmt::Display for FareBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<16}{:>10.2}", "base", self.base)?;
        writeln!(f, "{:<16}{:>10.2}", "distance", self.distance)?;
        writeln!(f, "{:<16}{:>10.2}", "waiting", self.waiting)?;
        if self.minimum_top_up > 0.0 {
            writeln!(f, "{:<16}{:>10.2}", "minimum top-up", self.minimum_top_up)?;
        }
        if self.night_surcharge > 0.0 {
            writeln!(f, "{:<16}{:>10.2}", "night surcharge", self.night_surcharge)?;
        }
        write!(f, "{:<16}{:>10.2}", "total", self.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_fare_applies_to_short_rides() {
        let fare = compute_fare(1.0, 120, &RateConfig::default());
        assert!((fare - 100.0).abs() < 1e-9, "fare {fare}");
    }

    #[test]
    fn distance_fare_above_minimum_is_charged_in_full() {
        let fare = compute_fare(5.0, 0, &RateConfig::default());
        assert!((fare - 150.0).abs() < 1e-9, "fare {fare}");
    }

    #[test]
    fn waiting_is_charged_per_minute_pro_rata() {
        let config = RateConfig {
            minimum_fare: 0.0,
            ..RateConfig::default()
        };
        let fare = compute_fare(0.0, 90, &config);
        assert!((fare - 57.5).abs() < 1e-9, "fare {fare}");
    }

    #[test]
    fn night_multiplier_applies_after_minimum() {
        let config = RateConfig {
            night_multiplier: 1.5,
            ..RateConfig::default()
        };
        assert!((compute_fare(0.0, 0, &config) - 150.0).abs() < 1e-9);
    }

    #[test]
    fn fare_is_deterministic() {
        let config = RateConfig::default();
        let a = compute_fare(3.217, 431, &config);
        let b = compute_fare(3.217, 431, &config);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn breakdown_total_matches_fare() {
        let config = RateConfig {
            night_multiplier: 1.25,
            ..RateConfig::default()
        };
        for (km, waiting) in [(0.0, 0), (1.0, 120), (5.0, 0), (12.4, 600)] {
            let breakdown = FareBreakdown::new(km, waiting, &config);
            let fare = compute_fare(km, waiting, &config);
            assert!((breakdown.total() - fare).abs() < 1e-9);
        }
        let short = FareBreakdown::new(1.0, 120, &RateConfig::default());
        assert!((short.minimum_top_up - 20.0).abs() < 1e-9);
    }

    #[test]
    fn validation_rejects_negative_and_discounting_values() {
        let negative = RateConfig {
            per_km_rate: -1.0,
            ..RateConfig::default()
        };
        assert!(matches!(
            negative.validate(),
            Err(ConfigurationError::InvalidRate { field: "per_km_rate", .. })
        ));

        let discount = RateConfig {
            night_multiplier: 0.8,
            ..RateConfig::default()
        };
        assert_eq!(
            discount.validate(),
            Err(ConfigurationError::DiscountingMultiplier(0.8))
        );

        let (fallback, error) = discount.or_default();
        assert_eq!(fallback, RateConfig::default());
        assert!(error.is_some());
    }
}
