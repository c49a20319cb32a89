#![allow(dead_code)]

use meter_core::filter::{FilterConfig, FilterDecision};
use meter_core::location::Fix;
use meter_core::pricing::RateConfig;
use meter_core::ride::Meter;

/// A meter already started at t=0 with default rates.
pub fn started_meter() -> Meter {
    started_meter_with(RateConfig::default())
}

pub fn started_meter_with(rates: RateConfig) -> Meter {
    let mut meter = Meter::new(FilterConfig::default());
    meter.start(rates, 0).expect("fresh meter starts");
    meter
}

/// Feed fixes in order and return every decision.
pub fn feed(meter: &mut Meter, fixes: &[Fix]) -> Vec<Option<FilterDecision>> {
    fixes.iter().map(|fix| meter.on_location_update(*fix)).collect()
}

/// Apply `count` clock ticks.
pub fn tick(meter: &mut Meter, count: u64) {
    for _ in 0..count {
        meter.on_clock_tick();
    }
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected} +/- {tolerance}, got {actual}"
    );
}
