//! Test helpers for building fixes and synthetic GPS traces.
//!
//! Shared by unit tests, integration tests and benchmarks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geo::EARTH_RADIUS_KM;
use crate::location::Fix;
use crate::trace::{Trace, TraceEntry};

/// Latitude/longitude used as the origin of synthetic rides.
pub const TEST_ORIGIN: (f64, f64) = (9.0, 38.0);

/// Degrees of latitude per kilometre (meridian arc).
pub const DEGREES_PER_KM: f64 = 180.0 / (std::f64::consts::PI * EARTH_RADIUS_KM);

/// A fix with good accuracy at the test origin shifted `north_km` north.
pub fn fix_north_of_origin(north_km: f64, timestamp_ms: u64) -> Fix {
    Fix::new(
        TEST_ORIGIN.0 + north_km * DEGREES_PER_KM,
        TEST_ORIGIN.1,
        timestamp_ms,
    )
    .with_accuracy(5.0)
}

/// A ride heading due north at a constant speed, one fix every `interval_ms`.
pub fn straight_drive(speed_kmh: f64, duration_secs: u64, interval_ms: u64) -> Vec<Fix> {
    let step_ms = interval_ms.max(1);
    (0..=duration_secs * 1000 / step_ms)
        .map(|i| {
            let t_ms = i * step_ms;
            let travelled_km = speed_kmh * t_ms as f64 / 3_600_000.0;
            fix_north_of_origin(travelled_km, t_ms)
        })
        .collect()
}

/// Knobs for a noisy synthetic trace.
#[derive(Debug, Clone, Copy)]
pub struct JitterProfile {
    pub speed_kmh: f64,
    /// Standard GPS scatter applied to every fix.
    pub jitter_m: f64,
    /// Probability that a fix is a wild outlier hundreds of metres off.
    pub outlier_probability: f64,
    /// Probability that a fix reports accuracy worse than the filter accepts.
    pub poor_accuracy_probability: f64,
}

impl Default for JitterProfile {
    fn default() -> Self {
        Self {
            speed_kmh: 30.0,
            jitter_m: 3.0,
            outlier_probability: 0.05,
            poor_accuracy_probability: 0.05,
        }
    }
}

/// Seeded noisy drive: the same seed always yields the same trace.
///
/// The first fix is always clean so the ride gets a sound lock.
pub fn jittered_drive(seed: u64, duration_secs: u64, profile: JitterProfile) -> Trace {
    let mut rng = StdRng::seed_from_u64(seed);
    let fixes = straight_drive(profile.speed_kmh, duration_secs, 1_000)
        .into_iter()
        .enumerate()
        .map(|(index, fix)| {
            if index == 0 {
                return fix;
            }
            let mut offset_m = rng.gen_range(-profile.jitter_m..=profile.jitter_m);
            if rng.gen_bool(profile.outlier_probability) {
                offset_m += rng.gen_range(300.0..800.0);
            }
            let accuracy_m = if rng.gen_bool(profile.poor_accuracy_probability) {
                rng.gen_range(80.0..200.0)
            } else {
                rng.gen_range(3.0..15.0)
            };
            Fix {
                latitude: fix.latitude + offset_m / 1000.0 * DEGREES_PER_KM,
                accuracy_m: Some(accuracy_m),
                ..fix
            }
        })
        .collect::<Vec<_>>();
    Trace::from_fixes(fixes)
}

/// `fixes` plus a tagged command entry at each `(at_ms, command)`.
pub fn trace_with_commands(
    fixes: Vec<Fix>,
    commands: &[(u64, crate::ride::RideCommand)],
) -> Trace {
    let mut entries: Vec<TraceEntry> = fixes.into_iter().map(TraceEntry::Fix).collect();
    entries.extend(
        commands
            .iter()
            .map(|&(at_ms, command)| TraceEntry::Command { at_ms, command }),
    );
    Trace::new(entries)
}
