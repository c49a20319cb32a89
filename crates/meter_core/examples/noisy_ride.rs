//! Replay a seeded noisy 20 minute drive and print what the filter did with it.
//!
//! Run with: cargo run -p meter_core --example noisy_ride

use meter_core::ride::format_duration;
use meter_core::runner::{replay_trace, ReplayOptions};
use meter_core::test_helpers::{jittered_drive, JitterProfile};

fn main() {
    const SEED: u64 = 123;
    const RIDE_SECONDS: u64 = 20 * 60;

    let profile = JitterProfile {
        speed_kmh: 35.0,
        outlier_probability: 0.08,
        poor_accuracy_probability: 0.1,
        ..JitterProfile::default()
    };
    let trace = jittered_drive(SEED, RIDE_SECONDS, profile);
    let outcome = match replay_trace(&trace, ReplayOptions::default(), None) {
        Ok(outcome) => outcome,
        Err(error) => {
            eprintln!("replay failed: {error}");
            return;
        }
    };

    let ride = &outcome.completed;
    let stats = &outcome.stats;
    let ideal_km = profile.speed_kmh * RIDE_SECONDS as f64 / 3600.0;
    println!("--- Noisy ride ({} s at {} km/h, seed {SEED}) ---", RIDE_SECONDS, profile.speed_kmh);
    println!("Fixes: {} seen, {} accepted", stats.fixes_seen, stats.fixes_accepted);
    for (reason, count) in &stats.rejected {
        println!("  rejected {reason}: {count}");
    }
    println!("Distance: {:.3} km (ideal {:.3} km)", ride.distance_km, ideal_km);
    println!("Duration: {}", format_duration(ride.elapsed_seconds));
    println!("Fare: {:.2}", ride.fare);
    println!("\n{}", outcome.final_state.fare_breakdown());
}
