mod support;

use std::fs;

use meter_core::filter::RejectReason;
use meter_core::persistence::{JsonFileStore, SnapshotStore};
use meter_core::ride::RideCommand;
use meter_core::runner::{replay_trace, Replay, ReplayOptions};
use meter_core::test_helpers::{jittered_drive, straight_drive, trace_with_commands, JitterProfile};
use meter_core::trace::{Trace, TraceError};

use support::meter::assert_close;

#[test]
fn clean_drive_replays_to_the_expected_fare() {
    // 3 km at 36 km/h with a 60 s wait in the middle.
    let trace = trace_with_commands(
        straight_drive(36.0, 300, 1_000),
        &[(100_000, RideCommand::ToggleWaiting), (160_000, RideCommand::ToggleWaiting)],
    );
    let outcome = replay_trace(&trace, ReplayOptions::default(), None).expect("replay");

    assert_close(outcome.completed.distance_km, 3.0, 1e-6);
    assert_eq!(outcome.completed.elapsed_seconds, 300);
    assert_eq!(outcome.completed.waiting_seconds, 60);
    // 50 + 60 + 5
    assert_close(outcome.completed.fare, 115.0, 1e-6);
    assert_eq!(outcome.stats.fixes_accepted, 301);
    assert_eq!(outcome.stats.rejected_total(), 0);
}

#[test]
fn noisy_drive_rejects_outliers_and_poor_accuracy() {
    let profile = JitterProfile {
        outlier_probability: 0.1,
        poor_accuracy_probability: 0.1,
        ..JitterProfile::default()
    };
    let trace = jittered_drive(42, 600, profile);
    let outcome = replay_trace(&trace, ReplayOptions::default(), None).expect("replay");
    let stats = &outcome.stats;

    assert_eq!(stats.fixes_seen, 601);
    assert_eq!(stats.fixes_accepted + stats.rejected_total(), stats.fixes_seen);
    assert!(stats.rejected.get(&RejectReason::PoorAccuracy).copied().unwrap_or(0) > 0);
    assert!(stats.rejected.get(&RejectReason::ImplausibleJump).copied().unwrap_or(0) > 0);
    // 30 km/h for ten minutes is 5 km; outliers must not inflate it much.
    assert!(outcome.completed.distance_km > 4.0, "{}", outcome.completed.distance_km);
    assert!(outcome.completed.distance_km < 5.5, "{}", outcome.completed.distance_km);
}

#[test]
fn replay_of_the_same_trace_is_deterministic() {
    let trace = jittered_drive(9, 300, JitterProfile::default());
    let first = replay_trace(&trace, ReplayOptions::default(), None).expect("replay");
    let second = replay_trace(&trace, ReplayOptions::default(), None).expect("replay");
    assert_eq!(first.completed, second.completed);
    assert_eq!(first.final_state, second.final_state);
    assert_eq!(first.stats, second.stats);
}

#[test]
fn interrupted_replay_leaves_a_recoverable_snapshot_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::new(dir.path());
    let trace = Trace::from_fixes(straight_drive(30.0, 120, 1_000));

    let mut replay = Replay::new(&trace, ReplayOptions::default(), Some(&store)).expect("replay");
    while replay.now() < 61_000 && replay.run_next_event() {}
    let live = replay.state().clone();

    let saved = store.load_active_ride().expect("load").expect("snapshot written");
    assert_eq!(saved.elapsed_seconds, 60);
    assert!(saved.distance_km <= live.distance_km);

    let outcome = replay.finish();
    assert_eq!(outcome.completed.elapsed_seconds, 120);
    assert!(store.load_active_ride().expect("load").is_none());
}

#[test]
fn trace_files_round_trip_through_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ride.json");
    let trace = trace_with_commands(
        straight_drive(20.0, 30, 5_000),
        &[(10_000, RideCommand::Pause), (20_000, RideCommand::Resume)],
    );
    fs::write(&path, trace.to_json().expect("json")).expect("write");

    let loaded = Trace::load(&path).expect("load");
    assert_eq!(loaded, trace);
    assert!(matches!(
        Trace::load(&dir.path().join("missing.json")),
        Err(TraceError::Io(_))
    ));
}
