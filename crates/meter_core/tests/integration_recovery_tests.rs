mod support;

use std::fs;

use meter_core::filter::FilterConfig;
use meter_core::persistence::{
    load_rates_or_default, recover_active_ride, JsonFileStore, PersistenceError, SnapshotStore,
    ACTIVE_RIDE_FILE_NAME, RATE_CONFIG_FILE_NAME,
};
use meter_core::pricing::RateConfig;
use meter_core::ride::{Meter, RidePhase};
use meter_core::test_helpers::straight_drive;

use support::meter::{feed, started_meter_with, tick};

#[test]
fn crashed_ride_resumes_with_the_same_fare() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::new(dir.path());
    let rates = RateConfig {
        base_fare: 60.0,
        ..RateConfig::default()
    };

    let mut meter = started_meter_with(rates);
    feed(&mut meter, &straight_drive(45.0, 240, 1_000));
    tick(&mut meter, 240);
    meter.toggle_waiting_mode().expect("toggle");
    tick(&mut meter, 30);
    store.save_active_ride(meter.state()).expect("snapshot");
    let before_crash = meter.state().clone();
    drop(meter);

    // Process restarts: a fresh store instance over the same directory.
    let reopened = JsonFileStore::new(dir.path());
    let saved = recover_active_ride(&reopened).expect("ride offered for resumption");
    let mut resumed = Meter::restore(saved, FilterConfig::default());

    assert_eq!(resumed.state(), &before_crash);
    assert_eq!(resumed.state().rates, rates);
    assert!(resumed.state().is_waiting_mode);

    tick(&mut resumed, 60);
    assert_eq!(resumed.state().waiting_seconds, 90);
    let completed = resumed.stop(400_000).expect("stop");
    assert!(completed.fare > before_crash.current_fare);
    reopened.clear_active_ride().expect("clear");
    assert!(recover_active_ride(&reopened).is_none());
}

#[test]
fn paused_rides_are_recovered_but_finished_ones_are_not() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::new(dir.path());

    let mut meter = started_meter_with(RateConfig::default());
    tick(&mut meter, 5);
    meter.pause().expect("pause");
    store.save_active_ride(meter.state()).expect("save");
    let recovered = recover_active_ride(&store).expect("paused ride is resumable");
    assert_eq!(recovered.phase, RidePhase::Paused);

    meter.resume().expect("resume");
    meter.stop(5_000).expect("stop");
    store.save_active_ride(meter.state()).expect("save stopped");
    assert!(recover_active_ride(&store).is_none());
}

#[test]
fn corrupted_snapshot_is_reported_and_not_offered() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(ACTIVE_RIDE_FILE_NAME), "{ not json").expect("write");
    let store = JsonFileStore::new(dir.path());

    assert!(matches!(
        store.load_active_ride(),
        Err(PersistenceError::InvalidFormat(_)) | Err(PersistenceError::Serde(_))
    ));
    assert!(recover_active_ride(&store).is_none());
}

#[test]
fn tampered_snapshot_is_repriced_on_restore() {
    let mut meter = started_meter_with(RateConfig::default());
    feed(&mut meter, &straight_drive(60.0, 300, 2_000));
    tick(&mut meter, 300);

    let mut state = meter.state().clone();
    state.current_fare = 1.0;
    state.waiting_seconds = 10_000;
    let restored = Meter::restore(state, FilterConfig::default());

    assert_eq!(restored.state().waiting_seconds, 300);
    let expected = 50.0 + restored.state().distance_km * 20.0 + 5.0 * 5.0;
    assert!((restored.state().current_fare - expected).abs() < 1e-9);
}

#[test]
fn stored_rate_configuration_is_used_and_bad_ones_fall_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::new(dir.path());
    assert_eq!(load_rates_or_default(&store), RateConfig::default());

    let night = RateConfig {
        night_multiplier: 1.5,
        ..RateConfig::default()
    };
    store.save_rate_config(&night).expect("save");
    assert_eq!(load_rates_or_default(&store), night);

    fs::write(dir.path().join(RATE_CONFIG_FILE_NAME), "[]").expect("write");
    assert_eq!(load_rates_or_default(&store), RateConfig::default());
}
