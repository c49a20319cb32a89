use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use meter_core::history::RideHistory;
use meter_core::location::TraceSource;
use meter_core::persistence::{recover_active_ride, SnapshotStore};
use meter_core::ride::{format_duration, CompletedRide, RideCommand, RidePhase, RideState};
use meter_core::service::{MeterHandle, MeterService, ServiceConfig};
use meter_core::trace::Trace;
use tracing::{info, warn};

use super::{print_receipt, CliError, CliResult, Context};

pub fn run(ctx: &Context, trace_path: &Path, speedup: f64, resume: bool) -> CliResult {
    if !speedup.is_finite() || speedup <= 0.0 {
        return Err(CliError::Usage(format!("speedup must be positive, got {speedup}")));
    }
    let trace = Trace::load(trace_path)?;
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|error| CliError::Io(format!("failed to start runtime: {error}")))?;
    runtime.block_on(drive(ctx, trace, speedup, resume))
}

async fn drive(ctx: &Context, trace: Trace, speedup: f64, resume: bool) -> CliResult {
    let store = Arc::new(ctx.store());
    let saved = if resume {
        let saved = recover_active_ride(store.as_ref());
        if saved.is_none() {
            return Err(CliError::Usage("no interrupted ride to resume".to_string()));
        }
        saved
    } else {
        None
    };

    let source = TraceSource::new(trace.location_events(), speedup);
    let finished = source.finished();
    let config = ServiceConfig {
        tick_interval: Duration::from_secs(1).div_f64(speedup),
        snapshot_interval: Duration::from_secs(2).div_f64(speedup),
        filter: ctx.filter,
    };
    let handle = MeterService::spawn(config, store.clone(), Some(Box::new(source)));

    match saved {
        Some(state) => {
            let restored = handle.restore(state).await?;
            info!(
                distance_km = restored.distance_km,
                elapsed_seconds = restored.elapsed_seconds,
                "resuming interrupted ride"
            );
        }
        None => {
            handle.start().await?;
        }
    }

    let mut driver = tokio::spawn(play_commands(handle.clone(), trace.commands(), speedup));
    let display = tokio::spawn(show_progress(handle.clone()));

    // The driver task only finishes early when the trace says stop.
    tokio::select! {
        _ = finished.notified() => {}
        _ = &mut driver => info!("trace requested stop"),
    }
    driver.abort();
    display.abort();

    let completed = handle.stop().await?;
    let stopped = handle.current();
    handle.flush().await?;

    println!();
    print_receipt(&completed);
    let id = archive(&ctx.history(), store.as_ref(), stopped, completed)?;
    println!("Saved as ride #{id}");
    Ok(())
}

/// Append a finished ride to the history. Stopping already cleared the snapshot, so
/// when the append fails the ride is saved again, paused, for `recover --finish`.
fn archive(
    history: &dyn RideHistory,
    store: &dyn SnapshotStore,
    mut stopped: RideState,
    completed: CompletedRide,
) -> Result<u64, CliError> {
    match history.append(completed) {
        Ok(id) => Ok(id),
        Err(error) => {
            stopped.phase = RidePhase::Paused;
            match store.save_active_ride(&stopped) {
                Ok(()) => warn!(%error, "history not updated, ride kept for recovery"),
                Err(save_error) => warn!(%save_error, "failed to keep the unsaved ride"),
            }
            Err(error.into())
        }
    }
}

/// Send the trace's driver commands at their (scaled) offsets.
async fn play_commands(handle: MeterHandle, commands: Vec<(u64, RideCommand)>, speedup: f64) {
    let started = tokio::time::Instant::now();
    for (offset_ms, command) in commands {
        let due = started + Duration::from_millis(offset_ms).div_f64(speedup);
        tokio::time::sleep_until(due).await;
        let result = match command {
            RideCommand::Pause => handle.pause().await.map(|_| ()),
            RideCommand::Resume => handle.resume().await.map(|_| ()),
            RideCommand::ToggleWaiting => handle.toggle_waiting().await.map(|_| ()),
            RideCommand::Stop => return,
            RideCommand::Start => continue,
        };
        if let Err(error) = result {
            warn!(%error, %command, "trace command refused");
        }
    }
    std::future::pending::<()>().await;
}

/// One status line per metered second.
async fn show_progress(handle: MeterHandle) {
    let mut updates = handle.subscribe();
    let mut last_second = None;
    while updates.changed().await.is_ok() {
        let state = updates.borrow_and_update().clone();
        if last_second == Some(state.elapsed_seconds) {
            continue;
        }
        last_second = Some(state.elapsed_seconds);
        let lock = if state.has_lock() { "" } else { " (waiting for GPS)" };
        let waiting = if state.is_waiting_mode { " [waiting]" } else { "" };
        println!(
            "{:>9}  {:>7.3} km  {:>8.2}  {}{waiting}{lock}",
            format_duration(state.elapsed_seconds),
            state.distance_km,
            state.current_fare,
            state.phase,
        );
    }
}
