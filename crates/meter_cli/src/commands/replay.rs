use std::path::Path;

use meter_core::clock::EventKind;
use meter_core::history::RideHistory;
use meter_core::persistence::{load_rates_or_default, SnapshotStore};
use meter_core::ride::format_duration;
use meter_core::runner::{Replay, ReplayOptions, DEFAULT_SNAPSHOT_INTERVAL_MS};
use meter_core::trace::Trace;
use tracing::info;

use super::{print_receipt, CliResult, Context};

#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayFlags {
    pub save_history: bool,
    pub persist: bool,
    pub verbose: bool,
}

pub fn run(ctx: &Context, trace_path: &Path, flags: ReplayFlags) -> CliResult {
    let trace = Trace::load(trace_path)?;
    let store = ctx.store();
    let options = ReplayOptions {
        rates: load_rates_or_default(&store),
        filter: ctx.filter,
        snapshot_interval_ms: DEFAULT_SNAPSHOT_INTERVAL_MS,
    };
    let snapshots: Option<&dyn SnapshotStore> = if flags.persist { Some(&store) } else { None };

    let mut replay = Replay::new(&trace, options, snapshots)?;
    if flags.verbose {
        let start = replay.now();
        replay.run_until_empty_with_hook(usize::MAX, |state, event| {
            if event.kind == EventKind::SnapshotDue {
                return;
            }
            println!(
                "+{:>8.1}s {:<12} {:<8} {:>8.3} km {:>9} {:>9.2}",
                event.timestamp.saturating_sub(start) as f64 / 1000.0,
                format!("{:?}", event.kind),
                state.phase.to_string(),
                state.distance_km,
                format_duration(state.elapsed_seconds),
                state.current_fare,
            );
        });
    }
    let outcome = replay.finish();

    let stats = &outcome.stats;
    println!(
        "Fixes:     {} seen, {} accepted, {} rejected",
        stats.fixes_seen,
        stats.fixes_accepted,
        stats.rejected_total()
    );
    for (reason, count) in &stats.rejected {
        println!("           {count} {reason}");
    }
    if stats.commands_refused > 0 {
        println!("Commands:  {} refused", stats.commands_refused);
    }
    if flags.persist {
        println!(
            "Snapshots: {} written, {} failed",
            stats.snapshots_written, stats.snapshot_failures
        );
    }
    print_receipt(&outcome.completed);

    if flags.save_history {
        let id = ctx.history().append(outcome.completed)?;
        info!(id, "ride saved to history");
        println!("Saved as ride #{id}");
    }
    Ok(())
}
