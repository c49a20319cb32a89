use chrono::Utc;
use meter_core::history::{format_timestamp_ms, RideHistory};
use meter_core::persistence::{recover_active_ride, SnapshotStore};
use meter_core::ride::{format_duration, Meter};
use tracing::info;

use super::{print_receipt, CliResult, Context};

pub fn run(ctx: &Context, discard: bool, finish: bool) -> CliResult {
    let store = ctx.store();
    let Some(saved) = recover_active_ride(&store) else {
        println!("No interrupted ride.");
        return Ok(());
    };

    if discard {
        store.clear_active_ride()?;
        info!("saved ride discarded");
        println!("Discarded the ride started {}.", format_timestamp_ms(saved.started_at_ms));
        return Ok(());
    }

    if finish {
        let mut meter = Meter::restore(saved, ctx.filter);
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let completed = meter.stop(now_ms)?;
        let id = ctx.history().append(completed.clone())?;
        store.clear_active_ride()?;
        print_receipt(&completed);
        println!("Saved as ride #{id}");
        return Ok(());
    }

    println!("Interrupted ride ({}):", saved.phase);
    println!("Started:   {}", format_timestamp_ms(saved.started_at_ms));
    println!("Distance:  {:.3} km", saved.distance_km);
    println!("Duration:  {}", format_duration(saved.elapsed_seconds));
    println!("Waiting:   {}", format_duration(saved.waiting_seconds));
    println!("Fare:      {:.2}", saved.current_fare);
    println!("\nContinue it with `live --resume`, or use --finish / --discard.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use meter_core::filter::FilterConfig;
    use meter_core::pricing::RateConfig;

    use super::*;

    fn save_running_ride(ctx: &Context, ticks: u64) {
        let mut meter = Meter::new(FilterConfig::default());
        meter.start(RateConfig::default(), 1_000).expect("start");
        for _ in 0..ticks {
            meter.on_clock_tick();
        }
        ctx.store().save_active_ride(meter.state()).expect("save");
    }

    #[test]
    fn finish_moves_the_ride_into_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = Context::in_dir(dir.path());
        save_running_ride(&ctx, 75);

        run(&ctx, false, true).expect("finish");

        let records = ctx.history().list().expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ride.elapsed_seconds, 75);
        assert!(ctx.store().load_active_ride().expect("load").is_none());
    }

    #[test]
    fn finish_keeps_the_snapshot_when_history_is_unwritable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = Context::in_dir(dir.path());
        save_running_ride(&ctx, 10);
        std::fs::write(ctx.history().path(), "{").expect("write");

        assert!(run(&ctx, false, true).is_err());
        assert!(recover_active_ride(&ctx.store()).is_some());
    }

    #[test]
    fn discard_clears_without_recording() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = Context::in_dir(dir.path());
        save_running_ride(&ctx, 5);

        run(&ctx, true, false).expect("discard");

        assert!(ctx.store().load_active_ride().expect("load").is_none());
        assert!(ctx.history().list().expect("list").is_empty());
    }

    #[test]
    fn nothing_to_recover_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = Context::in_dir(dir.path());
        run(&ctx, false, true).expect("no ride");
        assert!(ctx.history().list().expect("list").is_empty());
    }
}
