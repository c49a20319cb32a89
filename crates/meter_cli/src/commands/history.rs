use std::fs::File;
use std::io;
use std::path::Path;

use meter_core::history::{export_csv, format_timestamp_ms, RideHistory};
use meter_core::ride::format_duration;

use super::{CliError, CliResult, Context};

pub fn list(ctx: &Context, json: bool) -> CliResult {
    let records = ctx.history().list()?;
    if json {
        let text = serde_json::to_string_pretty(&records)
            .map_err(|error| CliError::Io(format!("failed to serialize history: {error}")))?;
        println!("{text}");
        return Ok(());
    }
    if records.is_empty() {
        println!("No rides yet.");
        return Ok(());
    }
    println!(
        "{:>5}  {:<25}  {:>9}  {:>10}  {:>9}",
        "id", "started", "distance", "duration", "fare"
    );
    for record in &records {
        let ride = &record.ride;
        println!(
            "{:>5}  {:<25}  {:>6.2} km  {:>10}  {:>9.2}",
            record.id,
            format_timestamp_ms(ride.started_at_ms),
            ride.distance_km,
            format_duration(ride.elapsed_seconds),
            ride.fare
        );
    }
    Ok(())
}

pub fn delete(ctx: &Context, id: u64) -> CliResult {
    if ctx.history().delete(id)? {
        println!("Deleted ride #{id}.");
        Ok(())
    } else {
        Err(CliError::Usage(format!("no ride with id {id}")))
    }
}

pub fn export(ctx: &Context, output: Option<&Path>) -> CliResult {
    let records = ctx.history().list()?;
    match output {
        Some(path) => {
            let file = File::create(path).map_err(|error| {
                CliError::Io(format!("failed to create '{}': {error}", path.display()))
            })?;
            export_csv(&records, file)?;
            eprintln!("Exported {} rides to {}", records.len(), path.display());
        }
        None => export_csv(&records, io::stdout().lock())?,
    }
    Ok(())
}
