use meter_core::persistence::load_rates_or_default;
use meter_core::pricing::FareBreakdown;

use super::{CliError, CliResult, Context};

pub fn run(ctx: &Context, distance_km: f64, waiting_seconds: u64) -> CliResult {
    if !distance_km.is_finite() || distance_km < 0.0 {
        return Err(CliError::Usage(format!(
            "distance must be a non-negative number, got {distance_km}"
        )));
    }
    let rates = load_rates_or_default(&ctx.store());
    println!("{}", FareBreakdown::new(distance_km, waiting_seconds, &rates));
    Ok(())
}
