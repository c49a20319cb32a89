use meter_core::persistence::{load_rates_or_default, SnapshotStore};
use meter_core::pricing::RateConfig;
use tracing::info;

use super::{CliError, CliResult, Context};

/// Rate fields given on the command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct RateOverrides {
    pub base_fare: Option<f64>,
    pub per_km_rate: Option<f64>,
    pub per_minute_waiting_rate: Option<f64>,
    pub minimum_fare: Option<f64>,
    pub night_multiplier: Option<f64>,
}

impl RateOverrides {
    fn apply(self, rates: RateConfig) -> RateConfig {
        RateConfig {
            base_fare: self.base_fare.unwrap_or(rates.base_fare),
            per_km_rate: self.per_km_rate.unwrap_or(rates.per_km_rate),
            per_minute_waiting_rate: self
                .per_minute_waiting_rate
                .unwrap_or(rates.per_minute_waiting_rate),
            minimum_fare: self.minimum_fare.unwrap_or(rates.minimum_fare),
            night_multiplier: self.night_multiplier.unwrap_or(rates.night_multiplier),
        }
    }
}

fn print_rates(rates: &RateConfig) -> CliResult {
    let json = serde_json::to_string_pretty(rates)
        .map_err(|error| CliError::Io(format!("failed to serialize rates: {error}")))?;
    println!("{json}");
    Ok(())
}

pub fn show(ctx: &Context) -> CliResult {
    print_rates(&load_rates_or_default(&ctx.store()))
}

pub fn set(ctx: &Context, overrides: RateOverrides) -> CliResult {
    let store = ctx.store();
    let rates = overrides.apply(load_rates_or_default(&store));
    rates.validate()?;
    store.save_rate_config(&rates)?;
    info!(dir = %ctx.data_dir.display(), "rate configuration saved");
    print_rates(&rates)
}

pub fn reset(ctx: &Context) -> CliResult {
    let rates = RateConfig::default();
    ctx.store().save_rate_config(&rates)?;
    info!("rate configuration reset to defaults");
    print_rates(&rates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_only_replace_given_fields() {
        let overrides = RateOverrides {
            per_km_rate: Some(35.0),
            ..RateOverrides::default()
        };
        let rates = overrides.apply(RateConfig::default());
        assert_eq!(rates.per_km_rate, 35.0);
        assert_eq!(rates.base_fare, RateConfig::default().base_fare);
    }

    #[test]
    fn set_rejects_invalid_rates_without_saving() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = Context {
            data_dir: dir.path().to_path_buf(),
            filter: Default::default(),
        };
        let result = set(
            &ctx,
            RateOverrides {
                night_multiplier: Some(0.5),
                ..RateOverrides::default()
            },
        );
        assert!(matches!(result, Err(CliError::Configuration(_))));
        assert_eq!(ctx.store().load_rate_config().expect("load"), None);
    }
}
