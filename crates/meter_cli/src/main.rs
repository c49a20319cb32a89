use std::path::PathBuf;
use std::process::exit;

use clap::{Args, Parser, Subcommand};
use meter_core::filter::FilterConfig;
use tracing_subscriber::EnvFilter;

mod commands;

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "taxi-meter",
    about = "GPS taxi fare meter",
    long_about = "Price rides from GPS fixes: replay recorded traces, run a live meter,\n\
                  recover interrupted rides and manage rates and ride history."
)]
struct Cli {
    /// Directory holding rates, the active-ride snapshot and ride history
    #[arg(long, global = true, env = "TAXI_METER_DATA_DIR", default_value = "meter_data")]
    data_dir: PathBuf,

    #[command(flatten)]
    filter: FilterArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Location filter thresholds.
#[derive(Args, Clone, Copy)]
struct FilterArgs {
    /// Fixes reporting a worse accuracy (metres) are rejected
    #[arg(long, global = true, default_value_t = 50.0)]
    max_accuracy_m: f64,
    /// Implied speeds above this (km/h) are rejected as jumps
    #[arg(long, global = true, default_value_t = 150.0)]
    max_speed_kmh: f64,
    /// Below this speed (km/h) movement is treated as jitter unless waiting
    #[arg(long, global = true, default_value_t = 5.0)]
    min_moving_speed_kmh: f64,
}

impl From<FilterArgs> for FilterConfig {
    fn from(args: FilterArgs) -> Self {
        FilterConfig {
            max_accuracy_m: args.max_accuracy_m,
            max_speed_kmh: args.max_speed_kmh,
            min_moving_speed_kmh: args.min_moving_speed_kmh,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Price a distance and waiting time with the stored rates
    Fare {
        #[arg(long)]
        distance_km: f64,
        #[arg(long, default_value_t = 0)]
        waiting_seconds: u64,
    },
    /// Show or change the rate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Replay a trace file on virtual time and print the receipt
    Replay {
        trace: PathBuf,
        /// Append the finished ride to the history
        #[arg(long)]
        save_history: bool,
        /// Write crash-recovery snapshots while replaying
        #[arg(long)]
        persist: bool,
        /// Print the meter after every event
        #[arg(long, short)]
        verbose: bool,
    },
    /// Run the live meter service fed by a trace file in (scaled) real time
    Live {
        trace: PathBuf,
        /// Playback speed; metered seconds scale with it
        #[arg(long, default_value_t = 1.0)]
        speedup: f64,
        /// Continue the ride saved in the data directory instead of starting fresh
        #[arg(long)]
        resume: bool,
    },
    /// Inspect a ride left behind by a crash
    Recover {
        /// Delete the saved ride
        #[arg(long, conflicts_with = "finish")]
        discard: bool,
        /// Stop the saved ride now and move it to the history
        #[arg(long)]
        finish: bool,
    },
    /// List, delete or export finished rides
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the rates new rides will use
    Show,
    /// Change individual rates; unspecified ones keep their current value
    Set {
        #[arg(long)]
        base_fare: Option<f64>,
        #[arg(long)]
        per_km_rate: Option<f64>,
        #[arg(long)]
        per_minute_waiting_rate: Option<f64>,
        #[arg(long)]
        minimum_fare: Option<f64>,
        #[arg(long)]
        night_multiplier: Option<f64>,
    },
    /// Restore the default rates
    Reset,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Print finished rides, newest first
    List {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete one ride by id
    Delete { id: u64 },
    /// Write all rides as CSV to a file, or stdout when omitted
    Export { output: Option<PathBuf> },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let ctx = commands::Context {
        data_dir: cli.data_dir,
        filter: cli.filter.into(),
    };

    let result = match cli.command {
        Commands::Fare {
            distance_km,
            waiting_seconds,
        } => commands::fare::run(&ctx, distance_km, waiting_seconds),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(&ctx),
            ConfigAction::Set {
                base_fare,
                per_km_rate,
                per_minute_waiting_rate,
                minimum_fare,
                night_multiplier,
            } => commands::config::set(
                &ctx,
                commands::config::RateOverrides {
                    base_fare,
                    per_km_rate,
                    per_minute_waiting_rate,
                    minimum_fare,
                    night_multiplier,
                },
            ),
            ConfigAction::Reset => commands::config::reset(&ctx),
        },
        Commands::Replay {
            trace,
            save_history,
            persist,
            verbose,
        } => commands::replay::run(
            &ctx,
            &trace,
            commands::replay::ReplayFlags {
                save_history,
                persist,
                verbose,
            },
        ),
        Commands::Live {
            trace,
            speedup,
            resume,
        } => commands::live::run(&ctx, &trace, speedup, resume),
        Commands::Recover { discard, finish } => commands::recover::run(&ctx, discard, finish),
        Commands::History { action } => match action {
            HistoryAction::List { json } => commands::history::list(&ctx, json),
            HistoryAction::Delete { id } => commands::history::delete(&ctx, id),
            HistoryAction::Export { output } => commands::history::export(&ctx, output.as_deref()),
        },
    };

    if let Err(error) = result {
        eprintln!("error: {error}");
        exit(1);
    }
}
