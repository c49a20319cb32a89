use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the taxi meter workspace",
    long_about = "A unified CLI for replaying sample rides, benchmarks,\n\
                  and CI checks in the taxi meter workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the bundled sample trace through the meter CLI
    Replay {
        /// Trace file to replay
        #[arg(long, default_value = "crates/meter_cli/traces/short_ride.json")]
        trace: String,
        /// Data directory for rates and history
        #[arg(long, env = "TAXI_METER_DATA_DIR", default_value = "target/meter_data")]
        data_dir: String,
    },
    /// Run the seeded noisy-ride example
    NoisyRide,
    /// Run Criterion benchmarks
    Bench,
    /// Compare benchmarks: stash changes, create baseline, restore, compare
    BenchCompare,
    /// Run CI checks (fmt, clippy, tests, examples, benchmarks)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Run the example program and the sample replay
    Examples,
    /// Run benchmarks
    Bench,
    /// Run check + examples + bench
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn spawn(program: &str, args: &[&str]) -> ExitStatus {
    eprintln!("+ {program} {}", args.join(" "));
    match Command::new(program).args(args).status() {
        Ok(status) => status,
        Err(error) => {
            eprintln!("failed to execute {program}: {error}");
            exit(1);
        }
    }
}

fn run_cargo(args: &[&str]) {
    let status = spawn("cargo", args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_git(args: &[&str]) {
    let status = spawn("git", args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn replay_sample(trace: &str, data_dir: &str) {
    run_cargo(&[
        "run",
        "-p",
        "meter_cli",
        "--",
        "--data-dir",
        data_dir,
        "replay",
        trace,
    ]);
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test meter_core");
    run_cargo(&["test", "-p", "meter_core"]);

    step("Test meter_cli");
    run_cargo(&["test", "-p", "meter_cli"]);
}

fn ci_examples() {
    step("Run noisy_ride");
    run_cargo(&["run", "-p", "meter_core", "--example", "noisy_ride", "--release"]);

    step("Replay the sample trace");
    replay_sample("crates/meter_cli/traces/short_ride.json", "target/meter_data");
}

fn ci_bench() {
    step("Run benchmarks");
    run_cargo(&["bench", "--package", "meter_core", "--bench", "performance"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { trace, data_dir } => replay_sample(&trace, &data_dir),
        Commands::NoisyRide => {
            run_cargo(&["run", "-p", "meter_core", "--example", "noisy_ride", "--release"]);
        }
        Commands::Bench => ci_bench(),
        Commands::BenchCompare => {
            let baseline_dir = Path::new("target/criterion");
            if baseline_dir.exists() {
                step("Removing existing benchmark data");
                if let Err(error) = std::fs::remove_dir_all(baseline_dir) {
                    eprintln!("failed to remove target/criterion: {error}");
                    exit(1);
                }
            }

            step("Stashing current changes");
            run_git(&["stash", "push", "-m", "Temporary stash for benchmark comparison"]);

            step("Running benchmark to create baseline");
            run_cargo(&[
                "bench",
                "--package",
                "meter_core",
                "--bench",
                "performance",
                "--",
                "--save-baseline",
                "main",
            ]);

            step("Reapplying changes");
            run_git(&["stash", "pop"]);

            step("Running benchmark comparing against baseline");
            run_cargo(&[
                "bench",
                "--package",
                "meter_core",
                "--bench",
                "performance",
                "--",
                "--baseline",
                "main",
            ]);
        }
        Commands::Ci { job } => match job {
            CiJob::Check => ci_check(),
            CiJob::Examples => ci_examples(),
            CiJob::Bench => ci_bench(),
            CiJob::All => {
                ci_check();
                ci_examples();
                ci_bench();
            }
        },
    }
}
