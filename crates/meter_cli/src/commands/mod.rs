use std::fmt;
use std::path::PathBuf;

use meter_core::filter::FilterConfig;
use meter_core::history::{format_timestamp_ms, JsonHistoryStore};
use meter_core::persistence::{JsonFileStore, PersistenceError};
use meter_core::pricing::ConfigurationError;
use meter_core::ride::{format_duration, CompletedRide, TransitionError};
use meter_core::service::ServiceError;
use meter_core::trace::TraceError;

pub mod config;
pub mod fare;
pub mod history;
pub mod live;
pub mod recover;
pub mod replay;

/// Settings shared by every subcommand.
pub struct Context {
    pub data_dir: PathBuf,
    pub filter: FilterConfig,
}

impl Context {
    #[cfg(test)]
    pub fn in_dir(dir: &std::path::Path) -> Self {
        Context {
            data_dir: dir.to_path_buf(),
            filter: FilterConfig::default(),
        }
    }

    pub fn store(&self) -> JsonFileStore {
        JsonFileStore::new(&self.data_dir)
    }

    pub fn history(&self) -> JsonHistoryStore {
        JsonHistoryStore::in_dir(&self.data_dir)
    }
}

#[derive(Debug)]
pub enum CliError {
    Persistence(PersistenceError),
    Configuration(ConfigurationError),
    Trace(TraceError),
    Service(ServiceError),
    Io(String),
    Usage(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Persistence(error) => write!(f, "{error}"),
            CliError::Configuration(error) => write!(f, "invalid rates: {error}"),
            CliError::Trace(error) => write!(f, "{error}"),
            CliError::Service(error) => write!(f, "{error}"),
            CliError::Io(message) | CliError::Usage(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<PersistenceError> for CliError {
    fn from(error: PersistenceError) -> Self {
        CliError::Persistence(error)
    }
}

impl From<ConfigurationError> for CliError {
    fn from(error: ConfigurationError) -> Self {
        CliError::Configuration(error)
    }
}

impl From<TraceError> for CliError {
    fn from(error: TraceError) -> Self {
        CliError::Trace(error)
    }
}

impl From<ServiceError> for CliError {
    fn from(error: ServiceError) -> Self {
        CliError::Service(error)
    }
}

impl From<TransitionError> for CliError {
    fn from(error: TransitionError) -> Self {
        CliError::Service(ServiceError::Transition(error))
    }
}

pub type CliResult = Result<(), CliError>;

/// Multi-line summary of a finished ride.
pub fn print_receipt(ride: &CompletedRide) {
    println!("Started:   {}", format_timestamp_ms(ride.started_at_ms));
    println!("Ended:     {}", format_timestamp_ms(ride.ended_at_ms));
    println!("Distance:  {:.3} km", ride.distance_km);
    println!("Duration:  {}", format_duration(ride.elapsed_seconds));
    println!("Waiting:   {}", format_duration(ride.waiting_seconds));
    println!("Fare:      {:.2}", ride.fare);
}
