//! Recovery/persistence contract: snapshot the running ride and the rate configuration.
//!
//! [SnapshotStore] is the key-value collaborator. [JsonFileStore] keeps one versioned
//! JSON document per key in a data directory and replaces files atomically (temp file,
//! `sync_all`, rename), so a crash mid-write leaves the previous snapshot intact.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pricing::RateConfig;
use crate::ride::RideState;

pub const ACTIVE_RIDE_FILE_NAME: &str = "active_ride.json";
pub const RATE_CONFIG_FILE_NAME: &str = "rate_config.json";
pub(crate) const STORE_FILE_VERSION: u32 = 1;

#[derive(Debug)]
pub enum PersistenceError {
    Io(String),
    Serde(serde_json::Error),
    InvalidFormat(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io(message) => write!(f, "{message}"),
            PersistenceError::Serde(err) => write!(f, "serde error: {err}"),
            PersistenceError::InvalidFormat(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistenceError::Serde(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(value: serde_json::Error) -> Self {
        PersistenceError::Serde(value)
    }
}

/// Durable key-value store for the active ride snapshot and the rate configuration.
pub trait SnapshotStore: Send + Sync {
    fn save_active_ride(&self, state: &RideState) -> Result<(), PersistenceError>;
    fn load_active_ride(&self) -> Result<Option<RideState>, PersistenceError>;
    fn clear_active_ride(&self) -> Result<(), PersistenceError>;
    fn save_rate_config(&self, config: &RateConfig) -> Result<(), PersistenceError>;
    fn load_rate_config(&self) -> Result<Option<RateConfig>, PersistenceError>;
}

/// Stored rates, or the defaults when none are saved or the saved ones are unusable.
pub fn load_rates_or_default(store: &dyn SnapshotStore) -> RateConfig {
    match store.load_rate_config() {
        Ok(Some(config)) => {
            let (config, error) = config.or_default();
            if let Some(error) = error {
                warn!(%error, "stored rate configuration is invalid, using defaults");
            }
            config
        }
        Ok(None) => RateConfig::default(),
        Err(error) => {
            warn!(%error, "failed to load rate configuration, using defaults");
            RateConfig::default()
        }
    }
}

/// A saved ride that can be offered for resumption. Finished or idle snapshots are not.
pub fn recover_active_ride(store: &dyn SnapshotStore) -> Option<RideState> {
    match store.load_active_ride() {
        Ok(Some(state)) if state.phase.is_running() => Some(state),
        Ok(_) => None,
        Err(error) => {
            warn!(%error, "failed to load saved ride snapshot");
            None
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope<T> {
    version: u32,
    payload: T,
}

/// One JSON file per key under `dir`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }
}

impl SnapshotStore for JsonFileStore {
    fn save_active_ride(&self, state: &RideState) -> Result<(), PersistenceError> {
        write_document(&self.path(ACTIVE_RIDE_FILE_NAME), state)
    }

    fn load_active_ride(&self) -> Result<Option<RideState>, PersistenceError> {
        read_document(&self.path(ACTIVE_RIDE_FILE_NAME))
    }

    fn clear_active_ride(&self) -> Result<(), PersistenceError> {
        let path = self.path(ACTIVE_RIDE_FILE_NAME);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(PersistenceError::Io(format!(
                "failed to remove '{}': {error}",
                path.display()
            ))),
        }
    }

    fn save_rate_config(&self, config: &RateConfig) -> Result<(), PersistenceError> {
        write_document(&self.path(RATE_CONFIG_FILE_NAME), config)
    }

    fn load_rate_config(&self) -> Result<Option<RateConfig>, PersistenceError> {
        read_document(&self.path(RATE_CONFIG_FILE_NAME))
    }
}

/// In-process store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    active_ride: Mutex<Option<RideState>>,
    rate_config: Mutex<Option<RateConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> PersistenceError {
    PersistenceError::Io("memory store lock poisoned".to_string())
}

impl SnapshotStore for MemoryStore {
    fn save_active_ride(&self, state: &RideState) -> Result<(), PersistenceError> {
        *self.active_ride.lock().map_err(|_| poisoned())? = Some(state.clone());
        Ok(())
    }

    fn load_active_ride(&self) -> Result<Option<RideState>, PersistenceError> {
        Ok(self.active_ride.lock().map_err(|_| poisoned())?.clone())
    }

    fn clear_active_ride(&self) -> Result<(), PersistenceError> {
        *self.active_ride.lock().map_err(|_| poisoned())? = None;
        Ok(())
    }

    fn save_rate_config(&self, config: &RateConfig) -> Result<(), PersistenceError> {
        *self.rate_config.lock().map_err(|_| poisoned())? = Some(*config);
        Ok(())
    }

    fn load_rate_config(&self) -> Result<Option<RateConfig>, PersistenceError> {
        Ok(*self.rate_config.lock().map_err(|_| poisoned())?)
    }
}

pub(crate) fn read_document<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, PersistenceError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(PersistenceError::Io(format!(
                "failed to read '{}': {error}",
                path.display()
            )))
        }
    };

    let envelope: Envelope<T> = serde_json::from_str(&contents).map_err(|error| {
        PersistenceError::InvalidFormat(format!("invalid document '{}': {error}", path.display()))
    })?;

    if envelope.version != STORE_FILE_VERSION {
        return Err(PersistenceError::InvalidFormat(format!(
            "unsupported document version {} in '{}'",
            envelope.version,
            path.display()
        )));
    }

    Ok(Some(envelope.payload))
}

pub(crate) fn write_document<T: Serialize>(
    path: &Path,
    payload: &T,
) -> Result<(), PersistenceError> {
    let envelope = Envelope {
        version: STORE_FILE_VERSION,
        payload,
    };
    let serialized = serde_json::to_string_pretty(&envelope)?;
    atomic_write(path, serialized.as_bytes())
}

/// Write `data` to a temp file next to `path`, flush it, then rename over `path`.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|error| {
                PersistenceError::Io(format!(
                    "failed to create directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("json.tmp.{nanos}"));
    let mut temp_file = File::create(&temp_path).map_err(|error| {
        PersistenceError::Io(format!(
            "failed to create temp file '{}': {error}",
            temp_path.display()
        ))
    })?;
    temp_file.write_all(data).map_err(|error| {
        let _ = fs::remove_file(&temp_path);
        PersistenceError::Io(format!(
            "failed to write temp file '{}': {error}",
            temp_path.display()
        ))
    })?;
    temp_file.sync_all().map_err(|error| {
        let _ = fs::remove_file(&temp_path);
        PersistenceError::Io(format!(
            "failed to flush temp file '{}': {error}",
            temp_path.display()
        ))
    })?;
    drop(temp_file);

    fs::rename(&temp_path, path).map_err(|error| {
        let _ = fs::remove_file(&temp_path);
        PersistenceError::Io(format!(
            "failed to move '{}' to '{}': {error}",
            temp_path.display(),
            path.display()
        ))
    })
}
