//! Ride history: completed rides, newest first.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::persistence::{read_document, write_document, PersistenceError};
use crate::ride::CompletedRide;

pub const HISTORY_FILE_NAME: &str = "ride_history.json";

/// A completed ride with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRecord {
    pub id: u64,
    pub ride: CompletedRide,
}

/// Append/query/delete store for completed rides.
pub trait RideHistory: Send + Sync {
    /// Store `ride` and return its id. Ids are never reused.
    fn append(&self, ride: CompletedRide) -> Result<u64, PersistenceError>;

    /// All rides, newest (latest start) first.
    fn list(&self) -> Result<Vec<RideRecord>, PersistenceError>;

    /// Remove a ride. Returns `false` when no ride has that id.
    fn delete(&self, id: u64) -> Result<bool, PersistenceError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct HistoryLibrary {
    next_id: u64,
    rides: Vec<RideRecord>,
}

impl HistoryLibrary {
    fn append(&mut self, ride: CompletedRide) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.rides.push(RideRecord { id, ride });
        id
    }

    fn delete(&mut self, id: u64) -> bool {
        let before = self.rides.len();
        self.rides.retain(|record| record.id != id);
        self.rides.len() != before
    }

    fn newest_first(&self) -> Vec<RideRecord> {
        let mut rides = self.rides.clone();
        rides.sort_by(|left, right| {
            right
                .ride
                .started_at_ms
                .cmp(&left.ride.started_at_ms)
                .then_with(|| right.id.cmp(&left.id))
        });
        rides
    }
}

/// History kept as a single JSON document, rewritten atomically on every change.
#[derive(Debug)]
pub struct JsonHistoryStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at `<dir>/ride_history.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(HISTORY_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HistoryLibrary, PersistenceError> {
        Ok(read_document(&self.path)?.unwrap_or_default())
    }
}

impl RideHistory for JsonHistoryStore {
    fn append(&self, ride: CompletedRide) -> Result<u64, PersistenceError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| PersistenceError::Io("history lock poisoned".to_string()))?;
        let mut library = self.load()?;
        let id = library.append(ride);
        write_document(&self.path, &library)?;
        Ok(id)
    }

    fn list(&self) -> Result<Vec<RideRecord>, PersistenceError> {
        Ok(self.load()?.newest_first())
    }

    fn delete(&self, id: u64) -> Result<bool, PersistenceError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| PersistenceError::Io("history lock poisoned".to_string()))?;
        let mut library = self.load()?;
        if !library.delete(id) {
            return Ok(false);
        }
        write_document(&self.path, &library)?;
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct MemoryHistory {
    library: Mutex<HistoryLibrary>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RideHistory for MemoryHistory {
    fn append(&self, ride: CompletedRide) -> Result<u64, PersistenceError> {
        let mut library = self
            .library
            .lock()
            .map_err(|_| PersistenceError::Io("history lock poisoned".to_string()))?;
        Ok(library.append(ride))
    }

    fn list(&self) -> Result<Vec<RideRecord>, PersistenceError> {
        let library = self
            .library
            .lock()
            .map_err(|_| PersistenceError::Io("history lock poisoned".to_string()))?;
        Ok(library.newest_first())
    }

    fn delete(&self, id: u64) -> Result<bool, PersistenceError> {
        let mut library = self
            .library
            .lock()
            .map_err(|_| PersistenceError::Io("history lock poisoned".to_string()))?;
        Ok(library.delete(id))
    }
}

/// Epoch milliseconds as RFC 3339, or the raw number if out of range.
pub fn format_timestamp_ms(timestamp_ms: u64) -> String {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

/// Write one CSV row per ride, in the order given.
pub fn export_csv<W: Write>(records: &[RideRecord], writer: W) -> Result<(), PersistenceError> {
    let mut wtr = csv::Writer::from_writer(writer);
    let csv_error =
        |error: csv::Error| PersistenceError::Io(format!("failed to write csv: {error}"));

    wtr.write_record([
        "id",
        "started_at",
        "ended_at",
        "distance_km",
        "elapsed_seconds",
        "waiting_seconds",
        "fare",
        "start_lat",
        "start_lng",
        "end_lat",
        "end_lng",
    ])
    .map_err(csv_error)?;

    let coordinate = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
    for record in records {
        let ride = &record.ride;
        wtr.write_record([
            record.id.to_string(),
            format_timestamp_ms(ride.started_at_ms),
            format_timestamp_ms(ride.ended_at_ms),
            format!("{:.3}", ride.distance_km),
            ride.elapsed_seconds.to_string(),
            ride.waiting_seconds.to_string(),
            format!("{:.2}", ride.fare),
            coordinate(ride.start_fix.map(|fix| fix.latitude)),
            coordinate(ride.start_fix.map(|fix| fix.longitude)),
            coordinate(ride.end_fix.map(|fix| fix.latitude)),
            coordinate(ride.end_fix.map(|fix| fix.longitude)),
        ])
        .map_err(csv_error)?;
    }

    wtr.flush()
        .map_err(|error| PersistenceError::Io(format!("failed to flush csv: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Fix;

    fn ride(started_at_ms: u64, fare: f64) -> CompletedRide {
        CompletedRide {
            started_at_ms,
            ended_at_ms: started_at_ms + 600_000,
            distance_km: 2.5,
            elapsed_seconds: 600,
            waiting_seconds: 60,
            fare,
            start_fix: Some(Fix::new(9.0, 38.0, started_at_ms)),
            end_fix: None,
        }
    }

    #[test]
    fn list_is_newest_first() {
        let history = MemoryHistory::new();
        history.append(ride(2_000, 120.0)).expect("append");
        history.append(ride(9_000, 150.0)).expect("append");
        history.append(ride(5_000, 130.0)).expect("append");

        let starts: Vec<u64> = history
            .list()
            .expect("list")
            .into_iter()
            .map(|record| record.ride.started_at_ms)
            .collect();
        assert_eq!(starts, vec![9_000, 5_000, 2_000]);
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = JsonHistoryStore::in_dir(dir.path());
        let first = history.append(ride(1_000, 100.0)).expect("append");
        let second = history.append(ride(2_000, 100.0)).expect("append");

        assert!(history.delete(second).expect("delete"));
        assert!(!history.delete(second).expect("second delete"));
        let third = history.append(ride(3_000, 100.0)).expect("append");

        assert_eq!((first, second, third), (1, 2, 3));
        let ids: Vec<u64> = history
            .list()
            .expect("list")
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn history_persists_across_store_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        JsonHistoryStore::in_dir(dir.path())
            .append(ride(1_000, 100.0))
            .expect("append");
        let reopened = JsonHistoryStore::in_dir(dir.path());
        assert_eq!(reopened.list().expect("list").len(), 1);
    }

    #[test]
    fn csv_export_has_header_and_one_row_per_ride() {
        let records = vec![RideRecord {
            id: 7,
            ride: ride(0, 123.456),
        }];
        let mut out = Vec::new();
        export_csv(&records, &mut out).expect("export");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("id,started_at,ended_at"));
        assert!(lines[1].starts_with("7,1970-01-01T00:00:00+00:00,"));
        assert!(lines[1].contains(",123.46,9,38,,"));
    }
}
