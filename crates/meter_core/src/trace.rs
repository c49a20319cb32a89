//! Recorded ride traces: fixes, signal problems and driver commands on one timeline.
//!
//! A trace file is a JSON array of tagged entries:
//!
//! ```json
//! [
//!   { "type": "fix", "latitude": 9.0, "longitude": 38.0, "timestamp_ms": 0, "accuracy_m": 5.0 },
//!   { "type": "command", "at_ms": 30000, "command": "toggle_waiting" },
//!   { "type": "signal", "at_ms": 45000, "error": "signal_lost" }
//! ]
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::location::{Fix, LocationEvent, SignalError};
use crate::ride::RideCommand;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEntry {
    Fix(Fix),
    Command { at_ms: u64, command: RideCommand },
    Signal { at_ms: u64, error: SignalError },
}

impl TraceEntry {
    pub fn at_ms(&self) -> u64 {
        match self {
            TraceEntry::Fix(fix) => fix.timestamp_ms,
            TraceEntry::Command { at_ms, .. } | TraceEntry::Signal { at_ms, .. } => *at_ms,
        }
    }
}

#[derive(Debug)]
pub enum TraceError {
    Io(String),
    Parse(String),
    Empty,
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::Io(message) => write!(f, "{message}"),
            TraceError::Parse(message) => write!(f, "{message}"),
            TraceError::Empty => write!(f, "trace contains no entries"),
        }
    }
}

impl std::error::Error for TraceError {}

/// A parsed trace. Entries keep file order; replay orders them by time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trace {
    pub entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new(entries: Vec<TraceEntry>) -> Self {
        Self { entries }
    }

    pub fn from_fixes(fixes: impl IntoIterator<Item = Fix>) -> Self {
        Self::new(fixes.into_iter().map(TraceEntry::Fix).collect())
    }

    pub fn parse(json: &str) -> Result<Self, TraceError> {
        let entries: Vec<TraceEntry> = serde_json::from_str(json)
            .map_err(|error| TraceError::Parse(format!("invalid trace: {error}")))?;
        if entries.is_empty() {
            return Err(TraceError::Empty);
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let contents = fs::read_to_string(path).map_err(|error| {
            TraceError::Io(format!("failed to read trace '{}': {error}", path.display()))
        })?;
        Self::parse(&contents).map_err(|error| match error {
            TraceError::Parse(message) => {
                TraceError::Parse(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    pub fn to_json(&self) -> Result<String, TraceError> {
        serde_json::to_string_pretty(&self.entries)
            .map_err(|error| TraceError::Parse(format!("failed to serialize trace: {error}")))
    }

    /// Earliest and latest timestamps, if any.
    pub fn span_ms(&self) -> Option<(u64, u64)> {
        let first = self.entries.iter().map(TraceEntry::at_ms).min()?;
        let last = self.entries.iter().map(TraceEntry::at_ms).max()?;
        Some((first, last))
    }

    /// Location events (fixes and signal errors) in file order, for a live source.
    pub fn location_events(&self) -> Vec<(u64, LocationEvent)> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                TraceEntry::Fix(fix) => Some((fix.timestamp_ms, LocationEvent::Fix(*fix))),
                TraceEntry::Signal { at_ms, error } => Some((*at_ms, LocationEvent::Error(*error))),
                TraceEntry::Command { .. } => None,
            })
            .collect()
    }

    /// Driver commands with their offsets from the trace start.
    pub fn commands(&self) -> Vec<(u64, RideCommand)> {
        let start = self.span_ms().map(|(first, _)| first).unwrap_or(0);
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                TraceEntry::Command { at_ms, command } => {
                    Some((at_ms.saturating_sub(start), *command))
                }
                _ => None,
            })
            .collect()
    }
}
