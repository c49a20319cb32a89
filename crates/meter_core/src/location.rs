//! Location fixes and the collaborator that produces them.
//!
//! The meter never talks to a platform location API directly. A [LocationSource] is
//! injected into the service and pushes [LocationEvent]s into a [FixSink]; the sink is
//! the only ingestion point, so foreground and background producers share one queue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::geo::Coordinate;

/// One location reading. Timestamps are epoch milliseconds from the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: u64,
    /// Horizontal accuracy estimate (metres). `None` when the provider gives none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: u64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms,
            accuracy_m: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Finite coordinates inside the valid latitude/longitude ranges.
    pub fn has_valid_position(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl From<Fix> for Coordinate {
    fn from(fix: Fix) -> Self {
        fix.coordinate()
    }
}

/// Errors a location provider can report. None of them stop the ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalError {
    PermissionDenied,
    SignalLost,
    Timeout,
    Unsupported,
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalError::PermissionDenied => write!(f, "location permission denied"),
            SignalError::SignalLost => write!(f, "location signal lost"),
            SignalError::Timeout => write!(f, "timed out waiting for a location fix"),
            SignalError::Unsupported => write!(f, "location updates unsupported here"),
        }
    }
}

impl std::error::Error for SignalError {}

/// Side-channel status shown by the UI; never drives ride transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    #[default]
    Ok,
    PermissionDenied,
    SignalLost,
    TimedOut,
    Unsupported,
}

impl From<SignalError> for SignalStatus {
    fn from(error: SignalError) -> Self {
        match error {
            SignalError::PermissionDenied => SignalStatus::PermissionDenied,
            SignalError::SignalLost => SignalStatus::SignalLost,
            SignalError::Timeout => SignalStatus::TimedOut,
            SignalError::Unsupported => SignalStatus::Unsupported,
        }
    }
}

/// What a location source delivers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationEvent {
    Fix(Fix),
    Error(SignalError),
}

/// Receiver side of a location subscription. Must be callable from any thread.
pub trait FixSink: Send + Sync {
    fn deliver(&self, event: LocationEvent);
}

/// A producer of location events (GPS provider, background task, recorded trace).
pub trait LocationSource: Send {
    /// Begin delivering events to `sink`. An error means no events will follow.
    fn subscribe(&mut self, sink: Arc<dyn FixSink>) -> Result<(), SignalError>;

    /// Stop delivering events. Idempotent.
    fn unsubscribe(&mut self);
}

/// Replays timestamped location events on a tokio task, sleeping between events
/// according to their timestamp gaps divided by `speedup`.
pub struct TraceSource {
    events: Vec<(u64, LocationEvent)>,
    speedup: f64,
    task: Option<JoinHandle<()>>,
    finished: Arc<Notify>,
}

impl TraceSource {
    pub fn new(events: Vec<(u64, LocationEvent)>, speedup: f64) -> Self {
        Self {
            events,
            speedup: if speedup.is_finite() && speedup > 0.0 {
                speedup
            } else {
                1.0
            },
            task: None,
            finished: Arc::new(Notify::new()),
        }
    }

    /// Notified once the last event has been delivered.
    pub fn finished(&self) -> Arc<Notify> {
        Arc::clone(&self.finished)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl LocationSource for TraceSource {
    fn subscribe(&mut self, sink: Arc<dyn FixSink>) -> Result<(), SignalError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SignalError::Unsupported)?;
        self.unsubscribe();

        let events = self.events.clone();
        let speedup = self.speedup;
        let finished = Arc::clone(&self.finished);
        info!(events = events.len(), speedup, "trace source subscribed");
        self.task = Some(runtime.spawn(async move {
            let mut previous_ts: Option<u64> = None;
            for (timestamp_ms, event) in events {
                if let Some(prev) = previous_ts {
                    let gap_ms = timestamp_ms.saturating_sub(prev) as f64 / speedup;
                    if gap_ms >= 1.0 {
                        tokio::time::sleep(Duration::from_millis(gap_ms as u64)).await;
                    }
                }
                previous_ts = Some(timestamp_ms);
                sink.deliver(event);
            }
            debug!("trace source exhausted");
            finished.notify_one();
        }));
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TraceSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
