//! Location filter: decides whether a fix is noise and how much distance it earns.
//!
//! Adopting a fix as the new reference and crediting distance are separate decisions.
//! Rejected fixes never become the reference, so one outlier cannot shift the baseline
//! that the next delta is measured from. Slow fixes (stationary jitter) are adopted but
//! earn nothing unless the driver has switched on waiting mode.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geo::distance_km;
use crate::location::Fix;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Filter thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Fixes reporting a worse (larger) accuracy radius are rejected.
    pub max_accuracy_m: f64,
    /// Implied speeds above this are treated as GPS jumps.
    pub max_speed_kmh: f64,
    /// Below this speed movement is considered jitter outside waiting mode.
    pub min_moving_speed_kmh: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 50.0,
            max_speed_kmh: 150.0,
            min_moving_speed_kmh: 5.0,
        }
    }
}

/// Why a fix was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    PoorAccuracy,
    ImplausibleJump,
    NonMonotonicTime,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::PoorAccuracy => write!(f, "poor_signal"),
            RejectReason::ImplausibleJump => write!(f, "implausible_jump"),
            RejectReason::NonMonotonicTime => write!(f, "non_monotonic_time"),
        }
    }
}

/// Outcome of evaluating one candidate fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterDecision {
    /// Discard the candidate; reference fix and distance stay as they are.
    Reject(RejectReason),
    /// Adopt the candidate as the reference and add `credited_km` (may be zero).
    Accept { credited_km: f64 },
}

impl FilterDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterDecision::Accept { .. })
    }

    pub fn credited_km(&self) -> f64 {
        match self {
            FilterDecision::Accept { credited_km } => *credited_km,
            FilterDecision::Reject(_) => 0.0,
        }
    }
}

/// Evaluate `candidate` against the last accepted fix.
///
/// Rules, first match wins:
/// 1. unusable coordinates are rejected as poor signal
/// 2. no previous fix: accept as baseline, credit nothing
/// 3. accuracy radius above `max_accuracy_m`: reject
/// 4. timestamp not after the previous fix: reject
/// 5. implied speed above `max_speed_kmh`: reject as a jump
/// 6. implied speed below `min_moving_speed_kmh` outside waiting mode: accept, credit nothing
/// 7. otherwise accept and credit the full haversine distance
pub fn evaluate(
    previous: Option<&Fix>,
    candidate: &Fix,
    waiting_mode: bool,
    config: &FilterConfig,
) -> FilterDecision {
    if !candidate.has_valid_position() {
        return FilterDecision::Reject(RejectReason::PoorAccuracy);
    }

    let Some(previous) = previous else {
        return FilterDecision::Accept { credited_km: 0.0 };
    };

    if let Some(accuracy_m) = candidate.accuracy_m {
        if accuracy_m.is_nan() || accuracy_m > config.max_accuracy_m {
            return FilterDecision::Reject(RejectReason::PoorAccuracy);
        }
    }

    if candidate.timestamp_ms <= previous.timestamp_ms {
        return FilterDecision::Reject(RejectReason::NonMonotonicTime);
    }

    let raw_km = distance_km(previous.coordinate(), candidate.coordinate());
    let elapsed_hours = (candidate.timestamp_ms - previous.timestamp_ms) as f64 / MS_PER_HOUR;
    let speed_kmh = raw_km / elapsed_hours;

    if !speed_kmh.is_finite() || speed_kmh > config.max_speed_kmh {
        return FilterDecision::Reject(RejectReason::ImplausibleJump);
    }

    if speed_kmh < config.min_moving_speed_kmh && !waiting_mode {
        return FilterDecision::Accept { credited_km: 0.0 };
    }

    FilterDecision::Accept { credited_km: raw_km }
}
