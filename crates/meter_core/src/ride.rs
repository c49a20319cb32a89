//! Ride state machine: the single owner of a ride's counters and fare.
//!
//! ```text
//! Idle ──start──▶ Active ◀──resume/pause──▶ Paused
//!                   │                          │
//!                   └──────────stop────────────┴──▶ Stopped
//! ```
//!
//! Three inputs mutate a running ride: accepted location fixes, 1 Hz clock ticks and
//! driver commands. Callers serialize them (see [crate::service]); the machine itself is
//! plain single-threaded state. `current_fare` is recomputed from the counters after
//! every mutation and never written any other way.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::filter::{evaluate, FilterConfig, FilterDecision};
use crate::location::{Fix, SignalError, SignalStatus};
use crate::pricing::{compute_fare, FareBreakdown, RateConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RidePhase {
    #[default]
    Idle,
    Active,
    Paused,
    Stopped,
}

impl RidePhase {
    /// Active or Paused: a ride exists and is worth persisting.
    pub fn is_running(self) -> bool {
        matches!(self, RidePhase::Active | RidePhase::Paused)
    }
}

impl fmt::Display for RidePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RidePhase::Idle => "idle",
            RidePhase::Active => "active",
            RidePhase::Paused => "paused",
            RidePhase::Stopped => "stopped",
        };
        write!(f, "{label}")
    }
}

/// Driver command names, used in transition errors and trace files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideCommand {
    Start,
    Pause,
    Resume,
    ToggleWaiting,
    Stop,
}

impl fmt::Display for RideCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RideCommand::Start => "start",
            RideCommand::Pause => "pause",
            RideCommand::Resume => "resume",
            RideCommand::ToggleWaiting => "toggle_waiting",
            RideCommand::Stop => "stop",
        };
        write!(f, "{label}")
    }
}

/// A command that is not valid in the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub command: RideCommand,
    pub phase: RidePhase,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} a ride that is {}", self.command, self.phase)
    }
}

impl std::error::Error for TransitionError {}

/// The mutable aggregate for one ride. Serialized as the crash-recovery snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideState {
    pub phase: RidePhase,
    pub is_waiting_mode: bool,
    pub started_at_ms: u64,
    pub distance_km: f64,
    pub elapsed_seconds: u64,
    pub waiting_seconds: u64,
    pub current_fare: f64,
    pub last_accepted_fix: Option<Fix>,
    /// Accepted fixes in acceptance order.
    pub path: Vec<Fix>,
    /// Rates frozen at start.
    pub rates: RateConfig,
    #[serde(default)]
    pub signal: SignalStatus,
}

impl Default for RideState {
    fn default() -> Self {
        Self::idle(RateConfig::default())
    }
}

impl RideState {
    fn idle(rates: RateConfig) -> Self {
        let mut state = Self {
            phase: RidePhase::Idle,
            is_waiting_mode: false,
            started_at_ms: 0,
            distance_km: 0.0,
            elapsed_seconds: 0,
            waiting_seconds: 0,
            current_fare: 0.0,
            last_accepted_fix: None,
            path: Vec::new(),
            rates,
            signal: SignalStatus::Ok,
        };
        state.recompute_fare();
        state
    }

    /// False while the ride is still waiting for its first accepted fix.
    pub fn has_lock(&self) -> bool {
        self.last_accepted_fix.is_some()
    }

    pub fn fare_breakdown(&self) -> FareBreakdown {
        FareBreakdown::new(self.distance_km, self.waiting_seconds, &self.rates)
    }

    fn recompute_fare(&mut self) {
        self.current_fare = compute_fare(self.distance_km, self.waiting_seconds, &self.rates);
    }
}

/// Immutable record of a finished ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRide {
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub distance_km: f64,
    pub elapsed_seconds: u64,
    pub waiting_seconds: u64,
    pub fare: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_fix: Option<Fix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_fix: Option<Fix>,
}

impl CompletedRide {
    /// Seconds that were not spent in waiting mode.
    pub fn moving_seconds(&self) -> u64 {
        self.elapsed_seconds.saturating_sub(self.waiting_seconds)
    }

    /// Distance over metered time; zero for rides with no metered time.
    pub fn average_speed_kmh(&self) -> f64 {
        if self.elapsed_seconds == 0 {
            return 0.0;
        }
        self.distance_km / (self.elapsed_seconds as f64 / 3600.0)
    }
}

/// Formats a second count as `1h 2m 3s`, dropping the hour part when zero.
pub fn format_duration(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else {
        format!("{m}m {s}s")
    }
}

/// The ride state machine.
#[derive(Debug, Clone)]
pub struct Meter {
    state: RideState,
    filter: FilterConfig,
}

impl Default for Meter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

impl Meter {
    pub fn new(filter: FilterConfig) -> Self {
        Self {
            state: RideState::default(),
            filter,
        }
    }

    /// Rebuild a machine from a persisted snapshot.
    ///
    /// The fare is recomputed from the restored counters; a snapshot whose rates fail
    /// validation keeps its counters but is priced with the defaults.
    pub fn restore(mut state: RideState, filter: FilterConfig) -> Self {
        let (rates, error) = state.rates.or_default();
        if let Some(error) = error {
            warn!(%error, "restored ride had invalid rates, using defaults");
        }
        state.rates = rates;
        if !state.distance_km.is_finite() || state.distance_km < 0.0 {
            warn!(distance_km = state.distance_km, "restored ride had invalid distance, resetting");
            state.distance_km = 0.0;
        }
        state.waiting_seconds = state.waiting_seconds.min(state.elapsed_seconds);
        state.recompute_fare();
        info!(phase = %state.phase, distance_km = state.distance_km, "ride restored");
        Self { state, filter }
    }

    pub fn state(&self) -> &RideState {
        &self.state
    }

    pub fn phase(&self) -> RidePhase {
        self.state.phase
    }

    pub fn filter_config(&self) -> &FilterConfig {
        &self.filter
    }

    /// Begin a fresh ride with `rates` frozen for its lifetime.
    pub fn start(&mut self, rates: RateConfig, now_ms: u64) -> Result<(), TransitionError> {
        if self.state.phase.is_running() {
            return Err(TransitionError {
                command: RideCommand::Start,
                phase: self.state.phase,
            });
        }
        let (rates, error) = rates.or_default();
        if let Some(error) = error {
            warn!(%error, "invalid rate configuration, starting with defaults");
        }

        self.state = RideState::idle(rates);
        self.state.phase = RidePhase::Active;
        self.state.started_at_ms = now_ms;
        info!(started_at_ms = now_ms, fare = self.state.current_fare, "ride started");
        Ok(())
    }

    /// Feed one fix through the filter. Returns `None` when the ride is not accruing.
    pub fn on_location_update(&mut self, fix: Fix) -> Option<FilterDecision> {
        if self.state.phase != RidePhase::Active {
            return None;
        }
        self.state.signal = SignalStatus::Ok;

        let decision = evaluate(
            self.state.last_accepted_fix.as_ref(),
            &fix,
            self.state.is_waiting_mode,
            &self.filter,
        );
        match decision {
            FilterDecision::Reject(reason) => {
                debug!(%reason, timestamp_ms = fix.timestamp_ms, "fix rejected");
            }
            FilterDecision::Accept { credited_km } => {
                if self.state.last_accepted_fix.is_none() {
                    info!(timestamp_ms = fix.timestamp_ms, "location lock acquired");
                }
                self.state.distance_km += credited_km;
                self.state.last_accepted_fix = Some(fix);
                self.state.path.push(fix);
                self.state.recompute_fare();
            }
        }
        Some(decision)
    }

    /// One second of metered time. Returns whether anything accrued.
    pub fn on_clock_tick(&mut self) -> bool {
        if self.state.phase != RidePhase::Active {
            return false;
        }
        self.state.elapsed_seconds += 1;
        if self.state.is_waiting_mode {
            self.state.waiting_seconds += 1;
        }
        self.state.recompute_fare();
        true
    }

    pub fn pause(&mut self) -> Result<(), TransitionError> {
        if self.state.phase != RidePhase::Active {
            return Err(TransitionError {
                command: RideCommand::Pause,
                phase: self.state.phase,
            });
        }
        self.state.phase = RidePhase::Paused;
        info!("ride paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), TransitionError> {
        if self.state.phase != RidePhase::Paused {
            return Err(TransitionError {
                command: RideCommand::Resume,
                phase: self.state.phase,
            });
        }
        self.state.phase = RidePhase::Active;
        info!("ride resumed");
        Ok(())
    }

    /// Flip waiting mode; returns the new value.
    pub fn toggle_waiting_mode(&mut self) -> Result<bool, TransitionError> {
        if !self.state.phase.is_running() {
            return Err(TransitionError {
                command: RideCommand::ToggleWaiting,
                phase: self.state.phase,
            });
        }
        self.state.is_waiting_mode = !self.state.is_waiting_mode;
        info!(waiting = self.state.is_waiting_mode, "waiting mode toggled");
        Ok(self.state.is_waiting_mode)
    }

    /// Finish the ride. Later fixes, ticks and commands (other than `start`) are no-ops.
    pub fn stop(&mut self, now_ms: u64) -> Result<CompletedRide, TransitionError> {
        if !self.state.phase.is_running() {
            return Err(TransitionError {
                command: RideCommand::Stop,
                phase: self.state.phase,
            });
        }
        self.state.phase = RidePhase::Stopped;
        self.state.is_waiting_mode = false;

        let completed = CompletedRide {
            started_at_ms: self.state.started_at_ms,
            ended_at_ms: now_ms.max(self.state.started_at_ms),
            distance_km: self.state.distance_km,
            elapsed_seconds: self.state.elapsed_seconds,
            waiting_seconds: self.state.waiting_seconds,
            fare: self.state.current_fare,
            start_fix: self.state.path.first().copied(),
            end_fix: self.state.last_accepted_fix,
        };
        info!(
            distance_km = completed.distance_km,
            elapsed_seconds = completed.elapsed_seconds,
            fare = completed.fare,
            "ride stopped"
        );
        Ok(completed)
    }

    /// Record a location-source problem. Never changes the phase.
    pub fn report_signal(&mut self, error: SignalError) {
        if !self.state.phase.is_running() {
            return;
        }
        warn!(%error, "location source reported a problem");
        self.state.signal = SignalStatus::from(error);
    }

    /// Apply a driver command by name.
    pub fn apply(
        &mut self,
        command: RideCommand,
        rates: RateConfig,
        now_ms: u64,
    ) -> Result<(), TransitionError> {
        match command {
            RideCommand::Start => self.start(rates, now_ms),
            RideCommand::Pause => self.pause(),
            RideCommand::Resume => self.resume(),
            RideCommand::ToggleWaiting => self.toggle_waiting_mode().map(|_| ()),
            RideCommand::Stop => self.stop(now_ms).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::RejectReason;

    fn fix(lat: f64, t_ms: u64) -> Fix {
        Fix::new(lat, 38.0, t_ms).with_accuracy(5.0)
    }

    fn active_meter() -> Meter {
        let mut meter = Meter::default();
        meter.start(RateConfig::default(), 1_000).expect("start");
        meter
    }

    #[test]
    fn start_zeroes_counters_and_charges_base_or_minimum() {
        let meter = active_meter();
        let state = meter.state();
        assert_eq!(state.phase, RidePhase::Active);
        assert_eq!(state.distance_km, 0.0);
        assert_eq!(state.elapsed_seconds, 0);
        assert!(!state.has_lock());
        assert!((state.current_fare - 100.0).abs() < 1e-9);
    }

    #[test]
    fn start_while_running_is_refused() {
        let mut meter = active_meter();
        let error = meter.start(RateConfig::default(), 2_000).unwrap_err();
        assert_eq!(error.phase, RidePhase::Active);
        assert_eq!(error.command, RideCommand::Start);
    }

    #[test]
    fn jump_is_rejected_and_reference_kept() {
        let mut meter = active_meter();
        meter.on_location_update(fix(9.000, 0));
        let decision = meter.on_location_update(fix(9.001, 2_000));
        assert_eq!(decision, Some(FilterDecision::Reject(RejectReason::ImplausibleJump)));
        assert_eq!(meter.state().distance_km, 0.0);
        assert_eq!(meter.state().last_accepted_fix, Some(fix(9.000, 0)));
        assert_eq!(meter.state().path.len(), 1);
    }

    #[test]
    fn accepted_fix_adds_distance_and_reprices() {
        let mut meter = active_meter();
        meter.on_location_update(fix(9.000, 0));
        meter.on_location_update(fix(9.0009, 60_000));
        let state = meter.state();
        assert!((state.distance_km - 0.1).abs() < 0.002);
        assert_eq!(state.path.len(), 2);
        assert_eq!(
            state.current_fare,
            compute_fare(state.distance_km, state.waiting_seconds, &state.rates)
        );
    }

    #[test]
    fn ticks_accrue_elapsed_and_waiting_time() {
        let mut meter = active_meter();
        for _ in 0..30 {
            meter.on_clock_tick();
        }
        meter.toggle_waiting_mode().expect("toggle");
        for _ in 0..120 {
            meter.on_clock_tick();
        }
        let state = meter.state();
        assert_eq!(state.elapsed_seconds, 150);
        assert_eq!(state.waiting_seconds, 120);
        assert!(state.waiting_seconds <= state.elapsed_seconds);
    }

    #[test]
    fn pause_freezes_every_counter() {
        let mut meter = active_meter();
        meter.on_location_update(fix(9.000, 0));
        meter.toggle_waiting_mode().expect("toggle");
        meter.on_clock_tick();
        meter.pause().expect("pause");
        let frozen = meter.state().clone();

        assert!(!meter.on_clock_tick());
        assert_eq!(meter.on_location_update(fix(9.0009, 60_000)), None);
        assert_eq!(meter.state(), &frozen);

        meter.resume().expect("resume");
        assert!(meter.on_clock_tick());
        assert_eq!(meter.state().elapsed_seconds, frozen.elapsed_seconds + 1);
    }

    #[test]
    fn waiting_toggle_only_while_running() {
        let mut meter = Meter::default();
        assert!(meter.toggle_waiting_mode().is_err());
        meter.start(RateConfig::default(), 0).expect("start");
        meter.pause().expect("pause");
        assert_eq!(meter.toggle_waiting_mode(), Ok(true));
    }

    #[test]
    fn stop_snapshots_and_invalidates() {
        let mut meter = active_meter();
        meter.on_location_update(fix(9.000, 0));
        meter.on_location_update(fix(9.0009, 60_000));
        meter.toggle_waiting_mode().expect("toggle");
        meter.on_clock_tick();

        let completed = meter.stop(90_000).expect("stop");
        assert_eq!(completed.started_at_ms, 1_000);
        assert_eq!(completed.ended_at_ms, 90_000);
        assert_eq!(completed.elapsed_seconds, 1);
        assert_eq!(completed.start_fix, Some(fix(9.000, 0)));
        assert_eq!(completed.end_fix, Some(fix(9.0009, 60_000)));
        assert!(!meter.state().is_waiting_mode);

        let before = meter.state().clone();
        assert_eq!(meter.on_location_update(fix(9.002, 120_000)), None);
        assert!(!meter.on_clock_tick());
        assert!(meter.pause().is_err());
        assert!(meter.stop(100_000).is_err());
        assert_eq!(meter.state(), &before);
    }

    #[test]
    fn a_stopped_meter_can_start_a_fresh_ride() {
        let mut meter = active_meter();
        meter.on_clock_tick();
        meter.stop(5_000).expect("stop");
        meter.start(RateConfig::default(), 6_000).expect("restart");
        assert_eq!(meter.state().elapsed_seconds, 0);
        assert!(meter.state().path.is_empty());
    }

    #[test]
    fn invalid_rates_fall_back_to_defaults() {
        let mut meter = Meter::default();
        let bad = RateConfig {
            base_fare: f64::NAN,
            ..RateConfig::default()
        };
        meter.start(bad, 0).expect("start");
        assert_eq!(meter.state().rates, RateConfig::default());
    }

    #[test]
    fn signal_errors_do_not_transition() {
        let mut meter = active_meter();
        meter.report_signal(SignalError::SignalLost);
        assert_eq!(meter.phase(), RidePhase::Active);
        assert_eq!(meter.state().signal, SignalStatus::SignalLost);

        meter.on_location_update(fix(9.0, 0));
        assert_eq!(meter.state().signal, SignalStatus::Ok);
    }

    #[test]
    fn restore_recomputes_fare_from_counters() {
        let mut meter = active_meter();
        meter.on_location_update(fix(9.000, 0));
        meter.on_location_update(fix(9.0009, 60_000));
        let mut snapshot = meter.state().clone();
        snapshot.current_fare = 0.0;
        snapshot.waiting_seconds = 10;

        let restored = Meter::restore(snapshot, FilterConfig::default());
        let state = restored.state();
        assert_eq!(state.waiting_seconds, 0, "waiting clamps to elapsed");
        assert_eq!(state.current_fare, meter.state().current_fare);
    }

    #[test]
    fn completed_ride_helpers() {
        let ride = CompletedRide {
            started_at_ms: 0,
            ended_at_ms: 1_800_000,
            distance_km: 10.0,
            elapsed_seconds: 1_800,
            waiting_seconds: 300,
            fare: 275.0,
            start_fix: None,
            end_fix: None,
        };
        assert_eq!(ride.moving_seconds(), 1_500);
        assert!((ride.average_speed_kmh() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn durations_format_like_the_dashboard() {
        assert_eq!(format_duration(0), "0m 0s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3_725), "1h 2m 5s");
    }
}
