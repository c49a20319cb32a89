//! Deterministic trace replay: drives a [Meter] from a [Trace] on virtual time.
//!
//! The ride starts at the first trace timestamp. Fixes, signal problems and commands are
//! scheduled at their own timestamps, clock ticks after every second of unpaused time,
//! and snapshots every `snapshot_interval_ms` until the last trace timestamp, where the
//! ride is stopped unless a `stop` command ended it earlier.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::clock::{Event, EventKind, ReplayClock, ONE_SEC_MS};
use crate::filter::{FilterConfig, FilterDecision, RejectReason};
use crate::persistence::SnapshotStore;
use crate::pricing::RateConfig;
use crate::ride::{CompletedRide, Meter, RideCommand, RideState};
use crate::trace::{Trace, TraceEntry, TraceError};

/// Default interval between crash-recovery snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy)]
pub struct ReplayOptions {
    pub rates: RateConfig,
    pub filter: FilterConfig,
    pub snapshot_interval_ms: u64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            rates: RateConfig::default(),
            filter: FilterConfig::default(),
            snapshot_interval_ms: DEFAULT_SNAPSHOT_INTERVAL_MS,
        }
    }
}

/// Counters collected while replaying.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayStats {
    pub fixes_seen: usize,
    pub fixes_accepted: usize,
    /// Accepted fixes that moved the reference but earned no distance.
    pub fixes_zero_credit: usize,
    pub rejected: BTreeMap<RejectReason, usize>,
    pub signal_errors: usize,
    pub ticks_applied: u64,
    pub commands_applied: usize,
    pub commands_refused: usize,
    pub snapshots_written: usize,
    pub snapshot_failures: usize,
}

impl ReplayStats {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub completed: CompletedRide,
    pub final_state: RideState,
    pub stats: ReplayStats,
}

/// A replay in progress. Step it with [Replay::run_next_event] or drain it with
/// [Replay::run_until_empty], then call [Replay::finish].
pub struct Replay<'a> {
    trace: &'a Trace,
    store: Option<&'a dyn SnapshotStore>,
    options: ReplayOptions,
    clock: ReplayClock,
    meter: Meter,
    end_ms: u64,
    /// Ticks carry the generation they were scheduled in; a pause starts a new one.
    tick_generation: usize,
    next_tick_ms: Option<u64>,
    /// Milliseconds left of the interrupted second while paused.
    held_tick_ms: Option<u64>,
    completed: Option<CompletedRide>,
    stats: ReplayStats,
}

impl<'a> Replay<'a> {
    pub fn new(
        trace: &'a Trace,
        options: ReplayOptions,
        store: Option<&'a dyn SnapshotStore>,
    ) -> Result<Self, TraceError> {
        let (start_ms, end_ms) = trace.span_ms().ok_or(TraceError::Empty)?;

        let mut clock = ReplayClock::starting_at(start_ms);
        let mut meter = Meter::new(options.filter);
        // A fresh meter is Idle, so start cannot be refused.
        let _ = meter.start(options.rates, start_ms);

        for (index, entry) in trace.entries.iter().enumerate() {
            let kind = match entry {
                TraceEntry::Fix(_) | TraceEntry::Signal { .. } => EventKind::LocationFix,
                TraceEntry::Command { .. } => EventKind::Command,
            };
            clock.schedule_at(entry.at_ms(), kind, Some(index));
        }

        let mut replay = Self {
            trace,
            store,
            options,
            clock,
            meter,
            end_ms,
            tick_generation: 0,
            next_tick_ms: None,
            held_tick_ms: None,
            completed: None,
            stats: ReplayStats::default(),
        };
        replay.schedule_tick(start_ms.checked_add(ONE_SEC_MS));
        replay.schedule_snapshot(start_ms);
        Ok(replay)
    }

    pub fn state(&self) -> &RideState {
        self.meter.state()
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Process one event. Returns `false` once the queue is drained or the ride stopped.
    pub fn run_next_event(&mut self) -> bool {
        if self.completed.is_some() {
            return false;
        }
        let Some(event) = self.clock.pop_next() else {
            return false;
        };
        self.handle(event);
        true
    }

    /// Like [Replay::run_next_event], invoking `hook` after the event is applied.
    pub fn run_next_event_with_hook<F>(&mut self, mut hook: F) -> bool
    where
        F: FnMut(&RideState, &Event),
    {
        if self.completed.is_some() {
            return false;
        }
        let Some(event) = self.clock.pop_next() else {
            return false;
        };
        self.handle(event);
        hook(self.meter.state(), &event);
        true
    }

    /// Run until the queue is empty or `max_steps` events were processed.
    pub fn run_until_empty(&mut self, max_steps: usize) -> usize {
        let mut steps = 0;
        while steps < max_steps && self.run_next_event() {
            steps += 1;
        }
        steps
    }

    /// Run to completion, invoking `hook` after every event.
    pub fn run_until_empty_with_hook<F>(&mut self, max_steps: usize, mut hook: F) -> usize
    where
        F: FnMut(&RideState, &Event),
    {
        let mut steps = 0;
        while steps < max_steps && self.run_next_event_with_hook(&mut hook) {
            steps += 1;
        }
        steps
    }

    /// Process whatever is left, stop the ride at the trace end unless a `stop`
    /// command already did, and clear the snapshot.
    pub fn finish(mut self) -> ReplayOutcome {
        self.run_until_empty(usize::MAX);
        let completed = match self.completed.take() {
            Some(completed) => completed,
            None => match self.meter.stop(self.end_ms) {
                Ok(completed) => {
                    self.clear_snapshot();
                    completed
                }
                Err(error) => {
                    // Only reachable if the meter was already stopped, which sets `completed`.
                    warn!(%error, "replay finished without a running ride");
                    CompletedRide {
                        started_at_ms: self.meter.state().started_at_ms,
                        ended_at_ms: self.end_ms,
                        distance_km: self.meter.state().distance_km,
                        elapsed_seconds: self.meter.state().elapsed_seconds,
                        waiting_seconds: self.meter.state().waiting_seconds,
                        fare: self.meter.state().current_fare,
                        start_fix: self.meter.state().path.first().copied(),
                        end_fix: self.meter.state().last_accepted_fix,
                    }
                }
            },
        };
        ReplayOutcome {
            completed,
            final_state: self.meter.state().clone(),
            stats: self.stats,
        }
    }

    fn handle(&mut self, event: Event) {
        match event.kind {
            EventKind::LocationFix => self.handle_location(event),
            EventKind::Command => self.handle_command(event),
            EventKind::ClockTick => {
                if event.subject != Some(self.tick_generation) {
                    return;
                }
                if self.meter.on_clock_tick() {
                    self.stats.ticks_applied += 1;
                }
                self.schedule_tick(event.timestamp.checked_add(ONE_SEC_MS));
            }
            EventKind::SnapshotDue => {
                self.write_snapshot();
                self.schedule_snapshot(event.timestamp);
            }
        }
    }

    /// Schedule the next clock tick in the current generation, if it falls inside the trace.
    fn schedule_tick(&mut self, at_ms: Option<u64>) {
        self.next_tick_ms = at_ms;
        if let Some(at_ms) = at_ms.filter(|&at| at <= self.end_ms) {
            self.clock.schedule_at(at_ms, EventKind::ClockTick, Some(self.tick_generation));
        }
    }

    fn schedule_snapshot(&mut self, after_ms: u64) {
        let interval = self.options.snapshot_interval_ms;
        if interval == 0 {
            return;
        }
        if let Some(at_ms) = after_ms.checked_add(interval).filter(|&at| at <= self.end_ms) {
            self.clock.schedule_at(at_ms, EventKind::SnapshotDue, None);
        }
    }

    /// Pausing drops the pending tick and keeps what was left of its second;
    /// resuming schedules a tick after exactly that remainder.
    fn follow_tick_clock(&mut self, command: RideCommand, now_ms: u64) {
        match command {
            RideCommand::Pause => {
                self.held_tick_ms = self.next_tick_ms.map(|next| next.saturating_sub(now_ms));
                self.tick_generation += 1;
            }
            RideCommand::Resume => {
                let remainder = self.held_tick_ms.take().unwrap_or(ONE_SEC_MS);
                self.schedule_tick(now_ms.checked_add(remainder));
            }
            _ => {}
        }
    }

    fn handle_location(&mut self, event: Event) {
        let trace = self.trace;
        let Some(entry) = event.subject.and_then(|index| trace.entries.get(index)) else {
            return;
        };
        match entry {
            TraceEntry::Fix(fix) => {
                self.stats.fixes_seen += 1;
                match self.meter.on_location_update(*fix) {
                    Some(FilterDecision::Accept { credited_km }) => {
                        self.stats.fixes_accepted += 1;
                        if credited_km == 0.0 {
                            self.stats.fixes_zero_credit += 1;
                        }
                    }
                    Some(FilterDecision::Reject(reason)) => {
                        *self.stats.rejected.entry(reason).or_insert(0) += 1;
                    }
                    None => {}
                }
            }
            TraceEntry::Signal { error, .. } => {
                self.stats.signal_errors += 1;
                self.meter.report_signal(*error);
            }
            TraceEntry::Command { .. } => {}
        }
    }

    fn handle_command(&mut self, event: Event) {
        let trace = self.trace;
        let Some(&TraceEntry::Command { command, .. }) =
            event.subject.and_then(|index| trace.entries.get(index))
        else {
            return;
        };
        let now = self.clock.now();
        let result = match command {
            RideCommand::Stop => self.meter.stop(now).map(|completed| {
                self.completed = Some(completed);
            }),
            other => self.meter.apply(other, self.options.rates, now),
        };
        match result {
            Ok(()) => {
                self.stats.commands_applied += 1;
                self.follow_tick_clock(command, now);
                if self.completed.is_some() {
                    self.clear_snapshot();
                }
            }
            Err(error) => {
                debug!(%error, at_ms = now, "trace command refused");
                self.stats.commands_refused += 1;
            }
        }
    }

    fn write_snapshot(&mut self) {
        let Some(store) = self.store else {
            return;
        };
        if !self.meter.phase().is_running() {
            return;
        }
        match store.save_active_ride(self.meter.state()) {
            Ok(()) => self.stats.snapshots_written += 1,
            Err(error) => {
                warn!(%error, "snapshot write failed, retrying next interval");
                self.stats.snapshot_failures += 1;
            }
        }
    }

    fn clear_snapshot(&mut self) {
        if let Some(store) = self.store {
            if let Err(error) = store.clear_active_ride() {
                warn!(%error, "failed to clear ride snapshot");
            }
        }
    }
}

/// Replay `trace` start to finish.
pub fn replay_trace(
    trace: &Trace,
    options: ReplayOptions,
    store: Option<&dyn SnapshotStore>,
) -> Result<ReplayOutcome, TraceError> {
    Ok(Replay::new(trace, options, store)?.finish())
}
