//! Runtime owner of the ride.
//!
//! [MeterService::spawn] starts a tokio task that owns the [Meter] exclusively. Driver
//! commands, location events from any thread, the 1 Hz clock and the snapshot timer are
//! all serialized through that task, so nothing else ever touches the ride state.
//! Store writes go to a second task in FIFO order and never block the ride.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::filter::FilterConfig;
use crate::location::{Fix, FixSink, LocationEvent, LocationSource, SignalError};
use crate::persistence::{load_rates_or_default, SnapshotStore};
use crate::ride::{CompletedRide, Meter, RideCommand, RideState, TransitionError};

#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    pub tick_interval: Duration,
    pub snapshot_interval: Duration,
    pub filter: FilterConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            snapshot_interval: Duration::from_secs(2),
            filter: FilterConfig::default(),
        }
    }
}

#[derive(Debug)]
pub enum ServiceError {
    /// The actor has shut down.
    Closed,
    Transition(TransitionError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Closed => write!(f, "meter service is not running"),
            ServiceError::Transition(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Closed => None,
            ServiceError::Transition(error) => Some(error),
        }
    }
}

impl From<TransitionError> for ServiceError {
    fn from(error: TransitionError) -> Self {
        ServiceError::Transition(error)
    }
}

type Reply<T> = oneshot::Sender<T>;

enum MeterCommand {
    Start(Reply<Result<RideState, TransitionError>>),
    Apply(RideCommand, Reply<Result<RideState, TransitionError>>),
    Stop(Reply<Result<CompletedRide, TransitionError>>),
    Restore(Box<RideState>, Reply<Result<RideState, TransitionError>>),
    Snapshot(Reply<RideState>),
    Flush(Reply<()>),
    Location(LocationEvent),
}

enum PersistOp {
    Save(Box<RideState>),
    Clear,
    Flush(Reply<()>),
}

/// Cloneable, thread-safe entry point to a running [MeterService].
#[derive(Clone)]
pub struct MeterHandle {
    commands: mpsc::UnboundedSender<MeterCommand>,
    state: watch::Receiver<RideState>,
}

impl fmt::Debug for MeterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterHandle")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl MeterHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> MeterCommand,
    ) -> Result<T, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ServiceError::Closed)?;
        response.await.map_err(|_| ServiceError::Closed)
    }

    /// Start a ride with the stored rate configuration. Returns once the ride is
    /// Active; the location lock arrives later.
    pub async fn start(&self) -> Result<RideState, ServiceError> {
        Ok(self.request(MeterCommand::Start).await??)
    }

    pub async fn pause(&self) -> Result<RideState, ServiceError> {
        Ok(self
            .request(|reply| MeterCommand::Apply(RideCommand::Pause, reply))
            .await??)
    }

    pub async fn resume(&self) -> Result<RideState, ServiceError> {
        Ok(self
            .request(|reply| MeterCommand::Apply(RideCommand::Resume, reply))
            .await??)
    }

    pub async fn toggle_waiting(&self) -> Result<RideState, ServiceError> {
        Ok(self
            .request(|reply| MeterCommand::Apply(RideCommand::ToggleWaiting, reply))
            .await??)
    }

    /// Stop the ride. No tick or fix processed after this returns changes the result.
    pub async fn stop(&self) -> Result<CompletedRide, ServiceError> {
        Ok(self.request(MeterCommand::Stop).await??)
    }

    /// Resume a ride from a recovered snapshot. Refused while a ride is running.
    pub async fn restore(&self, state: RideState) -> Result<RideState, ServiceError> {
        Ok(self
            .request(|reply| MeterCommand::Restore(Box::new(state), reply))
            .await??)
    }

    pub async fn snapshot(&self) -> Result<RideState, ServiceError> {
        self.request(MeterCommand::Snapshot).await
    }

    /// Wait until every store write queued so far has completed.
    pub async fn flush(&self) -> Result<(), ServiceError> {
        self.request(MeterCommand::Flush).await
    }

    /// Queue a fix. Never blocks; safe to call from non-async threads.
    pub fn push_fix(&self, fix: Fix) -> Result<(), ServiceError> {
        self.commands
            .send(MeterCommand::Location(LocationEvent::Fix(fix)))
            .map_err(|_| ServiceError::Closed)
    }

    pub fn push_signal_error(&self, error: SignalError) -> Result<(), ServiceError> {
        self.commands
            .send(MeterCommand::Location(LocationEvent::Error(error)))
            .map_err(|_| ServiceError::Closed)
    }

    /// Receives the ride state after every change.
    pub fn subscribe(&self) -> watch::Receiver<RideState> {
        self.state.clone()
    }

    /// Most recently published state.
    pub fn current(&self) -> RideState {
        self.state.borrow().clone()
    }
}

impl FixSink for MeterHandle {
    fn deliver(&self, event: LocationEvent) {
        if self.commands.send(MeterCommand::Location(event)).is_err() {
            debug!("location event dropped, meter service closed");
        }
    }
}

/// Sink handed to the location source. Holds a weak sender so a subscribed source
/// does not keep the service alive after every handle is gone.
struct SourceSink {
    commands: mpsc::WeakUnboundedSender<MeterCommand>,
}

impl FixSink for SourceSink {
    fn deliver(&self, event: LocationEvent) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(MeterCommand::Location(event));
        }
    }
}

pub struct MeterService;

impl MeterService {
    /// Spawn the actor on the current tokio runtime.
    ///
    /// The service stops when every [MeterHandle] has been dropped.
    pub fn spawn(
        config: ServiceConfig,
        store: Arc<dyn SnapshotStore>,
        source: Option<Box<dyn LocationSource>>,
    ) -> MeterHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let meter = Meter::new(config.filter);
        let (state_tx, state_rx) = watch::channel(meter.state().clone());

        let writer = tokio::spawn(run_writer(Arc::clone(&store), persist_rx));
        let actor = MeterActor {
            meter,
            config,
            store,
            source,
            ingress: commands_tx.downgrade(),
            persist: persist_tx,
            state_tx,
        };
        tokio::spawn(actor.run(commands_rx, writer));

        MeterHandle {
            commands: commands_tx,
            state: state_rx,
        }
    }
}

/// What the 1 Hz clock does after a command.
enum TickClock {
    Keep,
    /// A ride (re)started: count full seconds from now.
    Restart,
    /// Paused: remember what is left of the current second.
    Hold,
    /// Resumed: the next tick closes the second interrupted by the pause.
    Continue,
}

struct MeterActor {
    meter: Meter,
    config: ServiceConfig,
    store: Arc<dyn SnapshotStore>,
    source: Option<Box<dyn LocationSource>>,
    ingress: mpsc::WeakUnboundedSender<MeterCommand>,
    persist: mpsc::UnboundedSender<PersistOp>,
    state_tx: watch::Sender<RideState>,
}

impl MeterActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<MeterCommand>,
        writer: JoinHandle<()>,
    ) {
        let tick_period = min_period(self.config.tick_interval);
        let mut ticks = periodic(tick_period);
        // Seconds missed while the runtime was stalled still count.
        ticks.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut snapshots = periodic(self.config.snapshot_interval);
        snapshots.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_tick = Instant::now() + tick_period;
        // Unused part of the second that was running when the ride paused.
        let mut held: Option<Duration> = None;

        loop {
            tokio::select! {
                biased;
                deadline = ticks.tick() => {
                    next_tick = deadline + tick_period;
                    if self.meter.on_clock_tick() {
                        self.publish();
                    }
                }
                _ = snapshots.tick() => self.queue_snapshot(),
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    match self.handle(command) {
                        TickClock::Keep => {}
                        TickClock::Restart => {
                            ticks.reset();
                            snapshots.reset();
                            next_tick = Instant::now() + tick_period;
                            held = None;
                        }
                        TickClock::Hold => {
                            held = Some(next_tick.saturating_duration_since(Instant::now()));
                        }
                        TickClock::Continue => {
                            next_tick = Instant::now() + held.take().unwrap_or(tick_period);
                            ticks.reset_at(next_tick);
                        }
                    }
                }
            }
        }

        if let Some(source) = self.source.as_mut() {
            source.unsubscribe();
        }
        drop(self.persist);
        if let Err(error) = writer.await {
            warn!(%error, "snapshot writer ended abnormally");
        }
        debug!("meter service stopped");
    }

    /// Apply one command and report how the 1 Hz clock has to follow it.
    fn handle(&mut self, command: MeterCommand) -> TickClock {
        match command {
            MeterCommand::Start(reply) => {
                let rates = load_rates_or_default(self.store.as_ref());
                let result = self.meter.start(rates, wall_clock_ms());
                let started = result.is_ok();
                if started {
                    self.subscribe_source();
                }
                self.respond(reply, result.map(|()| self.meter.state().clone()));
                if started {
                    TickClock::Restart
                } else {
                    TickClock::Keep
                }
            }
            MeterCommand::Apply(command, reply) => {
                let rates = self.meter.state().rates;
                let result = self.meter.apply(command, rates, wall_clock_ms());
                let clock = match (&result, command) {
                    (Ok(()), RideCommand::Pause) => TickClock::Hold,
                    (Ok(()), RideCommand::Resume) => TickClock::Continue,
                    _ => TickClock::Keep,
                };
                self.respond(reply, result.map(|()| self.meter.state().clone()));
                clock
            }
            MeterCommand::Stop(reply) => {
                let result = self.meter.stop(wall_clock_ms());
                if result.is_ok() {
                    if let Some(source) = self.source.as_mut() {
                        source.unsubscribe();
                    }
                    self.send_persist(PersistOp::Clear);
                }
                self.respond(reply, result);
                TickClock::Keep
            }
            MeterCommand::Restore(state, reply) => {
                let phase = self.meter.phase();
                if phase.is_running() {
                    self.respond(
                        reply,
                        Err(TransitionError {
                            command: RideCommand::Start,
                            phase,
                        }),
                    );
                    return TickClock::Keep;
                }
                self.meter = Meter::restore(*state, self.config.filter);
                let running = self.meter.phase().is_running();
                if running {
                    self.subscribe_source();
                }
                self.respond(reply, Ok(self.meter.state().clone()));
                if running {
                    TickClock::Restart
                } else {
                    TickClock::Keep
                }
            }
            MeterCommand::Snapshot(reply) => {
                let _ = reply.send(self.meter.state().clone());
                TickClock::Keep
            }
            MeterCommand::Flush(reply) => {
                self.send_persist(PersistOp::Flush(reply));
                TickClock::Keep
            }
            MeterCommand::Location(LocationEvent::Fix(fix)) => {
                if self.meter.on_location_update(fix).is_some() {
                    self.publish();
                }
                TickClock::Keep
            }
            MeterCommand::Location(LocationEvent::Error(error)) => {
                self.meter.report_signal(error);
                self.publish();
                TickClock::Keep
            }
        }
    }

    /// Publish the new state, log a refused command, then answer the caller.
    fn respond<T>(
        &self,
        reply: Reply<Result<T, TransitionError>>,
        result: Result<T, TransitionError>,
    ) {
        match &result {
            Ok(_) => self.publish(),
            Err(error) => warn!(%error, "command refused"),
        }
        if reply.send(result).is_err() {
            debug!("caller went away before the reply");
        }
    }

    fn subscribe_source(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        let sink = Arc::new(SourceSink {
            commands: self.ingress.clone(),
        });
        if let Err(error) = source.subscribe(sink) {
            self.meter.report_signal(error);
        }
    }

    fn queue_snapshot(&self) {
        if self.meter.phase().is_running() {
            self.send_persist(PersistOp::Save(Box::new(self.meter.state().clone())));
        }
    }

    fn send_persist(&self, op: PersistOp) {
        if self.persist.send(op).is_err() {
            warn!("snapshot writer is gone, dropping store operation");
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.meter.state().clone());
    }
}

/// Applies store operations in order on the blocking pool.
async fn run_writer(store: Arc<dyn SnapshotStore>, mut ops: mpsc::UnboundedReceiver<PersistOp>) {
    while let Some(op) = ops.recv().await {
        let (label, state) = match op {
            PersistOp::Save(state) => ("save", Some(state)),
            PersistOp::Clear => ("clear", None),
            PersistOp::Flush(reply) => {
                let _ = reply.send(());
                continue;
            }
        };
        let store = Arc::clone(&store);
        let result = tokio::task::spawn_blocking(move || match state {
            Some(state) => store.save_active_ride(&state),
            None => store.clear_active_ride(),
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(%error, op = label, "ride snapshot write failed, next interval retries")
            }
            Err(error) => warn!(%error, op = label, "ride snapshot write panicked"),
        }
    }
    info!("snapshot writer drained");
}

fn min_period(period: Duration) -> Duration {
    // tokio panics on a zero period.
    period.max(Duration::from_millis(1))
}

fn periodic(period: Duration) -> Interval {
    let period = min_period(period);
    interval_at(Instant::now() + period, period)
}

fn wall_clock_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
