//! Measurement session state machine.
//!
//! A session runs one [`SessionOrder`] against a current source and a voltage
//! meter:
//!
//! ```text
//! Idle -> Configuring -> Running <-> Paused -> Completed | Aborted | Failed
//! ```
//!
//! For a measurement, every point of the [`SweepPlan`] goes through
//! settle wait, `CurrentSource::start`, `VoltageMeter::trigger`, burst wait,
//! `VoltageMeter::read`, dataset write, then `PointUpdated` and `DisplayTick`
//! notifications. Cancellation is honoured only at the waits (settle, burst,
//! pause and reset hold), never in the middle of an instrument exchange.
//!
//! Whatever the outcome, a measurement ends with the safe shutdown sequence
//! (meter reset, source stop, source reset). Each step is attempted even when an
//! earlier one fails; the terminal notification is sent only afterwards.

use crate::config::IvConfig;
use crate::data::SharedDataset;
use crate::error::{AppResult, IvError};
use crate::hardware::capabilities::{CurrentSource, CurrentSourceSettings, MeterSettings, VoltageMeter};
use crate::measurement::MeasurementPoint;
use crate::sweep::plan::SweepPlan;
use crate::sweep::request::{SessionOrder, SessionRequest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Instrument as _};
use uuid::Uuid;

/// Wait before each set point
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);
/// Hold after a reset order
pub const DEFAULT_RESET_HOLD: Duration = Duration::from_millis(100);

// =============================================================================
// States and notifications
// =============================================================================

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, not started
    Idle,
    /// Applying instrument settings
    Configuring,
    /// Stepping through set points
    Running,
    /// Waiting at a point boundary for resume or cancel
    Paused,
    /// Finished normally
    Completed,
    /// Cancelled by the host
    Aborted,
    /// Stopped by an instrument or internal error
    Failed,
}

impl SessionState {
    /// Completed, Aborted or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Configuring => "configuring",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress notification sent to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged {
        /// New state
        state: SessionState,
    },
    /// The dataset was sized for the plan
    DatasetSized {
        /// Number of rows
        len: usize,
    },
    /// One dataset row was written
    PointUpdated {
        /// The written row
        point: MeasurementPoint,
    },
    /// The display snapshot was refreshed, unless held
    DisplayTick,
    /// The source read back a level outside tolerance; the point is still measured
    SetPointMismatch {
        /// Plan index
        index: usize,
        /// Commanded level, in amps
        commanded: f64,
        /// Read-back level, in amps
        readback: f64,
    },
    /// Finished normally, instruments safe
    SessionCompleted,
    /// Cancelled, instruments safe
    SessionAborted,
    /// Stopped by an error after a best-effort shutdown
    SessionFailed {
        /// Error message
        reason: String,
    },
}

/// Receives session notifications on the session task.
///
/// Implementations must return quickly; they run between instrument exchanges.
pub trait SessionObserver: Send + Sync {
    /// Handle one notification
    fn notify(&self, event: &SessionEvent);
}

/// Observer that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn notify(&self, _event: &SessionEvent) {}
}

/// Forwards notifications to an unbounded Tokio channel.
///
/// Sending never blocks the sweep. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelObserver {
    /// Observer plus the receiving end for the host
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn notify(&self, event: &SessionEvent) {
        let _ = self.tx.send(event.clone());
    }
}

// =============================================================================
// Options, signals and outcome
// =============================================================================

/// Timing and defaults applied to every session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    /// Wait before commanding each set point
    pub settle: Duration,
    /// Hold after resetting both instruments
    pub reset_hold: Duration,
    /// Meter timing when the order carries none
    pub meter: MeterSettings,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            reset_hold: DEFAULT_RESET_HOLD,
            meter: MeterSettings::default(),
        }
    }
}

impl SessionOptions {
    /// Options from the `sweep` and `meter` configuration sections
    pub fn from_config(config: &IvConfig) -> Self {
        Self {
            settle: config.sweep.settle(),
            reset_hold: config.sweep.reset_hold(),
            meter: config.meter,
        }
    }
}

/// Host side of a session: cancel and pause switches plus the live state
#[derive(Debug, Clone)]
pub struct SessionSignals {
    cancel: Arc<watch::Sender<bool>>,
    pause: Arc<watch::Sender<bool>>,
    state: watch::Receiver<SessionState>,
}

impl SessionSignals {
    /// Request cancellation. Observed at the next wait.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Request a pause at the next point boundary
    pub fn pause(&self) {
        self.pause.send_replace(true);
    }

    /// Clear the pause request
    pub fn resume(&self) {
        self.pause.send_replace(false);
    }

    /// Whether cancellation was requested
    pub fn is_cancel_requested(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Latest state published by the session
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

/// Result of a finished session
#[derive(Debug)]
pub struct SessionOutcome {
    /// Session identifier, also recorded on the tracing span
    pub id: Uuid,
    /// The order that ran
    pub order: SessionOrder,
    /// Completed, Aborted or Failed
    pub state: SessionState,
    /// Dataset rows written
    pub points_measured: usize,
    /// Set points whose read-back was outside tolerance
    pub mismatches: usize,
    /// Error that stopped the session, or a shutdown failure
    pub error: Option<IvError>,
}

impl SessionOutcome {
    /// Completed without error
    pub fn is_success(&self) -> bool {
        self.state == SessionState::Completed && self.error.is_none()
    }
}

// =============================================================================
// Session
// =============================================================================

enum Halt {
    Cancelled,
    Failed(IvError),
}

impl From<IvError> for Halt {
    fn from(e: IvError) -> Self {
        Halt::Failed(e)
    }
}

/// Resolves once the cancel flag is set
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// One run of a session order
pub struct MeasurementSession {
    id: Uuid,
    order: SessionOrder,
    source: Arc<dyn CurrentSource>,
    meter: Arc<dyn VoltageMeter>,
    dataset: SharedDataset,
    observer: Arc<dyn SessionObserver>,
    options: SessionOptions,
    // Keep the senders alive so the receivers never see a closed channel
    _cancel_tx: Arc<watch::Sender<bool>>,
    _pause_tx: Arc<watch::Sender<bool>>,
    cancel: watch::Receiver<bool>,
    pause: watch::Receiver<bool>,
    state: watch::Sender<SessionState>,
    points_measured: usize,
    mismatches: usize,
}

impl MeasurementSession {
    /// Create a session for a validated request.
    pub fn new(
        request: SessionRequest,
        dataset: SharedDataset,
        observer: Arc<dyn SessionObserver>,
        options: SessionOptions,
    ) -> AppResult<(Self, SessionSignals)> {
        request.validate()?;

        let cancel_tx = Arc::new(watch::channel(false).0);
        let pause_tx = Arc::new(watch::channel(false).0);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let session = Self {
            id: Uuid::new_v4(),
            order: request.order,
            source: request.source,
            meter: request.meter,
            dataset,
            observer,
            options,
            cancel: cancel_tx.subscribe(),
            pause: pause_tx.subscribe(),
            _cancel_tx: cancel_tx.clone(),
            _pause_tx: pause_tx.clone(),
            state: state_tx,
            points_measured: 0,
            mismatches: 0,
        };
        let signals = SessionSignals {
            cancel: cancel_tx,
            pause: pause_tx,
            state: state_rx,
        };
        Ok((session, signals))
    }

    /// Session identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run to a terminal state.
    pub async fn run(self) -> SessionOutcome {
        let span = tracing::info_span!("session", id = %self.id, order = self.order.label());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> SessionOutcome {
        info!("session started");

        let (state, error) = match self.order {
            SessionOrder::Reset => self.run_reset().await,
            SessionOrder::Measure { imax, di, meter } => {
                let meter = meter.unwrap_or(self.options.meter);
                let result = self.run_measure(imax, di, meter).await;
                let shutdown = self.safe_shutdown().await;
                match (result, shutdown) {
                    (Ok(()), Ok(())) => (SessionState::Completed, None),
                    (Ok(()), Err(e)) => (SessionState::Failed, Some(e)),
                    (Err(Halt::Cancelled), _) => (SessionState::Aborted, None),
                    (Err(Halt::Failed(e)), _) => (SessionState::Failed, Some(e)),
                }
            }
        };

        self.set_state(state);
        match (&state, &error) {
            (SessionState::Completed, _) => {
                info!(points = self.points_measured, mismatches = self.mismatches, "session completed");
                self.emit(SessionEvent::SessionCompleted);
            }
            (SessionState::Aborted, _) => {
                info!(points = self.points_measured, "session aborted");
                self.emit(SessionEvent::SessionAborted);
            }
            (_, err) => {
                let reason = err
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown failure".to_string());
                error!(reason = %reason, "session failed");
                self.emit(SessionEvent::SessionFailed { reason });
            }
        }

        SessionOutcome {
            id: self.id,
            order: self.order,
            state,
            points_measured: self.points_measured,
            mismatches: self.mismatches,
            error,
        }
    }

    async fn run_reset(&mut self) -> (SessionState, Option<IvError>) {
        self.set_state(SessionState::Running);

        let source = self.source.reset().await;
        let meter = self.meter.reset().await;
        if let Err(e) = source.and(meter) {
            return (SessionState::Failed, Some(e));
        }

        match self.wait(self.options.reset_hold).await {
            Ok(()) => (SessionState::Completed, None),
            Err(Halt::Cancelled) => (SessionState::Aborted, None),
            Err(Halt::Failed(e)) => (SessionState::Failed, Some(e)),
        }
    }

    async fn run_measure(&mut self, imax: f64, di: f64, meter: MeterSettings) -> Result<(), Halt> {
        self.set_state(SessionState::Configuring);
        // Before the output is enabled
        let plan = SweepPlan::new(imax, di)?;

        self.source
            .configure(&CurrentSourceSettings {
                max_current: imax,
                step: di,
            })
            .await?;
        self.meter.configure(&meter).await?;

        self.dataset.presize(plan.len()).await;
        self.emit(SessionEvent::DatasetSized { len: plan.len() });
        info!(points = plan.len(), imax, di, "sweep configured");

        self.set_state(SessionState::Running);
        for (index, &amps) in plan.points().iter().enumerate() {
            self.checkpoint().await?;
            self.measure_point(index, amps).await?;
        }
        Ok(())
    }

    async fn measure_point(&mut self, index: usize, amps: f64) -> Result<(), Halt> {
        self.wait(self.options.settle).await?;

        match self.source.start(amps).await {
            Ok(()) => {}
            Err(IvError::SetPointMismatch {
                commanded,
                readback,
            }) => {
                warn!(index, commanded, readback, "set point mismatch");
                self.mismatches += 1;
                self.emit(SessionEvent::SetPointMismatch {
                    index,
                    commanded,
                    readback,
                });
            }
            Err(e) => return Err(Halt::Failed(e)),
        }

        let burst = self.meter.trigger().await?;
        self.wait(burst).await?;
        let stats = self.meter.read().await?;

        let point = MeasurementPoint::new(index, amps, stats);
        self.dataset.record(&point).await?;
        self.points_measured += 1;
        debug!(index, current = amps, voltage = stats.mean, std = stats.std_dev, "point measured");

        self.emit(SessionEvent::PointUpdated { point });
        self.dataset.tick_display().await;
        self.emit(SessionEvent::DisplayTick);
        Ok(())
    }

    /// Meter reset, source stop, source reset. Every step runs; the first error is returned.
    async fn safe_shutdown(&mut self) -> AppResult<()> {
        let steps = [
            ("meter reset", self.meter.reset().await),
            ("source stop", self.source.stop().await),
            ("source reset", self.source.reset().await),
        ];

        let mut first = None;
        for (step, result) in steps {
            if let Err(e) = result {
                error!(step, error = %e, "safe shutdown step failed");
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => {
                debug!("instruments returned to safe state");
                Ok(())
            }
        }
    }

    /// Sleep for `duration` unless cancelled first.
    async fn wait(&mut self, duration: Duration) -> Result<(), Halt> {
        tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => Err(Halt::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Point boundary: stop on cancel, block while paused.
    async fn checkpoint(&mut self) -> Result<(), Halt> {
        if *self.cancel.borrow_and_update() {
            return Err(Halt::Cancelled);
        }
        if !*self.pause.borrow_and_update() {
            return Ok(());
        }

        self.set_state(SessionState::Paused);
        info!(next_point = self.points_measured, "session paused");
        loop {
            if *self.cancel.borrow_and_update() {
                return Err(Halt::Cancelled);
            }
            if !*self.pause.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = self.cancel.changed() => {}
                _ = self.pause.changed() => {}
            }
        }
        info!("session resumed");
        self.set_state(SessionState::Running);
        Ok(())
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "session state");
            self.emit(SessionEvent::StateChanged { state });
        }
    }

    fn emit(&self, event: SessionEvent) {
        self.observer.notify(&event);
    }
}

impl fmt::Debug for MeasurementSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeasurementSession")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockBench, MockCircuit, MockCurrentSource, MockVoltageMeter};
    use tracing_test::traced_test;

    fn fast_options() -> SessionOptions {
        SessionOptions {
            settle: Duration::ZERO,
            reset_hold: Duration::from_millis(1),
            meter: MeterSettings {
                sampling_interval_s: 0.0001,
                trigger_delay_s: 0.0,
                sample_count: 2,
            },
        }
    }

    #[tokio::test]
    async fn reset_order_completes_without_dataset_writes() {
        let bench = MockBench::new(100.0);
        let dataset = SharedDataset::new();
        let (observer, mut rx) = ChannelObserver::new();
        let request = SessionRequest::new(SessionOrder::Reset, bench.source.clone(), bench.meter.clone());

        let (session, _signals) =
            MeasurementSession::new(request, dataset.clone(), Arc::new(observer), fast_options())
                .unwrap();
        let outcome = session.run().await;

        assert!(outcome.is_success());
        assert_eq!(outcome.points_measured, 0);
        assert_eq!(bench.source.snapshot().reset_count, 1);
        assert_eq!(bench.meter.snapshot().reset_count, 1);
        assert_eq!(dataset.len().await, 1);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, SessionEvent::DatasetSized { .. }));
            last = Some(event);
        }
        assert_eq!(last, Some(SessionEvent::SessionCompleted));
    }

    #[tokio::test]
    async fn invalid_request_never_builds_a_session() {
        let bench = MockBench::new(100.0);
        let request = SessionRequest::new(
            SessionOrder::measure(0.001, 0.01),
            bench.source.clone(),
            bench.meter.clone(),
        );
        let result = MeasurementSession::new(
            request,
            SharedDataset::new(),
            Arc::new(NullObserver),
            fast_options(),
        );
        assert!(matches!(result, Err(IvError::Validation(_))));
        assert!(bench.source.snapshot().commanded.is_empty());
    }

    #[tokio::test]
    async fn cancel_before_first_point_aborts_safely() {
        let bench = MockBench::new(100.0);
        let request = SessionRequest::new(
            SessionOrder::measure(0.01, 0.001),
            bench.source.clone(),
            bench.meter.clone(),
        );
        let (session, signals) = MeasurementSession::new(
            request,
            SharedDataset::new(),
            Arc::new(NullObserver),
            fast_options(),
        )
        .unwrap();

        signals.cancel();
        let outcome = session.run().await;

        assert_eq!(outcome.state, SessionState::Aborted);
        assert_eq!(outcome.points_measured, 0);
        assert!(bench.source.snapshot().is_safe());
        assert!(bench.meter.snapshot().is_safe());
        assert_eq!(signals.state(), SessionState::Aborted);
    }

    #[tokio::test]
    #[traced_test]
    async fn mismatch_is_logged_and_sweep_continues() {
        let circuit = Arc::new(MockCircuit::new(100.0));
        let source = Arc::new(MockCurrentSource::new(circuit.clone()).with_readback_error(-0.1));
        let meter = Arc::new(MockVoltageMeter::new(circuit));
        let request = SessionRequest::new(SessionOrder::measure(0.001, 0.001), source, meter);

        let (session, _signals) = MeasurementSession::new(
            request,
            SharedDataset::new(),
            Arc::new(NullObserver),
            fast_options(),
        )
        .unwrap();
        let outcome = session.run().await;

        assert!(outcome.is_success());
        assert_eq!(outcome.points_measured, 8);
        assert_eq!(outcome.mismatches, 4);
        assert!(logs_contain("set point mismatch"));
    }
}
