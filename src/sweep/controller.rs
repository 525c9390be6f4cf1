//! Session lifecycle on a background task.
//!
//! The controller owns at most one active [`MeasurementSession`]. It spawns the
//! session on a Tokio task, forwards cancel and pause requests, and hands back
//! the [`SessionOutcome`] when the task ends.
//!
//! # Example Usage
//!
//! ```no_run
//! use iv_sweep::data::SharedDataset;
//! use iv_sweep::hardware::mock::MockBench;
//! use iv_sweep::sweep::{ChannelObserver, SessionController, SessionOrder, SessionRequest};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> iv_sweep::error::AppResult<()> {
//!     let bench = MockBench::new(100.0);
//!     let (observer, mut events) = ChannelObserver::new();
//!     let controller = SessionController::new(SharedDataset::new(), Arc::new(observer));
//!
//!     controller
//!         .start(SessionRequest::new(
//!             SessionOrder::measure(0.01, 0.001),
//!             bench.source.clone(),
//!             bench.meter.clone(),
//!         ))
//!         .await?;
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{:?}", event);
//!         }
//!     });
//!
//!     let outcome = controller.wait().await?;
//!     println!("{} points", outcome.points_measured);
//!     Ok(())
//! }
//! ```

use crate::data::SharedDataset;
use crate::error::{AppResult, IvError};
use crate::sweep::request::SessionRequest;
use crate::sweep::session::{
    MeasurementSession, SessionObserver, SessionOptions, SessionOutcome, SessionSignals,
    SessionState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Time `cancel` waits for the session task to finish
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(1);

struct ActiveSession {
    id: Uuid,
    signals: SessionSignals,
    handle: JoinHandle<SessionOutcome>,
}

/// Starts, pauses, resumes and cancels measurement sessions
pub struct SessionController {
    dataset: SharedDataset,
    observer: Arc<dyn SessionObserver>,
    options: SessionOptions,
    cancel_timeout: Duration,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    /// Controller writing into `dataset` and notifying `observer`
    pub fn new(dataset: SharedDataset, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            dataset,
            observer,
            options: SessionOptions::default(),
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
            active: Mutex::new(None),
        }
    }

    /// Override session timing
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the bounded wait used by `cancel`
    pub fn with_cancel_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_timeout = timeout;
        self
    }

    /// Dataset the sessions write into
    pub fn dataset(&self) -> &SharedDataset {
        &self.dataset
    }

    /// Validate `request` and run it on a new task.
    ///
    /// Fails with `IvError::ControllerBusy` while another session is active; the
    /// running session is left untouched.
    pub async fn start(&self, request: SessionRequest) -> AppResult<Uuid> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            if !current.handle.is_finished() {
                warn!(active = %current.id, "start refused, session in progress");
                return Err(IvError::ControllerBusy);
            }
        }

        let (session, signals) = MeasurementSession::new(
            request,
            self.dataset.clone(),
            self.observer.clone(),
            self.options,
        )?;
        let id = session.id();
        let handle = tokio::spawn(session.run());
        info!(session = %id, "session spawned");

        if let Some(previous) = active.replace(ActiveSession {
            id,
            signals,
            handle,
        }) {
            // Finished but never awaited
            if let Err(e) = previous.handle.await {
                error!(session = %previous.id, error = %e, "previous session task panicked");
            }
        }
        Ok(id)
    }

    /// Cancel the active session and wait for its safe shutdown.
    ///
    /// Returns `IvError::CancellationTimeout` when the task does not finish within
    /// the cancel timeout; the instruments' state is then unknown. The task keeps
    /// running and stays the active session.
    pub async fn cancel(&self) -> AppResult<SessionOutcome> {
        let mut active = self.active.lock().await;
        let current = active.as_mut().ok_or(IvError::NoActiveSession)?;

        info!(session = %current.id, "cancelling session");
        current.signals.cancel();

        match tokio::time::timeout(self.cancel_timeout, &mut current.handle).await {
            Ok(joined) => {
                let id = current.id;
                *active = None;
                joined.map_err(|e| {
                    IvError::Internal(format!("session {} task failed: {}", id, e))
                })
            }
            Err(_) => {
                error!(
                    session = %current.id,
                    timeout = ?self.cancel_timeout,
                    "session did not stop after cancellation"
                );
                Err(IvError::CancellationTimeout(self.cancel_timeout))
            }
        }
    }

    /// Pause the active session at its next point boundary
    pub async fn pause(&self) -> AppResult<()> {
        let active = self.active.lock().await;
        let current = Self::running(&active)?;
        current.signals.pause();
        info!(session = %current.id, "pause requested");
        Ok(())
    }

    /// Resume a paused session
    pub async fn resume(&self) -> AppResult<()> {
        let active = self.active.lock().await;
        let current = Self::running(&active)?;
        current.signals.resume();
        info!(session = %current.id, "resume requested");
        Ok(())
    }

    /// Wait for the active session to end and return its outcome.
    ///
    /// The session stays registered while it runs, so `pause`, `resume`,
    /// `cancel` and the busy check in `start` keep working from other tasks.
    /// Returns `IvError::NoActiveSession` if `cancel` collected the outcome
    /// first.
    pub async fn wait(&self) -> AppResult<SessionOutcome> {
        let (id, mut state) = {
            let active = self.active.lock().await;
            let current = active.as_ref().ok_or(IvError::NoActiveSession)?;
            (current.id, current.signals.watch_state())
        };

        while !state.borrow_and_update().is_terminal() {
            if state.changed().await.is_err() {
                // Session dropped its signals; the join below reports how it ended
                break;
            }
        }

        let finished = {
            let mut active = self.active.lock().await;
            match active.as_ref() {
                Some(current) if current.id == id => active.take(),
                _ => None,
            }
        };
        let current = finished.ok_or(IvError::NoActiveSession)?;
        current
            .handle
            .await
            .map_err(|e| IvError::Internal(format!("session {} task failed: {}", current.id, e)))
    }

    /// Whether a session task is still running
    pub async fn is_active(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|current| !current.handle.is_finished())
            .unwrap_or(false)
    }

    /// State of the current (or last un-awaited) session; `Idle` when none
    pub async fn state(&self) -> SessionState {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|current| current.signals.state())
            .unwrap_or(SessionState::Idle)
    }

    /// State updates of the current session, for hosts that wait on a terminal state
    pub async fn watch_state(&self) -> Option<tokio::sync::watch::Receiver<SessionState>> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|current| current.signals.watch_state())
    }

    fn running(active: &Option<ActiveSession>) -> AppResult<&ActiveSession> {
        match active {
            Some(current) if !current.handle.is_finished() => Ok(current),
            _ => Err(IvError::NoActiveSession),
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("options", &self.options)
            .field("cancel_timeout", &self.cancel_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockBench;
    use crate::sweep::request::SessionOrder;
    use crate::sweep::session::NullObserver;

    #[tokio::test]
    async fn idle_controller_rejects_control_calls() {
        let controller = SessionController::new(SharedDataset::new(), Arc::new(NullObserver));
        assert!(!controller.is_active().await);
        assert_eq!(controller.state().await, SessionState::Idle);
        assert!(matches!(
            controller.pause().await,
            Err(IvError::NoActiveSession)
        ));
        assert!(matches!(
            controller.cancel().await,
            Err(IvError::NoActiveSession)
        ));
        assert!(matches!(
            controller.wait().await,
            Err(IvError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn reset_runs_to_completion() {
        let bench = MockBench::new(100.0);
        let controller = SessionController::new(SharedDataset::new(), Arc::new(NullObserver))
            .with_options(SessionOptions {
                reset_hold: Duration::from_millis(1),
                ..SessionOptions::default()
            });

        controller
            .start(SessionRequest::new(
                SessionOrder::Reset,
                bench.source.clone(),
                bench.meter.clone(),
            ))
            .await
            .unwrap();
        let outcome = controller.wait().await.unwrap();
        assert!(outcome.is_success());
        assert!(!controller.is_active().await);
    }
}
