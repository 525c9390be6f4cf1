//! Sweep planning and execution.
//!
//! - [`plan`]: the symmetric set-point pattern
//! - [`request`]: validated session inputs
//! - [`session`]: the per-point state machine and its notifications
//! - [`controller`]: one session at a time on a background task

pub mod controller;
pub mod plan;
pub mod request;
pub mod session;

pub use controller::SessionController;
pub use plan::SweepPlan;
pub use request::{SessionOrder, SessionRequest};
pub use session::{
    ChannelObserver, MeasurementSession, NullObserver, SessionEvent, SessionObserver,
    SessionOptions, SessionOutcome, SessionSignals, SessionState,
};
