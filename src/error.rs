//! Custom error types for the application.
//!
//! This module defines the primary error type, `IvError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failure that can occur around an I-V sweep, from bad
//! session parameters to instrument communication problems.
//!
//! ## Error Hierarchy
//!
//! - **`Validation`**: malformed or missing session parameters. Rejected before any
//!   instrument I/O takes place.
//! - **`SetPointMismatch`**: the current source read back a level that differs from the
//!   commanded one by more than 1%. The session logs it and keeps sweeping.
//! - **`InstrumentIo`** / **`NoBurst`**: communication failures and protocol misuse.
//!   Fatal to the running session, which then attempts a safe shutdown.
//! - **`CancellationTimeout`**: the controller could not confirm that a cancelled
//!   session stopped. The safety state of the instruments is unknown.
//! - **`UnsupportedFormat`** / **`Export`** / **`NoData`**: export and analysis errors,
//!   rejected synchronously without touching the output path.
//!
//! By using `#[from]`, `IvError` can be created from underlying error types,
//! simplifying error handling with the `?` operator.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, IvError>;

/// Application error type.
#[derive(Error, Debug)]
pub enum IvError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Set point mismatch: commanded {commanded:.6e} A, read back {readback:.6e} A")]
    SetPointMismatch { commanded: f64, readback: f64 },

    #[error("Instrument I/O error: {0}")]
    InstrumentIo(String),

    #[error("No burst triggered on {0} since the last read")]
    NoBurst(String),

    #[error("Session did not stop within {0:?} after cancellation")]
    CancellationTimeout(Duration),

    #[error("A measurement session is already active")]
    ControllerBusy,

    #[error("No measurement session is active")]
    NoActiveSession,

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Dataset holds no measured data")]
    NoData,

    #[error("Unknown instrument model: {0}")]
    UnknownModel(String),

    #[error("Invalid resource address: {0}")]
    InvalidAddress(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IvError {
    /// Whether this error terminates a running measurement session.
    ///
    /// A set point mismatch is recorded and the sweep goes on; everything that
    /// reaches an instrument and fails is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IvError::SetPointMismatch { .. })
    }
}

impl From<figment::Error> for IvError {
    fn from(err: figment::Error) -> Self {
        IvError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IvError::InstrumentIo("GS200 write failed".to_string());
        assert_eq!(err.to_string(), "Instrument I/O error: GS200 write failed");
    }

    #[test]
    fn mismatch_is_not_fatal() {
        let err = IvError::SetPointMismatch {
            commanded: 1e-3,
            readback: 1.2e-3,
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("commanded"));
        assert!(IvError::InstrumentIo("timeout".into()).is_fatal());
        assert!(IvError::CancellationTimeout(Duration::from_secs(1)).is_fatal());
    }
}
