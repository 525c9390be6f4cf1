//! Instrument Capabilities
//!
//! The measurement core talks to hardware only through the traits in this module.
//! Every instrument implements [`Instrument`] (identity and reset); the two roles of
//! an I-V sweep add their own capability on top:
//!
//! - A current source implements [`CurrentSource`]: configure, command a set point, stop
//! - A voltage meter implements [`VoltageMeter`]: configure, trigger a burst, read it
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync, state behind interior mutability)
//! - Uses `AppResult` so the session can tell a set point mismatch from an I/O failure
//!
//! # Example
//!
//! ```rust,ignore
//! async fn one_point<S, M>(source: &S, meter: &M, amps: f64) -> AppResult<BurstStats>
//! where
//!     S: CurrentSource,
//!     M: VoltageMeter,
//! {
//!     source.start(amps).await?;
//!     meter.start().await?;
//!     meter.read().await
//! }
//! ```

use crate::error::{AppResult, IvError};
use crate::measurement::BurstStats;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Relative tolerance between a commanded current and its read-back value.
pub const SET_POINT_TOLERANCE: f64 = 0.01;

/// Extra wait appended to a SCPI meter burst before fetching, in seconds.
pub const BURST_MARGIN_S: f64 = 0.1;

/// Role of an instrument in the sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    /// Programmable current source
    CurrentSource,
    /// Sampling voltage meter
    VoltageMeter,
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentKind::CurrentSource => write!(f, "Current Source"),
            InstrumentKind::VoltageMeter => write!(f, "Voltage Meter"),
        }
    }
}

/// Current source configuration applied once per session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentSourceSettings {
    /// Largest magnitude the sweep will command, in amps
    pub max_current: f64,
    /// Nominal step between set points, in amps
    pub step: f64,
}

/// Voltage meter burst configuration applied once per session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterSettings {
    /// Time between samples of one burst, in seconds
    pub sampling_interval_s: f64,
    /// Delay between trigger and first sample, in seconds
    pub trigger_delay_s: f64,
    /// Samples per burst
    pub sample_count: u32,
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            sampling_interval_s: 0.1,
            trigger_delay_s: 0.005,
            sample_count: 5,
        }
    }
}

impl MeterSettings {
    /// Reject non-positive timings and empty bursts.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.sampling_interval_s.is_finite() && self.sampling_interval_s > 0.0) {
            return Err(IvError::Validation(format!(
                "sampling interval must be positive, got {}",
                self.sampling_interval_s
            )));
        }
        if !(self.trigger_delay_s.is_finite() && self.trigger_delay_s >= 0.0) {
            return Err(IvError::Validation(format!(
                "trigger delay must not be negative, got {}",
                self.trigger_delay_s
            )));
        }
        if self.sample_count == 0 {
            return Err(IvError::Validation(
                "sample count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Time the meter needs to acquire one burst (delay plus all samples).
    pub fn acquisition_time(&self) -> Duration {
        Duration::from_secs_f64(
            self.trigger_delay_s + self.sampling_interval_s * f64::from(self.sample_count),
        )
    }

    /// Acquisition time plus the fetch margin used by SCPI meters.
    pub fn burst_duration(&self) -> Duration {
        self.acquisition_time() + Duration::from_secs_f64(BURST_MARGIN_S)
    }
}

/// Compare a commanded current with the level the source reports back.
///
/// Returns `IvError::SetPointMismatch` when they differ by more than 1% of the
/// commanded value.
pub fn check_set_point(commanded: f64, readback: f64) -> AppResult<()> {
    if (commanded - readback).abs() > (commanded * SET_POINT_TOLERANCE).abs() {
        return Err(IvError::SetPointMismatch {
            commanded,
            readback,
        });
    }
    Ok(())
}

/// Identity and reset, shared by every instrument.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Model name (e.g., "Yokogawa GS200")
    fn name(&self) -> &str;

    /// Role of this instrument
    fn kind(&self) -> InstrumentKind;

    /// Return to a known, safe, de-energized state.
    ///
    /// Idempotent: resetting twice leaves the instrument as resetting once does.
    async fn reset(&self) -> AppResult<()>;
}

/// Capability: programmable current output
///
/// # Contract
/// - `configure` must precede the first `start` of a session and enables the output
/// - `start` blocks for the hardware settling interval before verifying the level
/// - `stop` must run at the end of every session and on every abort path
#[async_trait]
pub trait CurrentSource: Instrument {
    /// Apply the session settings and enable the output.
    async fn configure(&self, settings: &CurrentSourceSettings) -> AppResult<()>;

    /// Command the output to `amps` and verify the read-back level.
    ///
    /// # Returns
    /// - Ok(()) when the read-back is within 1% of the command
    /// - Err(IvError::SetPointMismatch) when it is not (the level stays commanded)
    /// - Err(IvError::InstrumentIo) on communication failure
    async fn start(&self, amps: f64) -> AppResult<()>;

    /// Drive the output to zero and disable it.
    async fn stop(&self) -> AppResult<()>;

    /// Stop, then reset.
    async fn close(&self) -> AppResult<()> {
        self.stop().await?;
        self.reset().await
    }
}

/// Capability: triggered burst voltage measurement
///
/// # Contract
/// - `configure` must precede the first `trigger` of a session
/// - `read` consumes the burst armed by the latest `trigger`; reading twice, or
///   without a trigger, fails with `IvError::NoBurst`
#[async_trait]
pub trait VoltageMeter: Instrument {
    /// Apply burst timing.
    async fn configure(&self, settings: &MeterSettings) -> AppResult<()>;

    /// Arm and trigger one burst.
    ///
    /// Returns how long the caller must wait before the burst is complete.
    async fn trigger(&self) -> AppResult<Duration>;

    /// Trigger one burst and block until it is guaranteed complete.
    async fn start(&self) -> AppResult<()> {
        let wait = self.trigger().await?;
        tokio::time::sleep(wait).await;
        Ok(())
    }

    /// Mean and sample standard deviation of the latest burst, in volts.
    async fn read(&self) -> AppResult<BurstStats>;
}
