//! Sweep pattern over a current range.
//!
//! A plan starts at zero, ramps to `+imax`, returns to zero, ramps to `-imax` and
//! returns to zero again:
//!
//! ```text
//! asc = [0, di, 2di, ..., imax]
//! plan = asc ++ rev(asc) ++ -asc ++ rev(-asc)
//! ```
//!
//! The ascending leg holds `n = floor(imax / di) + 1` points spread evenly from
//! 0 to exactly `imax`, point `k` being `imax * k / (n - 1)`. When `di` divides
//! `imax` this is `k * di`; otherwise the actual spacing is slightly wider than
//! `di`, and the last point still lands on `imax`.
//!
//! Plans longer than [`MAX_PLAN_POINTS`] are rejected up front.

use crate::error::{AppResult, IvError};
use serde::{Deserialize, Serialize};

/// Relative slack on `imax / di` so that e.g. `0.01 / 0.001` counts 10 steps.
const STEP_COUNT_EPSILON: f64 = 1e-9;

/// Longest accepted plan (all four legs). At the default 0.6 s burst this is
/// already more than a day of measuring.
pub const MAX_PLAN_POINTS: usize = 200_000;

/// Ordered current set points of one sweep, in amps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    imax: f64,
    di: f64,
    points: Vec<f64>,
}

impl SweepPlan {
    /// Build the symmetric plan for `imax` and `di` (amps).
    ///
    /// Fails with `IvError::Validation` unless both are finite, positive and
    /// `di <= imax`.
    pub fn new(imax: f64, di: f64) -> AppResult<Self> {
        validate_range(imax, di)?;

        let ascending = ascending_leg(imax, di);
        let mut points = Vec::with_capacity(ascending.len() * 4);
        points.extend_from_slice(&ascending);
        points.extend(ascending.iter().rev());
        points.extend(ascending.iter().map(|i| -i));
        points.extend(ascending.iter().rev().map(|i| -i));

        Ok(Self { imax, di, points })
    }

    /// Set points in measurement order
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// Number of set points (always `4 * leg_len()`)
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Never true for a constructed plan
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points in the ascending leg
    pub fn leg_len(&self) -> usize {
        self.points.len() / 4
    }

    /// Largest magnitude, in amps
    pub fn imax(&self) -> f64 {
        self.imax
    }

    /// Nominal step, in amps
    pub fn di(&self) -> f64 {
        self.di
    }
}

/// Check sweep bounds before any instrument is touched.
pub fn validate_range(imax: f64, di: f64) -> AppResult<()> {
    if !imax.is_finite() || imax <= 0.0 {
        return Err(IvError::Validation(format!(
            "maximum current must be positive and finite, got {}",
            imax
        )));
    }
    if !di.is_finite() || di <= 0.0 {
        return Err(IvError::Validation(format!(
            "current step must be positive and finite, got {}",
            di
        )));
    }
    if di > imax {
        return Err(IvError::Validation(format!(
            "current step {} exceeds maximum current {}",
            di, imax
        )));
    }

    let steps = step_count(imax, di);
    if !(steps.is_finite() && (steps + 1.0) * 4.0 <= MAX_PLAN_POINTS as f64) {
        return Err(IvError::Validation(format!(
            "step {} over {} needs more than {} set points",
            di, imax, MAX_PLAN_POINTS
        )));
    }
    Ok(())
}

fn step_count(imax: f64, di: f64) -> f64 {
    (imax / di * (1.0 + STEP_COUNT_EPSILON)).floor()
}

/// Only called after `validate_range`, which bounds the step count.
fn ascending_leg(imax: f64, di: f64) -> Vec<f64> {
    let steps = step_count(imax, di) as usize;
    (0..=steps)
        .map(|k| {
            if k == steps {
                imax
            } else {
                imax * k as f64 / steps as f64
            }
        })
        .collect()
}
