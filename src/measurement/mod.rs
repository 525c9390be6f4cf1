//! Per-point measurement values.
//!
//! A voltage meter burst is reduced to a [`BurstStats`] (mean and sample standard
//! deviation); the session pairs it with the commanded current to form a
//! [`MeasurementPoint`].

pub mod analysis;

use crate::error::{AppResult, IvError};
use serde::{Deserialize, Serialize};

/// Mean and sample standard deviation of one burst of readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurstStats {
    /// Arithmetic mean, in volts
    pub mean: f64,
    /// Sample standard deviation (N-1 denominator), in volts
    pub std_dev: f64,
    /// Number of samples in the burst
    pub count: usize,
}

impl BurstStats {
    /// Reduce raw samples to mean and sample standard deviation.
    ///
    /// A single-sample burst has no spread to estimate and reports `std_dev = 0.0`.
    /// Non-finite samples are rejected: they come from overload markers the meter
    /// emits in place of a reading.
    pub fn from_samples(samples: &[f64]) -> AppResult<Self> {
        if samples.is_empty() {
            return Err(IvError::InstrumentIo("burst contained no samples".into()));
        }
        if let Some(bad) = samples.iter().find(|s| !s.is_finite()) {
            return Err(IvError::InstrumentIo(format!(
                "burst contained a non-finite sample: {}",
                bad
            )));
        }

        let n = samples.len();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let std_dev = if n > 1 {
            let ss: f64 = samples.iter().map(|s| (s - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        } else {
            0.0
        };

        Ok(Self {
            mean,
            std_dev,
            count: n,
        })
    }
}

/// Result of one set point of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPoint {
    /// Position in the sweep plan
    pub index: usize,
    /// Commanded current, in amps
    pub current: f64,
    /// Mean voltage of the burst, in volts
    pub voltage: f64,
    /// Sample standard deviation of the burst, in volts
    pub voltage_std: f64,
}

impl MeasurementPoint {
    /// Pair a commanded current with the burst measured at it.
    pub fn new(index: usize, current: f64, stats: BurstStats) -> Self {
        Self {
            index,
            current,
            voltage: stats.mean,
            voltage_std: stats.std_dev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_sample_std() {
        let stats = BurstStats::from_samples(&[1.0, 1.0, 1.0, 1.0, 1.1]).unwrap();
        assert!((stats.mean - 1.02).abs() < 1e-12);
        assert!((stats.std_dev - 0.044_721_36).abs() < 1e-6);
        assert_eq!(stats.count, 5);
    }

    #[test]
    fn single_sample_has_zero_spread() {
        let stats = BurstStats::from_samples(&[0.25]).unwrap();
        assert_eq!(stats.mean, 0.25);
        assert_eq!(stats.std_dev, 0.0);
    }

    #[test]
    fn empty_or_overloaded_burst_is_rejected() {
        assert!(BurstStats::from_samples(&[]).is_err());
        assert!(BurstStats::from_samples(&[1.0, f64::NAN]).is_err());
    }

    #[test]
    fn point_from_stats() {
        let stats = BurstStats {
            mean: 0.5,
            std_dev: 0.01,
            count: 5,
        };
        let point = MeasurementPoint::new(3, 0.002, stats);
        assert_eq!(point.index, 3);
        assert_eq!(point.voltage, 0.5);
        assert_eq!(point.voltage_std, 0.01);
    }
}
