//! Resistance estimates from I-V data.

use crate::error::{AppResult, IvError};
use serde::{Deserialize, Serialize};

/// Linear least-squares fit `V = slope * I + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResistanceFit {
    /// Resistance, in ohms
    pub slope: f64,
    /// Voltage offset at zero current, in volts
    pub intercept: f64,
}

impl ResistanceFit {
    /// Fitted voltage at `current`
    pub fn voltage_at(&self, current: f64) -> f64 {
        self.slope * current + self.intercept
    }
}

/// Fit a straight line through a completed sweep.
///
/// Fails with `IvError::NoData` for one point or fewer (the refreshed, empty
/// dataset) and with `IvError::Validation` when all currents coincide.
pub fn fit_resistance(currents: &[f64], voltages: &[f64]) -> AppResult<ResistanceFit> {
    if currents.len() != voltages.len() {
        return Err(IvError::Validation(format!(
            "current and voltage columns differ in length ({} vs {})",
            currents.len(),
            voltages.len()
        )));
    }
    let n = currents.len();
    if n <= 1 {
        return Err(IvError::NoData);
    }

    let mean_i = currents.iter().sum::<f64>() / n as f64;
    let mean_v = voltages.iter().sum::<f64>() / n as f64;

    let (sxy, sxx) = currents
        .iter()
        .zip(voltages)
        .fold((0.0, 0.0), |(sxy, sxx), (i, v)| {
            let di = i - mean_i;
            (sxy + di * (v - mean_v), sxx + di * di)
        });

    if sxx == 0.0 {
        return Err(IvError::Validation(
            "all currents are equal, resistance is undefined".to_string(),
        ));
    }

    let slope = sxy / sxx;
    Ok(ResistanceFit {
        slope,
        intercept: mean_v - slope * mean_i,
    })
}

/// Quick resistance estimate for a sweep in progress: `mean|V| / mean|I|` over the
/// points with non-zero current. `None` until such a point exists.
pub fn live_resistance(currents: &[f64], voltages: &[f64]) -> Option<f64> {
    let (sum_i, sum_v, n) = currents
        .iter()
        .zip(voltages)
        .filter(|(i, _)| **i != 0.0)
        .fold((0.0, 0.0, 0usize), |(si, sv, n), (i, v)| {
            (si + i.abs(), sv + v.abs(), n + 1)
        });

    if n == 0 || sum_i == 0.0 {
        return None;
    }
    Some(sum_v / sum_i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_ohmic_device() {
        let currents = [-2e-3, -1e-3, 0.0, 1e-3, 2e-3];
        let voltages: Vec<f64> = currents.iter().map(|i| 100.0 * i + 0.01).collect();

        let fit = fit_resistance(&currents, &voltages).unwrap();
        assert!((fit.slope - 100.0).abs() < 1e-9);
        assert!((fit.intercept - 0.01).abs() < 1e-12);
        assert!((fit.voltage_at(1e-3) - 0.11).abs() < 1e-12);
    }

    #[test]
    fn refreshed_dataset_has_no_fit() {
        assert!(matches!(
            fit_resistance(&[0.0], &[0.0]),
            Err(IvError::NoData)
        ));
        assert!(fit_resistance(&[1.0, 1.0], &[0.0, 1.0]).is_err());
    }

    #[test]
    fn live_estimate_skips_zero_current() {
        let currents = [0.0, 1e-3, 2e-3, 0.0];
        let voltages = [0.5, 0.1, 0.2, 0.0];
        let r = live_resistance(&currents, &voltages).unwrap();
        assert!((r - 100.0).abs() < 1e-9);
        assert!(live_resistance(&[0.0], &[0.0]).is_none());
    }
}
