//! Sweep results and the display copy taken from them.
//!
//! [`Dataset`] holds three equal-length columns (current, voltage, std) sized
//! once per sweep and filled one index at a time. [`SharedDataset`] is the handle
//! the host and the session task share: the session writes, the host reads and
//! exports. The display snapshot is a second copy of the current and voltage
//! columns that stops following the dataset while `hold` is set.

use crate::error::{AppResult, IvError};
use crate::measurement::analysis::{fit_resistance, live_resistance, ResistanceFit};
use crate::measurement::MeasurementPoint;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Current, voltage and voltage-std columns of one sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    current: Vec<f64>,
    voltage: Vec<f64>,
    voltage_std: Vec<f64>,
}

impl Default for Dataset {
    fn default() -> Self {
        Self::refreshed()
    }
}

impl Dataset {
    /// The cleared dataset: one zero row.
    pub fn refreshed() -> Self {
        Self::zeroed(1)
    }

    /// `len` zero rows
    pub fn zeroed(len: usize) -> Self {
        Self {
            current: vec![0.0; len],
            voltage: vec![0.0; len],
            voltage_std: vec![0.0; len],
        }
    }

    /// Build from columns of equal length
    pub fn from_columns(
        current: Vec<f64>,
        voltage: Vec<f64>,
        voltage_std: Vec<f64>,
    ) -> AppResult<Self> {
        if current.len() != voltage.len() || current.len() != voltage_std.len() {
            return Err(IvError::Validation(format!(
                "column lengths differ: {} / {} / {}",
                current.len(),
                voltage.len(),
                voltage_std.len()
            )));
        }
        Ok(Self {
            current,
            voltage,
            voltage_std,
        })
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// True only for a dataset built from empty columns
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Current column (A)
    pub fn currents(&self) -> &[f64] {
        &self.current
    }

    /// Voltage column (V)
    pub fn voltages(&self) -> &[f64] {
        &self.voltage
    }

    /// Voltage standard deviation column (V)
    pub fn voltage_stds(&self) -> &[f64] {
        &self.voltage_std
    }

    /// Row `index` as a point
    pub fn point(&self, index: usize) -> Option<MeasurementPoint> {
        Some(MeasurementPoint {
            index,
            current: *self.current.get(index)?,
            voltage: *self.voltage.get(index)?,
            voltage_std: *self.voltage_std.get(index)?,
        })
    }

    /// Overwrite the row at `point.index`.
    pub fn record(&mut self, point: &MeasurementPoint) -> AppResult<()> {
        let len = self.len();
        if point.index >= len {
            return Err(IvError::Internal(format!(
                "point index {} outside dataset of length {}",
                point.index, len
            )));
        }
        self.current[point.index] = point.current;
        self.voltage[point.index] = point.voltage;
        self.voltage_std[point.index] = point.voltage_std;
        Ok(())
    }

    /// Least-squares resistance of the whole dataset
    pub fn fit(&self) -> AppResult<ResistanceFit> {
        fit_resistance(&self.current, &self.voltage)
    }
}

/// Copy of the current and voltage columns for a live display
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisplaySnapshot {
    /// Current column (A)
    pub current: Vec<f64>,
    /// Voltage column (V)
    pub voltage: Vec<f64>,
}

impl DisplaySnapshot {
    fn of(dataset: &Dataset) -> Self {
        Self {
            current: dataset.current.clone(),
            voltage: dataset.voltage.clone(),
        }
    }

    /// `mean|V| / mean|I|` over rows with non-zero current
    pub fn live_resistance(&self) -> Option<f64> {
        live_resistance(&self.current, &self.voltage)
    }
}

/// Dataset handle shared by the host and the session task
#[derive(Debug, Clone)]
pub struct SharedDataset {
    data: Arc<RwLock<Dataset>>,
    display: Arc<RwLock<DisplaySnapshot>>,
    hold: Arc<AtomicBool>,
}

impl SharedDataset {
    /// Refreshed dataset, display following it
    pub fn new() -> Self {
        let dataset = Dataset::refreshed();
        Self {
            display: Arc::new(RwLock::new(DisplaySnapshot::of(&dataset))),
            data: Arc::new(RwLock::new(dataset)),
            hold: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the contents with `len` zero rows. Done once, before the first point.
    pub async fn presize(&self, len: usize) {
        *self.data.write().await = Dataset::zeroed(len);
    }

    /// Write one row. The lock is released on return.
    pub async fn record(&self, point: &MeasurementPoint) -> AppResult<()> {
        self.data.write().await.record(point)
    }

    /// Copy the dataset into the display snapshot unless held.
    ///
    /// Returns whether the snapshot was updated.
    pub async fn tick_display(&self) -> bool {
        if self.is_held() {
            return false;
        }
        let fresh = DisplaySnapshot::of(&*self.data.read().await);
        *self.display.write().await = fresh;
        true
    }

    /// Freeze (`true`) or release (`false`) the display snapshot
    pub fn set_hold(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    /// Whether the display snapshot is frozen
    pub fn is_held(&self) -> bool {
        self.hold.load(Ordering::SeqCst)
    }

    /// Clone of the dataset
    pub async fn snapshot(&self) -> Dataset {
        self.data.read().await.clone()
    }

    /// Clone of the display snapshot
    pub async fn display(&self) -> DisplaySnapshot {
        self.display.read().await.clone()
    }

    /// Number of rows
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Reset dataset and display to the one-zero-row state
    pub async fn refresh(&self) {
        let cleared = Dataset::refreshed();
        *self.display.write().await = DisplaySnapshot::of(&cleared);
        *self.data.write().await = cleared;
    }
}

impl Default for SharedDataset {
    fn default() -> Self {
        Self::new()
    }
}
