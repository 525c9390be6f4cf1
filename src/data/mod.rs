//! Sweep results and their export.

pub mod dataset;
pub mod export;

pub use dataset::{Dataset, DisplaySnapshot, SharedDataset};
pub use export::{check_destination, export, export_auto, ExportFormat};
