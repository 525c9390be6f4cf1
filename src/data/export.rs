//! Dataset export writers.
//!
//! Three formats, all with the columns current (A), voltage (V) and voltage
//! std (V):
//!
//! | Format | Extension | Layout |
//! |--------|-----------|--------|
//! | `text` | `.txt` | `# Current (A),Voltage (V),Std.s` comment header, `%.18e` values |
//! | `csv` | `.csv` | header row `Current (A),Voltage (V),Std.s` (feature `storage_csv`) |
//! | `arrow` | `.arrow` | Arrow IPC file, Float64 fields `Current`, `Voltage`, `stdS` (feature `storage_arrow`) |
//!
//! Every writer fills a temporary file next to the destination and renames it
//! into place, so a failed export never leaves a partial file behind.

use crate::data::dataset::Dataset;
use crate::error::{AppResult, IvError};
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;

/// Column titles shared by the text and CSV writers
pub const COLUMN_HEADER: [&str; 3] = ["Current (A)", "Voltage (V)", "Std.s"];

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// Comma-delimited text with a `#` header
    Text,
    /// CSV with a header row
    Csv,
    /// Arrow IPC file
    Arrow,
}

impl ExportFormat {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> AppResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| IvError::UnsupportedFormat(path.display().to_string()))?;
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Ok(ExportFormat::Text),
            "csv" => Ok(ExportFormat::Csv),
            "arrow" => Ok(ExportFormat::Arrow),
            other => Err(IvError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Conventional file extension
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Csv => "csv",
            ExportFormat::Arrow => "arrow",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = IvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ExportFormat::Text),
            "csv" => Ok(ExportFormat::Csv),
            "arrow" => Ok(ExportFormat::Arrow),
            other => Err(IvError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportFormat::Text => "text",
            ExportFormat::Csv => "csv",
            ExportFormat::Arrow => "arrow",
        };
        f.write_str(name)
    }
}

/// Export to `path`, choosing the format from its extension.
pub fn export_auto(dataset: &Dataset, path: &Path) -> AppResult<PathBuf> {
    let format = check_destination(path)?;
    export(dataset, path, format)
}

/// Format for `path`, failing if the extension is unknown or its writer is
/// compiled out. Touches nothing on disk.
pub fn check_destination(path: &Path) -> AppResult<ExportFormat> {
    let format = ExportFormat::from_path(path)?;
    ensure_enabled(format)?;
    Ok(format)
}

/// Export `dataset` to `path` in `format`.
///
/// Returns the written path. Nothing exists at `path` unless the whole file was
/// written.
pub fn export(dataset: &Dataset, path: &Path, format: ExportFormat) -> AppResult<PathBuf> {
    if dataset.is_empty() {
        return Err(IvError::NoData);
    }
    ensure_enabled(format)?;

    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let mut staged = NamedTempFile::new_in(&parent)?;
    match format {
        ExportFormat::Text => write_text(dataset, staged.as_file_mut())?,
        ExportFormat::Csv => write_csv(dataset, staged.as_file_mut())?,
        ExportFormat::Arrow => write_arrow(dataset, staged.as_file_mut())?,
    }
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| IvError::Io(e.error))?;

    tracing::info!(path = %path.display(), %format, rows = dataset.len(), "dataset exported");
    Ok(path.to_path_buf())
}

fn ensure_enabled(format: ExportFormat) -> AppResult<()> {
    match format {
        ExportFormat::Text => Ok(()),
        ExportFormat::Csv if cfg!(feature = "storage_csv") => Ok(()),
        ExportFormat::Arrow if cfg!(feature = "storage_arrow") => Ok(()),
        ExportFormat::Csv => Err(IvError::FeatureNotEnabled("storage_csv".to_string())),
        ExportFormat::Arrow => Err(IvError::FeatureNotEnabled("storage_arrow".to_string())),
    }
}

/// Format like C `%.18e`: at least two exponent digits, explicit sign.
fn format_sci(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let formatted = format!("{:.18e}", value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => formatted,
    }
}

fn write_text<W: Write>(dataset: &Dataset, out: W) -> AppResult<()> {
    let mut out = BufWriter::new(out);
    writeln!(out, "# {}", COLUMN_HEADER.join(","))?;
    for ((i, v), s) in dataset
        .currents()
        .iter()
        .zip(dataset.voltages())
        .zip(dataset.voltage_stds())
    {
        writeln!(out, "{},{},{}", format_sci(*i), format_sci(*v), format_sci(*s))?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(feature = "storage_csv")]
fn write_csv<W: Write>(dataset: &Dataset, out: W) -> AppResult<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer
        .write_record(COLUMN_HEADER)
        .map_err(|e| IvError::Export(format!("CSV header: {}", e)))?;
    for ((i, v), s) in dataset
        .currents()
        .iter()
        .zip(dataset.voltages())
        .zip(dataset.voltage_stds())
    {
        writer
            .write_record(&[i.to_string(), v.to_string(), s.to_string()])
            .map_err(|e| IvError::Export(format!("CSV row: {}", e)))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(not(feature = "storage_csv"))]
fn write_csv<W: Write>(_dataset: &Dataset, _out: W) -> AppResult<()> {
    Err(IvError::FeatureNotEnabled("storage_csv".to_string()))
}

#[cfg(feature = "storage_arrow")]
fn write_arrow<W: Write>(dataset: &Dataset, out: W) -> AppResult<()> {
    use arrow::array::{ArrayRef, Float64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::ipc::writer::FileWriter;
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    let schema = Arc::new(Schema::new(vec![
        Field::new("Current", DataType::Float64, false),
        Field::new("Voltage", DataType::Float64, false),
        Field::new("stdS", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from(dataset.currents().to_vec())),
        Arc::new(Float64Array::from(dataset.voltages().to_vec())),
        Arc::new(Float64Array::from(dataset.voltage_stds().to_vec())),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| IvError::Export(format!("Arrow batch: {}", e)))?;

    let mut writer = FileWriter::try_new(out, &schema)
        .map_err(|e| IvError::Export(format!("Arrow writer: {}", e)))?;
    writer
        .write(&batch)
        .map_err(|e| IvError::Export(format!("Arrow write: {}", e)))?;
    writer
        .finish()
        .map_err(|e| IvError::Export(format!("Arrow finish: {}", e)))?;
    Ok(())
}

#[cfg(not(feature = "storage_arrow"))]
fn write_arrow<W: Write>(_dataset: &Dataset, _out: W) -> AppResult<()> {
    Err(IvError::FeatureNotEnabled("storage_arrow".to_string()))
}
