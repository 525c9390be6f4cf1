//! Configuration System using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults (`IvConfig::default()`)
//! 2. `config/iv_sweep.toml` (or an explicit file)
//! 3. Environment variables prefixed with `IV_SWEEP_`
//!
//! # Example
//! ```no_run
//! use iv_sweep::config::IvConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IvConfig::load()?;
//! config.validate()?;
//! println!("Settle interval: {} ms", config.sweep.settle_ms);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, IvError};
use crate::hardware::capabilities::MeterSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/iv_sweep.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IvConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sweep timing
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Default voltage meter timing
    #[serde(default)]
    pub meter: MeterSettings,
    /// Instrument pair used by the CLI
    #[serde(default)]
    pub instruments: InstrumentsConfig,
    /// Known instrument addresses (see `hardware::discovery`)
    #[serde(default)]
    pub resources: Vec<String>,
    /// Export defaults
    #[serde(default)]
    pub export: ExportConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "IV Sweep".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Timing of the measurement session and its controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Wait before commanding each set point, in milliseconds
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Hold after resetting both instruments, in milliseconds
    #[serde(default = "default_reset_hold_ms")]
    pub reset_hold_ms: u64,
    /// Bound on waiting for a cancelled session to stop, in milliseconds
    #[serde(default = "default_cancel_timeout_ms")]
    pub cancel_timeout_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            reset_hold_ms: default_reset_hold_ms(),
            cancel_timeout_ms: default_cancel_timeout_ms(),
        }
    }
}

impl SweepConfig {
    /// Settle interval as a `Duration`
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Reset hold as a `Duration`
    pub fn reset_hold(&self) -> Duration {
        Duration::from_millis(self.reset_hold_ms)
    }

    /// Cancellation bound as a `Duration`
    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }
}

/// One instrument binding: registry model tag plus resource address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentBinding {
    /// Model tag (e.g., "Yokogawa GS200")
    pub model: String,
    /// Resource address (e.g., "TCPIP0::192.168.0.20::7655::SOCKET")
    pub address: String,
}

/// The fixed instrument pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentsConfig {
    /// Current source binding
    pub current_source: InstrumentBinding,
    /// Voltage meter binding
    pub voltage_meter: InstrumentBinding,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            current_source: InstrumentBinding {
                model: crate::hardware::registry::MOCK_CURRENT_SOURCE.to_string(),
                address: "MOCK::SOURCE".to_string(),
            },
            voltage_meter: InstrumentBinding {
                model: crate::hardware::registry::MOCK_VOLTAGE_METER.to_string(),
                address: "MOCK::METER".to_string(),
            },
        }
    }
}

/// Export defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory for exported datasets
    pub output_dir: PathBuf,
    /// Format used when none is given ("text", "csv" or "arrow")
    pub default_format: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            default_format: "csv".to_string(),
        }
    }
}

fn default_settle_ms() -> u64 {
    100
}

fn default_reset_hold_ms() -> u64 {
    100
}

fn default_cancel_timeout_ms() -> u64 {
    1000
}

impl IvConfig {
    /// Load configuration from the default file and environment variables.
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    /// Example override: `IV_SWEEP_SWEEP__SETTLE_MS=50`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(IvConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("IV_SWEEP_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(IvError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.sweep.cancel_timeout_ms == 0 {
            return Err(IvError::Validation(
                "cancel_timeout_ms must be greater than zero".to_string(),
            ));
        }

        self.meter.validate()?;

        let valid_formats = ["text", "csv", "arrow"];
        if !valid_formats.contains(&self.export.default_format.as_str()) {
            return Err(IvError::Validation(format!(
                "Invalid export format '{}'. Must be one of: {}",
                self.export.default_format,
                valid_formats.join(", ")
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for address in &self.resources {
            if !seen.insert(address) {
                return Err(IvError::Validation(format!(
                    "Duplicate resource address: {}",
                    address
                )));
            }
        }

        Ok(())
    }
}
