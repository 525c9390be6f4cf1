//! Yokogawa GS200 DC Voltage/Current Source Driver
//!
//! Protocol Overview:
//! - SCPI over any [`ScpiTransport`] (USB-TMC/LAN gateways, raw socket, serial)
//! - Levels are commanded in milliamps (`:SOUR:LEV:FIX 1.000000mA`)
//! - Level queries (`:SOUR:LEV:FIX?`) reply in amps, e.g. `+1.00000E-03`
//!
//! # Example Usage
//!
//! ```no_run
//! use iv_sweep::hardware::capabilities::{CurrentSource, CurrentSourceSettings};
//! use iv_sweep::hardware::transport::TcpTransport;
//! use iv_sweep::hardware::yokogawa_gs200::YokogawaGs200;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> iv_sweep::error::AppResult<()> {
//!     let source = YokogawaGs200::new(Arc::new(TcpTransport::new("192.168.0.20", 7655)));
//!     source
//!         .configure(&CurrentSourceSettings { max_current: 0.01, step: 0.001 })
//!         .await?;
//!     source.start(0.002).await?;
//!     source.close().await
//! }
//! ```

use crate::error::{AppResult, IvError};
use crate::hardware::capabilities::{
    check_set_point, CurrentSource, CurrentSourceSettings, Instrument, InstrumentKind,
};
use crate::hardware::transport::ScpiTransport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Model tag used by the registry
pub const MODEL: &str = "Yokogawa GS200";

/// Hardware settling interval between commanding a level and reading it back.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

/// Driver for the Yokogawa GS200 in current-source mode
pub struct YokogawaGs200 {
    transport: Arc<dyn ScpiTransport>,
    settle: Duration,
    settings: RwLock<Option<CurrentSourceSettings>>,
}

impl YokogawaGs200 {
    /// Create a driver over an open transport
    pub fn new(transport: Arc<dyn ScpiTransport>) -> Self {
        Self {
            transport,
            settle: DEFAULT_SETTLE,
            settings: RwLock::new(None),
        }
    }

    /// Override the settling interval used by `start`
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Settings applied by the last `configure`, if any
    pub async fn settings(&self) -> Option<CurrentSourceSettings> {
        *self.settings.read().await
    }

    /// Parse a level reply such as `+1.00000E-03` (amps).
    fn parse_level(response: &str) -> AppResult<f64> {
        let trimmed = response.trim();
        if trimmed.is_empty() {
            return Err(IvError::InstrumentIo("empty level response".into()));
        }
        trimmed.parse::<f64>().map_err(|_| {
            IvError::InstrumentIo(format!("failed to parse level response: '{}'", trimmed))
        })
    }
}

#[async_trait]
impl Instrument for YokogawaGs200 {
    fn name(&self) -> &str {
        MODEL
    }

    fn kind(&self) -> InstrumentKind {
        InstrumentKind::CurrentSource
    }

    async fn reset(&self) -> AppResult<()> {
        self.transport.write("*RST; *CLS").await?;
        *self.settings.write().await = None;
        Ok(())
    }
}

#[async_trait]
impl CurrentSource for YokogawaGs200 {
    async fn configure(&self, settings: &CurrentSourceSettings) -> AppResult<()> {
        let limit_ma = settings.max_current.abs() * 1000.0;
        self.transport
            .write(&format!(":SOUR:PROT:CURR {:.6}mA", limit_ma))
            .await?;
        self.transport.write(":SOUR:FUNC CURR; :OUTP ON").await?;
        *self.settings.write().await = Some(*settings);
        Ok(())
    }

    async fn start(&self, amps: f64) -> AppResult<()> {
        if self.settings.read().await.is_none() {
            return Err(IvError::Validation(format!(
                "{} must be configured before commanding a level",
                MODEL
            )));
        }

        self.transport
            .write(&format!(":SOUR:LEV:FIX {:.6}mA", amps * 1000.0))
            .await?;
        tokio::time::sleep(self.settle).await;

        let response = self.transport.query(":SOUR:LEV:FIX?").await?;
        let readback = Self::parse_level(&response)?;
        check_set_point(amps, readback)
    }

    async fn stop(&self) -> AppResult<()> {
        self.transport.write(":SOUR:LEV:FIX 0").await?;
        self.transport.write(":SOUR:FUNC CURR; :OUTP OFF").await
    }
}
