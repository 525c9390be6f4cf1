//! Agilent 34411A Digital Multimeter Driver
//!
//! Protocol Overview:
//! - SCPI over any [`ScpiTransport`]
//! - Timed sampling (`SAMP:SOUR TIM`) of N readings per bus trigger
//! - `INIT` + `*TRG` starts one burst, `FETC?` returns it as comma-separated volts
//!
//! The driver tracks whether a burst was triggered since the last fetch so that a
//! `read` without a `trigger` fails instead of returning the previous burst.

use crate::error::{AppResult, IvError};
use crate::hardware::capabilities::{Instrument, InstrumentKind, MeterSettings, VoltageMeter};
use crate::hardware::transport::ScpiTransport;
use crate::measurement::BurstStats;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Model tag used by the registry
pub const MODEL: &str = "Agilent 34411A";

#[derive(Debug, Default)]
struct MeterState {
    settings: Option<MeterSettings>,
    burst_pending: bool,
}

/// Driver for the Agilent 34411A in timed-sampling DC voltage mode
pub struct Agilent34411a {
    transport: Arc<dyn ScpiTransport>,
    state: RwLock<MeterState>,
}

impl Agilent34411a {
    /// Create a driver over an open transport
    pub fn new(transport: Arc<dyn ScpiTransport>) -> Self {
        Self {
            transport,
            state: RwLock::new(MeterState::default()),
        }
    }

    /// Parse a `FETC?` reply: comma-separated readings in volts.
    fn parse_readings(response: &str) -> AppResult<Vec<f64>> {
        response
            .trim()
            .split(',')
            .map(|field| {
                field.trim().parse::<f64>().map_err(|_| {
                    IvError::InstrumentIo(format!("failed to parse reading '{}'", field.trim()))
                })
            })
            .collect()
    }
}

#[async_trait]
impl Instrument for Agilent34411a {
    fn name(&self) -> &str {
        MODEL
    }

    fn kind(&self) -> InstrumentKind {
        InstrumentKind::VoltageMeter
    }

    async fn reset(&self) -> AppResult<()> {
        self.transport.write("*RST; SYSTem:PRESet; *CLS").await?;
        *self.state.write().await = MeterState::default();
        Ok(())
    }
}

#[async_trait]
impl VoltageMeter for Agilent34411a {
    async fn configure(&self, settings: &MeterSettings) -> AppResult<()> {
        settings.validate()?;

        self.transport.write("SAMP:SOUR TIM").await?;
        self.transport
            .write(&format!("SAMP:COUN {}", settings.sample_count))
            .await?;
        self.transport
            .write(&format!("SAMP:TIM {}", settings.sampling_interval_s))
            .await?;
        self.transport.write("TRIGger:SOURce BUS").await?;
        self.transport
            .write(&format!("TRIG:DEL {:.6}", settings.trigger_delay_s))
            .await?;
        self.transport.write("SYST:BEEP:STAT OFF").await?;

        let mut state = self.state.write().await;
        state.settings = Some(*settings);
        state.burst_pending = false;
        Ok(())
    }

    async fn trigger(&self) -> AppResult<Duration> {
        let settings = self.state.read().await.settings.ok_or_else(|| {
            IvError::Validation(format!("{} must be configured before triggering", MODEL))
        })?;

        self.transport.write("INIT").await?;
        self.transport.write("*TRG").await?;
        self.state.write().await.burst_pending = true;
        Ok(settings.burst_duration())
    }

    async fn read(&self) -> AppResult<BurstStats> {
        if !self.state.read().await.burst_pending {
            return Err(IvError::NoBurst(MODEL.to_string()));
        }

        let response = self.transport.query("FETC?").await?;
        self.state.write().await.burst_pending = false;
        BurstStats::from_samples(&Self::parse_readings(&response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::transport::testing::ScriptedTransport;

    #[tokio::test]
    async fn configure_sends_timed_sampling_setup() {
        let transport = Arc::new(ScriptedTransport::default());
        let meter = Agilent34411a::new(transport.clone());

        meter.configure(&MeterSettings::default()).await.unwrap();

        assert_eq!(
            transport.sent(),
            vec![
                "SAMP:SOUR TIM",
                "SAMP:COUN 5",
                "SAMP:TIM 0.1",
                "TRIGger:SOURce BUS",
                "TRIG:DEL 0.005000",
                "SYST:BEEP:STAT OFF",
            ]
        );
    }

    #[tokio::test]
    async fn trigger_then_read_aggregates_burst() {
        let transport = Arc::new(ScriptedTransport::with_replies(&[
            "+1.00000000E+00,+1.00000000E+00,+1.00000000E+00,+1.00000000E+00,+1.10000000E+00",
        ]));
        let meter = Agilent34411a::new(transport.clone());
        meter.configure(&MeterSettings::default()).await.unwrap();

        let wait = meter.trigger().await.unwrap();
        assert!((wait.as_secs_f64() - 0.605).abs() < 1e-6);

        let stats = meter.read().await.unwrap();
        assert!((stats.mean - 1.02).abs() < 1e-12);
        assert!((stats.std_dev - 0.0447).abs() < 1e-4);

        let sent = transport.sent();
        assert_eq!(&sent[sent.len() - 3..], ["INIT", "*TRG", "FETC?"]);
    }

    #[tokio::test]
    async fn read_without_trigger_fails() {
        let transport = Arc::new(ScriptedTransport::with_replies(&["+1.0E+00", "+1.0E+00"]));
        let meter = Agilent34411a::new(transport);
        meter.configure(&MeterSettings::default()).await.unwrap();

        assert!(matches!(meter.read().await, Err(IvError::NoBurst(_))));

        meter.trigger().await.unwrap();
        assert!(meter.read().await.is_ok());
        // The burst is consumed by the first read
        assert!(matches!(meter.read().await, Err(IvError::NoBurst(_))));
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::default());
        let meter = Agilent34411a::new(transport.clone());
        meter.reset().await.unwrap();
        meter.reset().await.unwrap();
        assert_eq!(
            transport.sent(),
            vec!["*RST; SYSTem:PRESet; *CLS", "*RST; SYSTem:PRESet; *CLS"]
        );
        assert!(meter.trigger().await.is_err());
    }

    #[test]
    fn malformed_fetch_is_io_error() {
        assert!(Agilent34411a::parse_readings("1.0,abc").is_err());
        assert_eq!(
            Agilent34411a::parse_readings("1.0, 2.0\n").unwrap(),
            vec![1.0, 2.0]
        );
    }
}
