//! Session requests and their validation.

use crate::error::AppResult;
use crate::hardware::capabilities::{CurrentSource, Instrument, MeterSettings, VoltageMeter};
use crate::sweep::plan::validate_range;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// What a session does
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "order", rename_all = "snake_case")]
pub enum SessionOrder {
    /// Return both instruments to their cleared state
    Reset,
    /// Run a full I-V sweep
    Measure {
        /// Largest current magnitude, in amps
        imax: f64,
        /// Step between set points, in amps
        di: f64,
        /// Meter timing; configured defaults when `None`
        meter: Option<MeterSettings>,
    },
}

impl SessionOrder {
    /// Measurement order with default meter timing
    pub fn measure(imax: f64, di: f64) -> Self {
        SessionOrder::Measure {
            imax,
            di,
            meter: None,
        }
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            SessionOrder::Reset => "reset",
            SessionOrder::Measure { .. } => "measure",
        }
    }
}

/// An order bound to the instrument pair it runs against
#[derive(Clone)]
pub struct SessionRequest {
    /// What to do
    pub order: SessionOrder,
    /// Current source handle
    pub source: Arc<dyn CurrentSource>,
    /// Voltage meter handle
    pub meter: Arc<dyn VoltageMeter>,
}

impl SessionRequest {
    /// Bind `order` to a source and a meter.
    pub fn new(
        order: SessionOrder,
        source: Arc<dyn CurrentSource>,
        meter: Arc<dyn VoltageMeter>,
    ) -> Self {
        Self {
            order,
            source,
            meter,
        }
    }

    /// Reject bad parameters before any instrument I/O.
    pub fn validate(&self) -> AppResult<()> {
        match &self.order {
            SessionOrder::Reset => Ok(()),
            SessionOrder::Measure { imax, di, meter } => {
                validate_range(*imax, *di)?;
                if let Some(settings) = meter {
                    settings.validate()?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRequest")
            .field("order", &self.order)
            .field("source", &self.source.name())
            .field("meter", &self.meter.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IvError;
    use crate::hardware::mock::MockBench;

    fn request(order: SessionOrder) -> SessionRequest {
        let bench = MockBench::new(100.0);
        SessionRequest::new(order, bench.source, bench.meter)
    }

    #[test]
    fn reset_needs_no_parameters() {
        assert!(request(SessionOrder::Reset).validate().is_ok());
    }

    #[test]
    fn measure_bounds_checked() {
        assert!(request(SessionOrder::measure(0.01, 0.001)).validate().is_ok());
        assert!(request(SessionOrder::measure(0.0, 0.001)).validate().is_err());
        assert!(request(SessionOrder::measure(0.001, 0.01)).validate().is_err());
    }

    #[test]
    fn meter_timing_checked() {
        let order = SessionOrder::Measure {
            imax: 0.01,
            di: 0.001,
            meter: Some(MeterSettings {
                sample_count: 0,
                ..MeterSettings::default()
            }),
        };
        assert!(matches!(
            request(order).validate(),
            Err(IvError::Validation(_))
        ));
    }
}
