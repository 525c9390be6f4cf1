//! Instrument Registry
//!
//! Maps model tags to driver factories. A factory receives the parsed resource
//! address and returns a handle behind the matching capability trait, so the
//! sweep never names a concrete driver type.
//!
//! # Built-in Models
//!
//! | Model tag | Capability | Driver |
//! |-----------|------------|--------|
//! | `Yokogawa GS200` | CurrentSource | `YokogawaGs200` |
//! | `Agilent 34411A` | VoltageMeter | `Agilent34411a` |
//! | `Mock Current Source` | CurrentSource | `MockCurrentSource` |
//! | `Mock Voltage Meter` | VoltageMeter | `MockVoltageMeter` |
//!
//! The two mock models built by one registry share a simulated 100 Ω device, so
//! a mock meter reads the voltage produced by a mock source of the same registry.
//!
//! # Example Usage
//!
//! ```rust
//! use iv_sweep::hardware::capabilities::Instrument;
//! use iv_sweep::hardware::registry::{InstrumentRegistry, MOCK_CURRENT_SOURCE};
//!
//! let registry = InstrumentRegistry::with_builtin();
//! let source = registry.create_current_source(MOCK_CURRENT_SOURCE, "MOCK::SOURCE").unwrap();
//! assert_eq!(source.name(), MOCK_CURRENT_SOURCE);
//! ```

use crate::error::{AppResult, IvError};
use crate::hardware::agilent_34411a::{self, Agilent34411a};
use crate::hardware::capabilities::{CurrentSource, InstrumentKind, VoltageMeter};
use crate::hardware::mock::{self, MockCircuit, MockCurrentSource, MockVoltageMeter};
use crate::hardware::transport::ResourceAddress;
use crate::hardware::yokogawa_gs200::{self, YokogawaGs200};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Model tag of the simulated current source
pub const MOCK_CURRENT_SOURCE: &str = mock::MOCK_SOURCE_MODEL;
/// Model tag of the simulated voltage meter
pub const MOCK_VOLTAGE_METER: &str = mock::MOCK_METER_MODEL;

/// Resistance of the simulated device shared by the built-in mock models
pub const MOCK_RESISTANCE_OHMS: f64 = 100.0;

/// Builds a current source bound to one address
pub type CurrentSourceFactory =
    Arc<dyn Fn(&ResourceAddress) -> AppResult<Arc<dyn CurrentSource>> + Send + Sync>;

/// Builds a voltage meter bound to one address
pub type VoltageMeterFactory =
    Arc<dyn Fn(&ResourceAddress) -> AppResult<Arc<dyn VoltageMeter>> + Send + Sync>;

/// Registered model, for listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Model tag
    pub model: String,
    /// Capability the model provides
    pub kind: InstrumentKind,
}

/// Model tag to factory lookup
#[derive(Default, Clone)]
pub struct InstrumentRegistry {
    sources: BTreeMap<String, CurrentSourceFactory>,
    meters: BTreeMap<String, VoltageMeterFactory>,
}

impl InstrumentRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the hardware and mock models registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();

        registry.register_current_source(yokogawa_gs200::MODEL, |address| {
            let source: Arc<dyn CurrentSource> = Arc::new(YokogawaGs200::new(address.open()?));
            Ok(source)
        });
        registry.register_voltage_meter(agilent_34411a::MODEL, |address| {
            let meter: Arc<dyn VoltageMeter> = Arc::new(Agilent34411a::new(address.open()?));
            Ok(meter)
        });

        let circuit = Arc::new(MockCircuit::new(MOCK_RESISTANCE_OHMS));
        let source_circuit = circuit.clone();
        registry.register_current_source(MOCK_CURRENT_SOURCE, move |_| {
            let source: Arc<dyn CurrentSource> =
                Arc::new(MockCurrentSource::new(source_circuit.clone()));
            Ok(source)
        });
        registry.register_voltage_meter(MOCK_VOLTAGE_METER, move |_| {
            let meter: Arc<dyn VoltageMeter> =
                Arc::new(MockVoltageMeter::new(circuit.clone()).with_noise(1e-5));
            Ok(meter)
        });

        registry
    }

    /// Register (or replace) a current source model.
    pub fn register_current_source<F>(&mut self, model: impl Into<String>, factory: F)
    where
        F: Fn(&ResourceAddress) -> AppResult<Arc<dyn CurrentSource>> + Send + Sync + 'static,
    {
        self.sources.insert(model.into(), Arc::new(factory));
    }

    /// Register (or replace) a voltage meter model.
    pub fn register_voltage_meter<F>(&mut self, model: impl Into<String>, factory: F)
    where
        F: Fn(&ResourceAddress) -> AppResult<Arc<dyn VoltageMeter>> + Send + Sync + 'static,
    {
        self.meters.insert(model.into(), Arc::new(factory));
    }

    /// Instantiate a current source of `model` at `address`.
    pub fn create_current_source(
        &self,
        model: &str,
        address: &str,
    ) -> AppResult<Arc<dyn CurrentSource>> {
        let factory = self
            .sources
            .get(model)
            .ok_or_else(|| IvError::UnknownModel(model.to_string()))?;
        let address = ResourceAddress::parse(address)?;
        tracing::debug!(model, %address, "creating current source");
        factory(&address)
    }

    /// Instantiate a voltage meter of `model` at `address`.
    pub fn create_voltage_meter(
        &self,
        model: &str,
        address: &str,
    ) -> AppResult<Arc<dyn VoltageMeter>> {
        let factory = self
            .meters
            .get(model)
            .ok_or_else(|| IvError::UnknownModel(model.to_string()))?;
        let address = ResourceAddress::parse(address)?;
        tracing::debug!(model, %address, "creating voltage meter");
        factory(&address)
    }

    /// All registered models, current sources first, each group sorted by tag
    pub fn models(&self) -> Vec<ModelInfo> {
        let sources = self.sources.keys().map(|model| ModelInfo {
            model: model.clone(),
            kind: InstrumentKind::CurrentSource,
        });
        let meters = self.meters.keys().map(|model| ModelInfo {
            model: model.clone(),
            kind: InstrumentKind::VoltageMeter,
        });
        sources.chain(meters).collect()
    }
}

impl std::fmt::Debug for InstrumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentRegistry")
            .field("current_sources", &self.sources.keys().collect::<Vec<_>>())
            .field("voltage_meters", &self.meters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::{CurrentSourceSettings, MeterSettings};

    #[test]
    fn builtin_models_are_listed() {
        let registry = InstrumentRegistry::with_builtin();
        let models: Vec<String> = registry.models().into_iter().map(|m| m.model).collect();
        assert_eq!(
            models,
            vec![
                MOCK_CURRENT_SOURCE,
                yokogawa_gs200::MODEL,
                agilent_34411a::MODEL,
                MOCK_VOLTAGE_METER,
            ]
        );
    }

    #[test]
    fn unknown_model_is_rejected() {
        let registry = InstrumentRegistry::with_builtin();
        assert!(matches!(
            registry.create_current_source("Keithley 2400", "MOCK"),
            Err(IvError::UnknownModel(_))
        ));
        // Model tags are per capability
        assert!(matches!(
            registry.create_voltage_meter(yokogawa_gs200::MODEL, "MOCK"),
            Err(IvError::UnknownModel(_))
        ));
    }

    #[test]
    fn hardware_model_needs_real_address() {
        let registry = InstrumentRegistry::with_builtin();
        assert!(matches!(
            registry.create_current_source(yokogawa_gs200::MODEL, "MOCK::SOURCE"),
            Err(IvError::InvalidAddress(_))
        ));
        assert!(registry
            .create_current_source(yokogawa_gs200::MODEL, "TCPIP0::127.0.0.1::7655::SOCKET")
            .is_ok());
    }

    #[tokio::test]
    async fn mock_pair_shares_circuit() {
        let registry = InstrumentRegistry::with_builtin();
        let source = registry
            .create_current_source(MOCK_CURRENT_SOURCE, "MOCK::SOURCE")
            .unwrap();
        let meter = registry
            .create_voltage_meter(MOCK_VOLTAGE_METER, "MOCK::METER")
            .unwrap();

        source
            .configure(&CurrentSourceSettings {
                max_current: 0.01,
                step: 0.001,
            })
            .await
            .unwrap();
        meter
            .configure(&MeterSettings {
                sampling_interval_s: 0.001,
                trigger_delay_s: 0.0,
                sample_count: 3,
            })
            .await
            .unwrap();

        source.start(0.001).await.unwrap();
        meter.trigger().await.unwrap();
        let stats = meter.read().await.unwrap();
        assert!((stats.mean - 0.1).abs() < 1e-4);
    }

    #[test]
    fn custom_model_can_be_registered() {
        let mut registry = InstrumentRegistry::new();
        registry.register_current_source("Bench Supply", |_| {
            let source: Arc<dyn CurrentSource> =
                Arc::new(MockCurrentSource::new(Arc::new(MockCircuit::default())));
            Ok(source)
        });
        assert_eq!(registry.models().len(), 1);
        assert!(registry.create_current_source("Bench Supply", "MOCK").is_ok());
    }
}
