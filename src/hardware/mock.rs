//! Mock Hardware Implementations
//!
//! Simulated instruments for testing and dry runs without physical hardware.
//! All mock devices use async-safe waits (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockCircuit` - ohmic device under test shared by a source and a meter
//! - `MockCurrentSource` - current source driving the circuit
//! - `MockVoltageMeter` - meter sampling the circuit voltage with uniform noise
//!
//! Both instruments expose a synchronous `snapshot()` so tests and observers can
//! check their safety state from inside notification callbacks.
//!
//! # Fault Injection
//!
//! - `MockCurrentSource::with_readback_error` - read-back off by a relative amount
//! - `MockCurrentSource::fail_on_start` / `MockVoltageMeter::fail_on_read` - I/O failure
//! - `MockVoltageMeter::with_trigger_stall` - trigger that blocks, uncancellable

use crate::error::{AppResult, IvError};
use crate::hardware::capabilities::{
    check_set_point, CurrentSource, CurrentSourceSettings, Instrument, InstrumentKind,
    MeterSettings, VoltageMeter,
};
use crate::measurement::BurstStats;
use async_trait::async_trait;
use rand::Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

/// Model tag of the simulated current source
pub const MOCK_SOURCE_MODEL: &str = "Mock Current Source";
/// Model tag of the simulated voltage meter
pub const MOCK_METER_MODEL: &str = "Mock Voltage Meter";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Poisoned state is still valid plain data
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// MockCircuit - Simulated Device Under Test
// =============================================================================

/// Ohmic device under test: `V = R * I + offset`
#[derive(Debug)]
pub struct MockCircuit {
    resistance: f64,
    offset: f64,
    current: Mutex<f64>,
}

impl MockCircuit {
    /// Create a circuit with the given resistance (ohms)
    pub fn new(resistance: f64) -> Self {
        Self {
            resistance,
            offset: 0.0,
            current: Mutex::new(0.0),
        }
    }

    /// Add a constant voltage offset (thermal EMF)
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    /// Resistance in ohms
    pub fn resistance(&self) -> f64 {
        self.resistance
    }

    /// Current flowing through the device, in amps
    pub fn current(&self) -> f64 {
        *lock(&self.current)
    }

    fn set_current(&self, amps: f64) {
        *lock(&self.current) = amps;
    }

    /// Noise-free voltage across the device
    pub fn voltage(&self) -> f64 {
        self.resistance * self.current() + self.offset
    }
}

impl Default for MockCircuit {
    fn default() -> Self {
        Self::new(100.0)
    }
}

// =============================================================================
// MockCurrentSource
// =============================================================================

/// Observable state of a [`MockCurrentSource`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceSnapshot {
    /// Present output level, in amps
    pub level: f64,
    /// Whether the output relay is on
    pub output_enabled: bool,
    /// Settings of the last `configure`
    pub settings: Option<CurrentSourceSettings>,
    /// Every level commanded by `start`, in order
    pub commanded: Vec<f64>,
    /// Number of `stop` calls
    pub stop_count: usize,
    /// Number of `reset` calls
    pub reset_count: usize,
}

impl SourceSnapshot {
    /// De-energized: output off at zero level
    pub fn is_safe(&self) -> bool {
        !self.output_enabled && self.level == 0.0
    }
}

/// Simulated current source
pub struct MockCurrentSource {
    circuit: Arc<MockCircuit>,
    settle: Duration,
    readback_error: f64,
    fail_on_start: Option<usize>,
    state: Mutex<SourceSnapshot>,
}

impl MockCurrentSource {
    /// Create a source driving `circuit`
    pub fn new(circuit: Arc<MockCircuit>) -> Self {
        Self {
            circuit,
            settle: Duration::ZERO,
            readback_error: 0.0,
            fail_on_start: None,
            state: Mutex::new(SourceSnapshot::default()),
        }
    }

    /// Simulated hardware settling time inside `start`
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Report read-back values off by `relative` (0.05 = 5% high)
    pub fn with_readback_error(mut self, relative: f64) -> Self {
        self.readback_error = relative;
        self
    }

    /// Fail the `start` call with this zero-based ordinal with an I/O error
    pub fn fail_on_start(mut self, ordinal: usize) -> Self {
        self.fail_on_start = Some(ordinal);
        self
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> SourceSnapshot {
        lock(&self.state).clone()
    }
}

#[async_trait]
impl Instrument for MockCurrentSource {
    fn name(&self) -> &str {
        MOCK_SOURCE_MODEL
    }

    fn kind(&self) -> InstrumentKind {
        InstrumentKind::CurrentSource
    }

    async fn reset(&self) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.level = 0.0;
        state.output_enabled = false;
        state.settings = None;
        state.reset_count += 1;
        self.circuit.set_current(0.0);
        tracing::trace!("MockCurrentSource: reset");
        Ok(())
    }
}

#[async_trait]
impl CurrentSource for MockCurrentSource {
    async fn configure(&self, settings: &CurrentSourceSettings) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.settings = Some(*settings);
        state.output_enabled = true;
        Ok(())
    }

    async fn start(&self, amps: f64) -> AppResult<()> {
        {
            let mut state = lock(&self.state);
            if state.settings.is_none() {
                return Err(IvError::Validation(format!(
                    "{} must be configured before commanding a level",
                    MOCK_SOURCE_MODEL
                )));
            }
            if self.fail_on_start == Some(state.commanded.len()) {
                return Err(IvError::InstrumentIo(format!(
                    "{}: simulated link failure",
                    MOCK_SOURCE_MODEL
                )));
            }
            state.level = amps;
            state.commanded.push(amps);
            if state.output_enabled {
                self.circuit.set_current(amps);
            }
        }

        sleep(self.settle).await;
        check_set_point(amps, amps * (1.0 + self.readback_error))
    }

    async fn stop(&self) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.level = 0.0;
        state.output_enabled = false;
        state.stop_count += 1;
        self.circuit.set_current(0.0);
        Ok(())
    }
}

// =============================================================================
// MockVoltageMeter
// =============================================================================

/// Observable state of a [`MockVoltageMeter`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeterSnapshot {
    /// Settings of the last `configure`
    pub settings: Option<MeterSettings>,
    /// Whether a triggered burst awaits `read`
    pub burst_pending: bool,
    /// Current through the circuit at each trigger, in order
    pub triggered_at: Vec<f64>,
    /// Number of `reset` calls
    pub reset_count: usize,
}

impl MeterSnapshot {
    /// Cleared: unconfigured with no burst pending
    pub fn is_safe(&self) -> bool {
        self.settings.is_none() && !self.burst_pending
    }
}

#[derive(Debug, Default)]
struct MeterState {
    snapshot: MeterSnapshot,
    burst_voltage: f64,
}

/// Simulated sampling voltmeter
pub struct MockVoltageMeter {
    circuit: Arc<MockCircuit>,
    noise: f64,
    stall: Duration,
    fail_on_read: Option<usize>,
    reads: Mutex<usize>,
    state: Mutex<MeterState>,
}

impl MockVoltageMeter {
    /// Create a meter across `circuit`
    pub fn new(circuit: Arc<MockCircuit>) -> Self {
        Self {
            circuit,
            noise: 0.0,
            stall: Duration::ZERO,
            fail_on_read: None,
            reads: Mutex::new(0),
            state: Mutex::new(MeterState::default()),
        }
    }

    /// Uniform noise of +/- `volts` on each sample
    pub fn with_noise(mut self, volts: f64) -> Self {
        self.noise = volts.abs();
        self
    }

    /// Block inside `trigger` for `stall` before returning
    pub fn with_trigger_stall(mut self, stall: Duration) -> Self {
        self.stall = stall;
        self
    }

    /// Fail the `read` call with this zero-based ordinal with an I/O error
    pub fn fail_on_read(mut self, ordinal: usize) -> Self {
        self.fail_on_read = Some(ordinal);
        self
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> MeterSnapshot {
        lock(&self.state).snapshot.clone()
    }
}

#[async_trait]
impl Instrument for MockVoltageMeter {
    fn name(&self) -> &str {
        MOCK_METER_MODEL
    }

    fn kind(&self) -> InstrumentKind {
        InstrumentKind::VoltageMeter
    }

    async fn reset(&self) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.snapshot.settings = None;
        state.snapshot.burst_pending = false;
        state.snapshot.reset_count += 1;
        tracing::trace!("MockVoltageMeter: reset");
        Ok(())
    }
}

#[async_trait]
impl VoltageMeter for MockVoltageMeter {
    async fn configure(&self, settings: &MeterSettings) -> AppResult<()> {
        settings.validate()?;
        let mut state = lock(&self.state);
        state.snapshot.settings = Some(*settings);
        state.snapshot.burst_pending = false;
        Ok(())
    }

    async fn trigger(&self) -> AppResult<Duration> {
        let settings = {
            let mut state = lock(&self.state);
            let settings = state.snapshot.settings.ok_or_else(|| {
                IvError::Validation(format!(
                    "{} must be configured before triggering",
                    MOCK_METER_MODEL
                ))
            })?;
            let current = self.circuit.current();
            state.snapshot.triggered_at.push(current);
            state.snapshot.burst_pending = true;
            state.burst_voltage = self.circuit.voltage();
            settings
        };

        if !self.stall.is_zero() {
            sleep(self.stall).await;
        }
        Ok(settings.acquisition_time())
    }

    async fn read(&self) -> AppResult<BurstStats> {
        let ordinal = {
            let mut reads = lock(&self.reads);
            let ordinal = *reads;
            *reads += 1;
            ordinal
        };
        if self.fail_on_read == Some(ordinal) {
            return Err(IvError::InstrumentIo(format!(
                "{}: simulated fetch timeout",
                MOCK_METER_MODEL
            )));
        }

        let (voltage, count) = {
            let mut state = lock(&self.state);
            if !state.snapshot.burst_pending {
                return Err(IvError::NoBurst(MOCK_METER_MODEL.to_string()));
            }
            state.snapshot.burst_pending = false;
            let count = state
                .snapshot
                .settings
                .map(|s| s.sample_count as usize)
                .unwrap_or(1);
            (state.burst_voltage, count)
        };

        let mut rng = rand::thread_rng();
        let samples: Vec<f64> = (0..count)
            .map(|_| {
                if self.noise > 0.0 {
                    voltage + rng.gen_range(-self.noise..self.noise)
                } else {
                    voltage
                }
            })
            .collect();
        BurstStats::from_samples(&samples)
    }
}

/// A source and a meter wired to the same simulated circuit.
pub struct MockBench {
    /// Shared device under test
    pub circuit: Arc<MockCircuit>,
    /// Simulated current source
    pub source: Arc<MockCurrentSource>,
    /// Simulated voltage meter
    pub meter: Arc<MockVoltageMeter>,
}

impl MockBench {
    /// Bench around a resistor of `resistance` ohms, with no noise
    pub fn new(resistance: f64) -> Self {
        let circuit = Arc::new(MockCircuit::new(resistance));
        Self {
            source: Arc::new(MockCurrentSource::new(circuit.clone())),
            meter: Arc::new(MockVoltageMeter::new(circuit.clone())),
            circuit,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
