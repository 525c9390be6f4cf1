//! Instrument layer
//!
//! Capability traits the sweep is written against, the SCPI drivers for the two
//! supported models, simulated instruments, and the registry that binds a model
//! tag and address to a handle.

pub mod agilent_34411a;
pub mod capabilities;
pub mod discovery;
pub mod mock;
pub mod registry;
pub mod transport;
pub mod yokogawa_gs200;

pub use capabilities::{
    CurrentSource, CurrentSourceSettings, Instrument, InstrumentKind, MeterSettings, VoltageMeter,
};
pub use registry::InstrumentRegistry;
