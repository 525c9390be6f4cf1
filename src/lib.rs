//! # IV Sweep Library
//!
//! Automates a current-voltage (I-V) sweep: a programmable current source is
//! driven through a symmetric sequence of set points, a voltage meter samples a
//! burst at each one, and the resulting (current, voltage, std) rows stream into
//! a shared dataset that the host displays and exports.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: capability traits (`CurrentSource`, `VoltageMeter`), SCPI
//!   drivers for the Yokogawa GS200 and Agilent 34411A, simulated instruments,
//!   the model registry and the resource catalog.
//! - **`sweep`**: the sweep planner, session requests, the measurement session
//!   state machine and the controller that runs it on a background task.
//! - **`measurement`**: burst statistics and resistance analysis.
//! - **`data`**: the shared dataset, display snapshot and export writers.
//! - **`config`**: layered configuration (defaults, TOML file, environment).
//! - **`error`**: the `IvError` enum used across the crate.
//! - **`logging`**: tracing subscriber setup.

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod sweep;
