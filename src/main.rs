//! CLI Entry Point for iv-sweep
//!
//! Provides command-line interface for:
//! - Running an I-V sweep and exporting the result
//! - Resetting the instrument pair
//! - Listing registered instrument models and configured resources
//!
//! # Usage
//!
//! Sweep the simulated pair from -10 mA to 10 mA in 1 mA steps:
//! ```bash
//! iv-sweep measure --imax 0.01 --di 0.001 --output data/run.csv
//! ```
//!
//! Reset real instruments:
//! ```bash
//! iv-sweep reset \
//!     --source-model "Yokogawa GS200" --source-address TCPIP0::192.168.0.20::7655::SOCKET \
//!     --meter-model "Agilent 34411A" --meter-address TCPIP0::192.168.0.21::5025::SOCKET
//! ```
//!
//! Ctrl-C during a sweep cancels it; the instruments are returned to a safe
//! state before the program exits.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use iv_sweep::config::{InstrumentBinding, IvConfig};
use iv_sweep::data::{check_destination, export, ExportFormat, SharedDataset};
use iv_sweep::hardware::capabilities::MeterSettings;
use iv_sweep::hardware::discovery::ResourceCatalog;
use iv_sweep::hardware::registry::InstrumentRegistry;
use iv_sweep::logging::{self, OutputFormat, TracingConfig};
use iv_sweep::sweep::{
    ChannelObserver, SessionController, SessionEvent, SessionOptions, SessionOrder,
    SessionOutcome, SessionRequest, SessionState,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "iv-sweep")]
#[command(about = "Current-voltage sweep measurement", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/iv_sweep.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for OutputFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => OutputFormat::Pretty,
            LogFormat::Compact => OutputFormat::Compact,
            LogFormat::Json => OutputFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full sweep: 0 -> +imax -> 0 -> -imax -> 0
    Measure {
        /// Maximum current magnitude in amps
        #[arg(long)]
        imax: f64,

        /// Current step in amps
        #[arg(long)]
        di: f64,

        /// Meter sampling interval in seconds
        #[arg(long)]
        interval: Option<f64>,

        /// Meter trigger delay in seconds
        #[arg(long)]
        delay: Option<f64>,

        /// Samples per burst
        #[arg(long)]
        count: Option<u32>,

        /// Export destination; the extension picks the format
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Print every session event as a JSON line
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        instruments: InstrumentArgs,
    },

    /// Reset both instruments to their cleared state
    Reset {
        #[command(flatten)]
        instruments: InstrumentArgs,
    },

    /// List registered instrument models
    Models,

    /// List configured instrument addresses
    Resources,
}

#[derive(Args)]
struct InstrumentArgs {
    /// Current source model tag
    #[arg(long)]
    source_model: Option<String>,

    /// Current source resource address
    #[arg(long)]
    source_address: Option<String>,

    /// Voltage meter model tag
    #[arg(long)]
    meter_model: Option<String>,

    /// Voltage meter resource address
    #[arg(long)]
    meter_address: Option<String>,
}

impl InstrumentArgs {
    fn apply(self, config: &mut IvConfig) {
        fn set(binding: &mut InstrumentBinding, model: Option<String>, address: Option<String>) {
            if let Some(model) = model {
                binding.model = model;
            }
            if let Some(address) = address {
                binding.address = address;
            }
        }
        set(
            &mut config.instruments.current_source,
            self.source_model,
            self.source_address,
        );
        set(
            &mut config.instruments.voltage_meter,
            self.meter_model,
            self.meter_address,
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => IvConfig::load_from(path),
        None => IvConfig::load(),
    }
    .context("loading configuration")?;

    let tracing_config =
        TracingConfig::from_config(&config)?.with_format(cli.log_format.into());
    logging::init(tracing_config)?;

    match cli.command {
        Commands::Measure {
            imax,
            di,
            interval,
            delay,
            count,
            output,
            json,
            instruments,
        } => {
            instruments.apply(&mut config);
            let meter = MeterSettings {
                sampling_interval_s: interval.unwrap_or(config.meter.sampling_interval_s),
                trigger_delay_s: delay.unwrap_or(config.meter.trigger_delay_s),
                sample_count: count.unwrap_or(config.meter.sample_count),
            };
            config.validate()?;
            let order = SessionOrder::Measure {
                imax,
                di,
                meter: Some(meter),
            };
            measure(&config, order, output, json).await
        }
        Commands::Reset { instruments } => {
            instruments.apply(&mut config);
            config.validate()?;
            reset(&config).await
        }
        Commands::Models => {
            for model in InstrumentRegistry::with_builtin().models() {
                println!("{:<16} {}", model.kind, model.model);
            }
            Ok(())
        }
        Commands::Resources => {
            let mut catalog = ResourceCatalog::init(&config.resources);
            for entry in catalog.resources()? {
                let label = if entry.simulated { " (simulated)" } else { "" };
                println!("{}{}", entry.canonical, label);
            }
            for (address, reason) in catalog.rejected() {
                println!("{}  rejected: {}", address, reason);
            }
            catalog.shutdown();
            Ok(())
        }
    }
}

fn build_request(config: &IvConfig, order: SessionOrder) -> Result<SessionRequest> {
    let registry = InstrumentRegistry::with_builtin();
    let source_cfg = &config.instruments.current_source;
    let meter_cfg = &config.instruments.voltage_meter;
    let source = registry.create_current_source(&source_cfg.model, &source_cfg.address)?;
    let meter = registry.create_voltage_meter(&meter_cfg.model, &meter_cfg.address)?;
    info!(
        source = %source_cfg.model,
        meter = %meter_cfg.model,
        "instruments bound"
    );
    Ok(SessionRequest::new(order, source, meter))
}

async fn measure(
    config: &IvConfig,
    order: SessionOrder,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    // An unusable destination must fail before any current flows
    let (path, format) = resolve_destination(config, output)?;
    let request = build_request(config, order)?;
    let dataset = SharedDataset::new();
    let (observer, mut events) = ChannelObserver::new();
    let controller = SessionController::new(dataset.clone(), Arc::new(observer))
        .with_options(SessionOptions::from_config(config))
        .with_cancel_timeout(config.sweep.cancel_timeout());

    let printer = tokio::spawn(async move {
        let mut total = 0;
        while let Some(event) = events.recv().await {
            if json {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{}", line);
                }
                continue;
            }
            match event {
                SessionEvent::DatasetSized { len } => total = len,
                SessionEvent::PointUpdated { point } => println!(
                    "[{:>4}/{}] I = {:+.6e} A  V = {:+.6e} V  std = {:.3e} V",
                    point.index + 1,
                    total,
                    point.current,
                    point.voltage,
                    point.voltage_std
                ),
                SessionEvent::SetPointMismatch {
                    index,
                    commanded,
                    readback,
                } => println!(
                    "[{:>4}/{}] set point mismatch: commanded {:+.6e} A, read back {:+.6e} A",
                    index + 1,
                    total,
                    commanded,
                    readback
                ),
                _ => {}
            }
        }
    });

    controller.start(request).await?;
    let outcome = run_to_end(&controller).await?;
    drop(controller);
    let _ = printer.await;

    report(&outcome);
    if outcome.points_measured > 0 {
        let snapshot = dataset.snapshot().await;
        if let Ok(fit) = snapshot.fit() {
            println!("Resistance: {:.6e} Ohm (offset {:+.3e} V)", fit.slope, fit.intercept);
        }
        let written = export(&snapshot, &path, format)?;
        println!("Saved {}", written.display());
    }

    finish(outcome)
}

fn resolve_destination(
    config: &IvConfig,
    output: Option<PathBuf>,
) -> Result<(PathBuf, ExportFormat)> {
    let path = match output {
        Some(path) => path,
        None => {
            let format: ExportFormat = config.export.default_format.parse()?;
            default_destination(&config.export.output_dir, format)
        }
    };
    let format = check_destination(&path)
        .with_context(|| format!("export destination {}", path.display()))?;
    Ok((path, format))
}

fn default_destination(dir: &Path, format: ExportFormat) -> PathBuf {
    dir.join(format!(
        "iv_{}.{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    ))
}

async fn reset(config: &IvConfig) -> Result<()> {
    let request = build_request(config, SessionOrder::Reset)?;
    let (observer, _events) = ChannelObserver::new();
    let controller = SessionController::new(SharedDataset::new(), Arc::new(observer))
        .with_options(SessionOptions::from_config(config))
        .with_cancel_timeout(config.sweep.cancel_timeout());

    controller.start(request).await?;
    let outcome = run_to_end(&controller).await?;
    report(&outcome);
    finish(outcome)
}

/// Wait for the session to end, cancelling it on Ctrl-C.
async fn run_to_end(controller: &SessionController) -> Result<SessionOutcome> {
    tokio::select! {
        outcome = controller.wait() => Ok(outcome?),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, cancelling sweep");
            Ok(controller.cancel().await?)
        }
    }
}

fn report(outcome: &SessionOutcome) {
    println!(
        "Session {} {}: {} points, {} set point mismatches",
        outcome.id, outcome.state, outcome.points_measured, outcome.mismatches
    );
}

fn finish(outcome: SessionOutcome) -> Result<()> {
    match (outcome.state, outcome.error) {
        (SessionState::Completed, None) | (SessionState::Aborted, None) => Ok(()),
        (_, Some(e)) => Err(e.into()),
        (state, None) => Err(anyhow!("session ended in state {}", state)),
    }
}
