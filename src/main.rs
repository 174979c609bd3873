//! CLI Entry Point for bench_daq
//!
//! Provides command-line interface for:
//! - Identifying a single instrument (`*IDN?`)
//! - Discovering instruments (listed, or everything attached) and keying them by model
//! - Running the sweep (or curve family) described by a config file
//!
//! # Usage
//!
//! ```bash
//! bench_daq identify TCPIP0::192.168.1.91::5025::SOCKET
//! bench_daq discover TCPIP0::192.168.1.91::5025::SOCKET USB0::0x1AB1::0x0E11::DP8C172001883::INSTR
//! bench_daq discover    # every instrument VISA can see (needs instrument_visa)
//! bench_daq run --config config/bench.toml
//! ```
//!
//! Ctrl-C during a run stops the sweep after the current step, turns the
//! output off, and saves the samples collected so far.

use anyhow::{Context, Result};
use bench_daq::config::{BenchConfig, DEFAULT_CONFIG_PATH};
use bench_daq::data::{self, PlotSpec};
use bench_daq::hardware::{self, DefaultOpener};
use bench_daq::instrument::{discover, discover_attached, Identity};
use bench_daq::sweep::{self, FamilyResult, SweepResult};
use bench_daq::tracing_init::{self, TracingConfig};
use bench_daq::BenchSession;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "bench_daq")]
#[command(about = "Parameter sweeps over SCPI bench instruments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query one instrument's identity
    Identify {
        /// VISA resource string or host:port
        resource: String,

        /// Query timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },

    /// Identify instruments and key them by model number
    Discover {
        /// VISA resource strings or host:port pairs; all attached VISA
        /// instruments when omitted
        resources: Vec<String>,

        /// Query timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },

    /// Load and validate a configuration without touching instruments
    Check {
        /// Configuration file (TOML format)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Run the configured sweep and export the results
    Run {
        /// Configuration file (TOML format)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Identify {
            resource,
            timeout_ms,
        } => {
            init_default_tracing()?;
            identify(&resource, Duration::from_millis(timeout_ms)).await
        }
        Commands::Discover {
            resources,
            timeout_ms,
        } => {
            init_default_tracing()?;
            discover_bench(&resources, Duration::from_millis(timeout_ms)).await
        }
        Commands::Check { config } => {
            let config = load_config(&config)?;
            println!(
                "{}: {} instruments, {} sweep points, {} measurements",
                config.application.name,
                config.enabled_instruments().len(),
                config.sweep_spec()?.stimulus.len(),
                config.sweep.measurements.len()
            );
            Ok(())
        }
        Commands::Run { config } => {
            let config = load_config(&config)?;
            tracing_init::init_from_config(&config).map_err(anyhow::Error::msg)?;
            run(&config).await
        }
    }
}

fn init_default_tracing() -> Result<()> {
    tracing_init::init(TracingConfig::default()).map_err(anyhow::Error::msg)
}

fn load_config(path: &Path) -> Result<BenchConfig> {
    BenchConfig::load_from(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

async fn identify(resource: &str, timeout: Duration) -> Result<()> {
    let handle = hardware::open(resource, timeout).await?;
    let reply = handle.identify().await;
    if let Err(e) = handle.close().await {
        warn!(resource, error = %e, "failed to close instrument");
    }

    let identity = Identity::parse(&reply?);
    println!("{}", identity);
    println!("{}", serde_json::to_string_pretty(&identity)?);
    Ok(())
}

async fn discover_bench(resources: &[String], timeout: Duration) -> Result<()> {
    let devices = if resources.is_empty() {
        discover_attached(&DefaultOpener, timeout)
            .await
            .context("no resources given and enumeration failed")?
    } else {
        discover(resources, &DefaultOpener, timeout).await
    };
    if devices.is_empty() {
        anyhow::bail!("no instrument answered *IDN?");
    }

    for (model, device) in &devices {
        println!("{:<16} {:<48} {}", model, device.resource, device.identity);
        if let Err(e) = device.handle.close().await {
            warn!(resource = %device.resource, error = %e, "failed to close instrument");
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
    warn!("interrupt received, stopping after the current step");
}

async fn run(config: &BenchConfig) -> Result<()> {
    let mut session = BenchSession::open(&config.instruments, &DefaultOpener).await?;
    let outcome = run_with_session(config, &session).await;
    session.close_all().await;
    outcome
}

async fn run_with_session(config: &BenchConfig, session: &BenchSession) -> Result<()> {
    let stimulus = session.require(&config.sweep.stimulus)?;
    let meters = session.meters();

    match config.family_spec()? {
        Some(family_spec) => {
            let outer_id = config
                .family
                .as_ref()
                .map(|f| f.stimulus.as_str())
                .unwrap_or_default();
            let outer = session.require(outer_id)?;
            let outcome = sweep::run_family_until(
                outer.as_ref(),
                stimulus.as_ref(),
                &meters,
                &family_spec,
                interrupt(),
            )
            .await;

            match outcome {
                Ok(family) => {
                    export_family(config, &family, &config.output.csv_path())?;
                    Ok(())
                }
                Err(e) => {
                    if let Some(completed) = e.completed_curves().filter(|f| !f.curves.is_empty()) {
                        save_partial(config, |path| export_family(config, completed, path));
                    }
                    Err(e.into())
                }
            }
        }
        None => {
            let spec = config.sweep_spec()?;
            let outcome =
                sweep::run_sweep_until(stimulus.as_ref(), &meters, &spec, interrupt()).await;

            match outcome {
                Ok(result) => {
                    report(&result);
                    export_sweep(config, &result, &config.output.csv_path())?;
                    Ok(())
                }
                Err(e) => {
                    if let Some(partial) = e.partial().filter(|r| !r.is_empty()) {
                        save_partial(config, |path| export_sweep(config, partial, path));
                    }
                    Err(e.into())
                }
            }
        }
    }
}

fn report(result: &SweepResult) {
    let failures = result.failures();
    if failures.is_empty() {
        info!(samples = result.len(), "sweep complete");
    } else {
        warn!(
            samples = result.len(),
            failures = failures.len(),
            "sweep complete with failed readings"
        );
    }
}

fn save_partial<F>(config: &BenchConfig, export: F)
where
    F: FnOnce(&Path) -> Result<()>,
{
    let path = config
        .output
        .dir
        .join(format!("{}_partial.csv", config.output.name));
    match export(&path) {
        Ok(()) => info!(path = %path.display(), "partial data saved"),
        Err(e) => error!(error = %e, "failed to save partial data"),
    }
}

fn export_sweep(config: &BenchConfig, result: &SweepResult, csv_path: &Path) -> Result<()> {
    if config.output.csv {
        data::write_csv(result, csv_path)?;
    }
    if let Some(plot) = &config.output.plot {
        data::render_or_log(result, plot, &plot_path_for(config, csv_path));
    }
    Ok(())
}

fn export_family(config: &BenchConfig, family: &FamilyResult, csv_path: &Path) -> Result<()> {
    if config.output.csv {
        data::write_family_csv(family, csv_path)?;
    }
    let plot = config
        .output
        .plot
        .clone()
        .unwrap_or_else(|| default_family_plot(config));
    data::render_family_or_log(family, &plot, &plot_path_for(config, csv_path));
    Ok(())
}

fn default_family_plot(config: &BenchConfig) -> PlotSpec {
    let y = config
        .sweep
        .measurements
        .first()
        .map(|m| m.name.clone())
        .unwrap_or_default();
    PlotSpec::linear(y)
}

/// Chart next to its CSV, with the configured image format
fn plot_path_for(config: &BenchConfig, csv_path: &Path) -> PathBuf {
    csv_path.with_extension(&config.output.plot_format)
}

