//! Bench configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/bench.toml` (or any file given to [`BenchConfig::load_from`])
//! 2. Environment variables prefixed with `BENCH_DAQ_`, nested keys joined by `__`
//!
//! ```text
//! BENCH_DAQ_APPLICATION__LOG_LEVEL=debug
//! BENCH_DAQ_SWEEP__SETTLE_MS=1000
//! BENCH_DAQ_OUTPUT__DIR=/data/bench
//! ```
//!
//! # Example
//!
//! ```no_run
//! use bench_daq::config::BenchConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = BenchConfig::load()?;
//!     println!("Stimulus device: {}", config.sweep.stimulus);
//!     println!("Instruments: {}", config.enabled_instruments().len());
//!     Ok(())
//! }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::data::plot::PlotSpec;
use crate::sweep::{
    EnablePolicy, FamilySpec, Measurement, Sequence, StimulusCommands, SweepSpec,
};

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/bench.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "BENCH_DAQ_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or does not match the schema
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Values parse but are inconsistent
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level bench configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Instrument definitions
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
    /// The sweep to run (the inner sweep when `family` is set)
    pub sweep: SweepConfig,
    /// Optional outer sweep producing a curve family
    #[serde(default)]
    pub family: Option<FamilyConfig>,
    /// Where results go
    #[serde(default)]
    pub output: OutputConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// One instrument on the bench
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Unique identifier, referenced by sweeps and measurements
    pub id: String,
    /// Resource string (e.g., "TCPIP0::192.168.1.91::5025::SOCKET")
    pub resource: String,
    /// Whether this instrument is opened
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Query timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Send `*RST` after opening
    #[serde(default)]
    pub reset: bool,
    /// Commands sent once after opening (and after `*RST`)
    #[serde(default)]
    pub init: Vec<String>,
}

impl InstrumentConfig {
    /// Default query timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Sweep definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Instrument id of the stimulus device
    pub stimulus: String,
    /// Stimulus values
    pub sequence: Sequence,
    /// Settle time between set and measure, in milliseconds
    #[serde(default)]
    pub settle_ms: u64,
    /// Stimulus commands
    pub commands: StimulusCommands,
    /// When to send the enable command
    #[serde(default)]
    pub enable_policy: EnablePolicy,
    /// Readings taken at every step
    #[serde(default)]
    pub measurements: Vec<MeasurementConfig>,
}

/// One measurement in configuration form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Column and legend name
    pub name: String,
    /// Instrument id of the measuring device
    pub device: String,
    /// SCPI query returning one number
    pub query: String,
    /// Factor applied to the parsed reply
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Command sent before each query
    #[serde(default)]
    pub prepare: Option<String>,
    /// Wait after `prepare`, in milliseconds
    #[serde(default)]
    pub prepare_settle_ms: u64,
    /// Query timeout override, in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl MeasurementConfig {
    fn to_measurement(&self) -> Measurement {
        Measurement {
            name: self.name.clone(),
            device: self.device.clone(),
            query: self.query.clone(),
            scale: self.scale,
            prepare: self.prepare.clone(),
            prepare_settle: Duration::from_millis(self.prepare_settle_ms),
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Outer sweep of a curve family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    /// Instrument id of the outer stimulus device
    pub stimulus: String,
    /// Outer values, one curve each
    pub values: Sequence,
    /// Outer stimulus commands
    pub commands: StimulusCommands,
    /// Legend label of the outer parameter
    #[serde(default = "default_family_label")]
    pub label: String,
    /// Wait between curves in milliseconds
    #[serde(default = "default_inter_curve_delay")]
    pub inter_curve_delay_ms: u64,
}

/// Export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// File stem for the CSV and chart
    #[serde(default = "default_output_name")]
    pub name: String,
    /// Write a CSV file
    #[serde(default = "default_enabled")]
    pub csv: bool,
    /// Chart image format (svg, png)
    #[serde(default = "default_plot_format")]
    pub plot_format: String,
    /// Chart layout; no chart when unset
    #[serde(default)]
    pub plot: Option<PlotSpec>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            name: default_output_name(),
            csv: true,
            plot_format: default_plot_format(),
            plot: None,
        }
    }
}

impl OutputConfig {
    /// `<dir>/<name>.csv`
    pub fn csv_path(&self) -> PathBuf {
        self.dir.join(format!("{}.csv", self.name))
    }

    /// `<dir>/<name>.<plot_format>`
    pub fn plot_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.name, self.plot_format))
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    5000
}

fn default_scale() -> f64 {
    1.0
}

fn default_family_label() -> String {
    "outer".to_string()
}

fn default_inter_curve_delay() -> u64 {
    500
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_output_name() -> String {
    "sweep".to_string()
}

fn default_plot_format() -> String {
    "svg".to_string()
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl BenchConfig {
    /// Load configuration from `config/bench.toml` and environment variables
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables (`BENCH_DAQ_` prefix) take precedence over the
    /// file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix<P: AsRef<Path>>(path: P, prefix: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(prefix).split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level and format are valid
    /// - Instrument IDs are unique and resources non-empty
    /// - Every device referenced by a sweep is an enabled instrument
    /// - Sequences expand and command templates carry `{value}`
    /// - Plot axes name declared measurements
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if instrument.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Instrument 'id' cannot be empty".to_string(),
                ));
            }
            if !ids.insert(instrument.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate instrument ID: '{}'",
                    instrument.id
                )));
            }
            if instrument.resource.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': 'resource' cannot be empty",
                    instrument.id
                )));
            }
            if instrument.timeout_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': 'timeout_ms' must be positive",
                    instrument.id
                )));
            }
        }

        self.require_enabled(&self.sweep.stimulus, "sweep stimulus")?;
        for measurement in &self.sweep.measurements {
            self.require_enabled(
                &measurement.device,
                &format!("measurement '{}'", measurement.name),
            )?;
        }

        let inner = self.sweep_spec()?;
        if let Some(family) = &self.family {
            self.require_enabled(&family.stimulus, "family stimulus")?;
            self.family_spec()?;
        }

        if !["svg", "png"].contains(&self.output.plot_format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid plot_format '{}'. Must be one of: svg, png",
                self.output.plot_format
            )));
        }
        if let Some(plot) = &self.output.plot {
            let names = inner.measurement_names();
            for axis in std::iter::once(&plot.y).chain(plot.x.as_ref()) {
                if !names.contains(&axis.as_str()) {
                    return Err(ConfigError::ValidationError(format!(
                        "Plot axis '{}' is not a declared measurement",
                        axis
                    )));
                }
            }
        }

        Ok(())
    }

    fn require_enabled(&self, id: &str, role: &str) -> Result<(), ConfigError> {
        match self.instruments.iter().find(|inst| inst.id == id) {
            Some(inst) if inst.enabled => Ok(()),
            Some(_) => Err(ConfigError::ValidationError(format!(
                "{} refers to disabled instrument '{}'",
                role, id
            ))),
            None => Err(ConfigError::ValidationError(format!(
                "{} refers to unknown instrument '{}'",
                role, id
            ))),
        }
    }

    /// Get all enabled instruments
    pub fn enabled_instruments(&self) -> Vec<&InstrumentConfig> {
        self.instruments
            .iter()
            .filter(|inst| inst.enabled)
            .collect()
    }

    /// Build the engine's sweep definition
    pub fn sweep_spec(&self) -> Result<SweepSpec, ConfigError> {
        let stimulus = invalid(self.sweep.sequence.values())?;
        let spec = SweepSpec {
            stimulus,
            settle: Duration::from_millis(self.sweep.settle_ms),
            commands: self.sweep.commands.clone(),
            measurements: self
                .sweep
                .measurements
                .iter()
                .map(MeasurementConfig::to_measurement)
                .collect(),
            enable_policy: self.sweep.enable_policy,
        };
        spec.validate().map_err(invalid_err)?;
        Ok(spec)
    }

    /// Build the curve family definition, if one is configured
    pub fn family_spec(&self) -> Result<Option<FamilySpec>, ConfigError> {
        let Some(family) = &self.family else {
            return Ok(None);
        };
        let spec = FamilySpec {
            outer_values: invalid(family.values.values())?,
            outer_commands: family.commands.clone(),
            outer_label: family.label.clone(),
            inter_curve_delay: Duration::from_millis(family.inter_curve_delay_ms),
            inner: self.sweep_spec()?,
        };
        spec.validate().map_err(invalid_err)?;
        Ok(Some(spec))
    }
}

fn invalid<T>(result: Result<T, crate::error::SweepError>) -> Result<T, ConfigError> {
    result.map_err(invalid_err)
}

fn invalid_err(err: crate::error::SweepError) -> ConfigError {
    ConfigError::ValidationError(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn instrument(id: &str, resource: &str) -> InstrumentConfig {
        InstrumentConfig {
            id: id.to_string(),
            resource: resource.to_string(),
            enabled: true,
            timeout_ms: 5000,
            reset: false,
            init: Vec::new(),
        }
    }

    fn iv_config() -> BenchConfig {
        BenchConfig {
            application: ApplicationConfig {
                name: "IV curve".to_string(),
                log_level: "info".to_string(),
                log_format: "pretty".to_string(),
            },
            instruments: vec![
                instrument("psu", "TCPIP0::192.168.1.91::5025::SOCKET"),
                instrument("dmm", "TCPIP0::192.168.1.92::5025::SOCKET"),
            ],
            sweep: SweepConfig {
                stimulus: "psu".to_string(),
                sequence: Sequence::Linear {
                    start: 0.0,
                    stop: 5.0,
                    step: 0.05,
                },
                settle_ms: 750,
                commands: StimulusCommands::new(
                    "SOUR1:VOLT:LEV:IMM:AMPL {value}",
                    "OUTP:STAT ON",
                    "OUTP:STAT OFF",
                ),
                enable_policy: EnablePolicy::Once,
                measurements: vec![MeasurementConfig {
                    name: "voltage".to_string(),
                    device: "dmm".to_string(),
                    query: "MEAS:VOLT:DC? AUTO".to_string(),
                    scale: -1.0,
                    prepare: None,
                    prepare_settle_ms: 0,
                    timeout_ms: None,
                }],
            },
            family: None,
            output: OutputConfig::default(),
        }
    }

    #[test]
    fn test_config_validation_valid() {
        let config = iv_config();
        assert!(config.validate().is_ok());

        let spec = config.sweep_spec().unwrap();
        assert_eq!(spec.stimulus.len(), 101);
        assert_eq!(spec.settle, Duration::from_millis(750));
        assert_eq!(spec.measurements[0].scale, -1.0);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = iv_config();
        config.application.log_level = "invalid".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_duplicate_instrument_ids() {
        let mut config = iv_config();
        config.instruments.push(instrument("psu", "mock::psu2"));

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate instrument ID"));
    }

    #[test]
    fn test_unknown_and_disabled_devices() {
        let mut config = iv_config();
        config.sweep.measurements[0].device = "scope".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("unknown instrument 'scope'"));

        let mut config = iv_config();
        config.instruments[0].enabled = false;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("disabled instrument 'psu'"));
    }

    #[test]
    fn test_missing_placeholder() {
        let mut config = iv_config();
        config.sweep.commands.set = "SOUR1:VOLT 1".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("{value}"));
    }

    #[test]
    fn test_plot_axis_must_be_a_measurement() {
        let mut config = iv_config();
        config.output.plot = Some(PlotSpec::linear("current"));
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("Plot axis 'current'"));

        config.output.plot = Some(PlotSpec::linear("voltage"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_enabled_instruments_filter() {
        let mut config = iv_config();
        config.instruments.push(InstrumentConfig {
            enabled: false,
            ..instrument("scope", "TCPIP0::192.168.2.2::INSTR")
        });

        let enabled = config.enabled_instruments();
        assert_eq!(enabled.len(), 2);
        assert!(enabled.iter().all(|inst| inst.id != "scope"));
    }

    const BODE_TOML: &str = r#"
[application]
name = "Bode plot"

[[instruments]]
id = "wavegen"
resource = "mock::wavegen"

[[instruments]]
id = "scope"
resource = "mock::scope"
timeout_ms = 10000

[sweep]
stimulus = "wavegen"
settle_ms = 100
enable_policy = "every_step"

[sweep.sequence]
kind = "logarithmic"
start = 1000.0
stop = 200000.0
points = 30

[sweep.commands]
set = ":SOURce1:FREQuency:FIXed {value}"
enable = ":OUTPut1:STATe ON"
disable = ":OUTPut1:STATe OFF"

[[sweep.measurements]]
name = "amplitude"
device = "scope"
query = ":MEASure:VAMP?"
prepare = ":AUToset"
prepare_settle_ms = 1500

[output]
dir = "results"
name = "bode"

[output.plot]
kind = "bode"
y = "amplitude"
"#;

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BODE_TOML.as_bytes()).unwrap();

        let config = BenchConfig::load_with_prefix(file.path(), "BENCH_DAQ_TEST_UNUSED_").unwrap();
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.instruments[1].timeout(), Duration::from_millis(10000));
        assert_eq!(config.output.csv_path(), PathBuf::from("results/bode.csv"));
        assert_eq!(config.output.plot_path(), PathBuf::from("results/bode.svg"));

        let spec = config.sweep_spec().unwrap();
        assert_eq!(spec.stimulus.len(), 30);
        assert_eq!(spec.enable_policy, EnablePolicy::EveryStep);
        assert_eq!(spec.measurements[0].prepare.as_deref(), Some(":AUToset"));
        assert_eq!(spec.measurements[0].prepare_settle, Duration::from_millis(1500));
        assert!(config.family_spec().unwrap().is_none());
    }

    #[test]
    #[serial_test::serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BODE_TOML.as_bytes()).unwrap();

        std::env::set_var("BENCH_DAQ_TEST_ENV_APPLICATION__LOG_LEVEL", "debug");
        std::env::set_var("BENCH_DAQ_TEST_ENV_SWEEP__SETTLE_MS", "250");
        let config = BenchConfig::load_with_prefix(file.path(), "BENCH_DAQ_TEST_ENV_").unwrap();
        std::env::remove_var("BENCH_DAQ_TEST_ENV_APPLICATION__LOG_LEVEL");
        std::env::remove_var("BENCH_DAQ_TEST_ENV_SWEEP__SETTLE_MS");

        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.sweep.settle_ms, 250);
    }

    #[test]
    fn test_missing_file_fails_to_load() {
        let result = BenchConfig::load_with_prefix("does/not/exist.toml", "BENCH_DAQ_TEST_UNUSED_");
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }
}
