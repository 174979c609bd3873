//! Configuration
//!
//! Bench layouts, sweeps and export settings are read from TOML with
//! environment overrides. See [`BenchConfig`] and `config/bench.toml` for a
//! complete example.

pub mod bench_config;

pub use bench_config::{
    ApplicationConfig, BenchConfig, ConfigError, FamilyConfig, InstrumentConfig,
    MeasurementConfig, OutputConfig, SweepConfig, DEFAULT_CONFIG_PATH, ENV_PREFIX,
};
