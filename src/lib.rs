//! Core library for the bench_daq application.
//!
//! Runs parameter sweeps over SCPI bench instruments. A stimulus device is
//! stepped through a sequence of values; at every step the engine waits for
//! the circuit to settle, queries each measurement device, and records the
//! readings (or the failure, without stopping). The stimulus output is turned
//! off exactly once however the sweep ends.
//!
//! - [`traits`]: the [`ScpiEndpoint`](traits::ScpiEndpoint) interface every transport implements
//! - [`hardware`]: raw socket, VISA and mock transports
//! - [`instrument`]: `*IDN?` parsing and bench discovery
//! - [`sweep`]: sequences, sweep definitions, the engine and curve families
//! - [`session`]: opening and closing the configured instruments
//! - [`data`]: CSV export and charts
//! - [`config`]: TOML + environment configuration

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod session;
pub mod sweep;
pub mod tracing_init;
pub mod traits;

pub use error::{AppResult, DaqError, MeasurementError, SweepError, TransportError};
pub use session::BenchSession;
