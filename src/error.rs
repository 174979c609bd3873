//! Custom error types for the application.
//!
//! The taxonomy follows the life of a sweep:
//!
//! - **`TransportError`**: anything the instrument link can report. Opening a
//!   resource (`Connection`), writing or reading (`Communication`), waiting too
//!   long for a reply (`Timeout`), using a handle after `close()` (`Closed`), or a
//!   transport that was not compiled in (`FeatureNotEnabled`).
//! - **`MeasurementError`**: a single reading that could not be obtained. These
//!   never abort a sweep; they are stored in the sample as the failure sentinel.
//! - **`SweepError`**: the fatal outcomes of a sweep. A broken stimulus device,
//!   a failed setup, a failed output-off, or an operator interrupt. Every variant
//!   raised after the sweep started carries the samples collected so far.
//! - **`DaqError`**: the application-level error used by export, plotting and
//!   configuration code, with `#[from]` conversions so `?` works across layers.
//!
//! Teardown failures (closing a handle after the sweep) have no type here.
//! The session logs them and never returns them.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::sweep::{FamilyResult, SweepResult};

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by an instrument transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The resource string is malformed or the device cannot be reached
    #[error("Cannot open '{resource}': {reason}")]
    Connection {
        /// Resource string being opened
        resource: String,
        /// What went wrong
        reason: String,
    },

    /// A write or read on an open session failed
    #[error("Communication error on '{resource}': {reason}")]
    Communication {
        /// Resource string of the session
        resource: String,
        /// What went wrong
        reason: String,
    },

    /// No reply arrived in time
    #[error("Timed out after {timeout:?} waiting for reply to '{command}'")]
    Timeout {
        /// Query that went unanswered
        command: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The session was used after `close()`
    #[error("Session '{0}' is closed")]
    Closed(String),

    /// The transport is behind a cargo feature that is not compiled in
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

/// Why one measurement of one step produced no value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasurementError {
    /// The query itself failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The reply is not a number
    #[error("Reply '{reply}' is not a number")]
    Parse {
        /// Reply as received, trimmed
        reply: String,
    },

    /// The measurement names a device that is not open
    #[error("No measurement device named '{0}'")]
    UnknownDevice(String),
}

/// Fatal sweep outcomes.
#[derive(Error, Debug)]
pub enum SweepError {
    /// Rejected before any command was sent
    #[error("Invalid sweep definition: {0}")]
    InvalidSpec(String),

    /// An instrument failed to open or initialize
    #[error("Setup of '{device}' failed: {source}")]
    Setup {
        /// Configured instrument id
        device: String,
        /// Underlying failure
        #[source]
        source: TransportError,
    },

    /// The stimulus device rejected a set or enable command
    #[error("Stimulus command failed at step {step} (stimulus {stimulus}): {source}")]
    Stimulus {
        /// 0-based step that failed
        step: usize,
        /// Stimulus value of that step
        stimulus: f64,
        /// Underlying failure
        #[source]
        source: TransportError,
        /// Samples of the steps before it
        partial: Box<SweepResult>,
    },

    /// The final output-off failed
    #[error("Output-off failed after {} samples, output may still be energized: {source}", .partial.samples.len())]
    OutputOff {
        /// Underlying failure
        #[source]
        source: TransportError,
        /// Every sample collected
        partial: Box<SweepResult>,
    },

    /// The shutdown future resolved
    #[error("Sweep interrupted after {} samples", .partial.samples.len())]
    Interrupted {
        /// Samples of the steps completed before the interrupt
        partial: Box<SweepResult>,
    },

    /// A curve of a family failed
    #[error("Curve {curve} (outer value {outer}) failed after {} complete curves: {source}", .completed.curves.len())]
    Family {
        /// 0-based curve that failed
        curve: usize,
        /// Outer value of that curve
        outer: f64,
        /// Failure of the curve
        #[source]
        source: Box<SweepError>,
        /// Curves finished before it
        completed: Box<FamilyResult>,
    },

    /// The final outer output-off of a family failed
    #[error("Outer output-off failed after {} curves, output may still be energized: {source}", .completed.curves.len())]
    FamilyOutputOff {
        /// Underlying failure
        #[source]
        source: TransportError,
        /// Every finished curve
        completed: Box<FamilyResult>,
    },
}

impl SweepError {
    /// Samples collected before the sweep failed, if any were.
    pub fn partial(&self) -> Option<&SweepResult> {
        match self {
            SweepError::Stimulus { partial, .. }
            | SweepError::OutputOff { partial, .. }
            | SweepError::Interrupted { partial } => Some(partial),
            SweepError::Family { source, .. } => source.partial(),
            SweepError::InvalidSpec(_)
            | SweepError::Setup { .. }
            | SweepError::FamilyOutputOff { .. } => None,
        }
    }

    /// Curves finished before a curve family failed.
    pub fn completed_curves(&self) -> Option<&FamilyResult> {
        match self {
            SweepError::Family { completed, .. } | SweepError::FamilyOutputOff { completed, .. } => {
                Some(completed)
            }
            _ => None,
        }
    }
}

/// Application-level error
#[derive(Error, Debug)]
pub enum DaqError {
    /// Loading or validating the configuration failed
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem error while exporting
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Instrument transport failure outside a sweep
    #[error("Instrument error: {0}")]
    Transport(#[from] TransportError),

    /// Fatal sweep outcome
    #[error("Sweep error: {0}")]
    Sweep(#[from] SweepError),

    /// CSV writer failure
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Metadata could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Chart rendering failed
    #[error("Plot error: {0}")]
    Plot(String),

    /// Export format behind a cargo feature that is not compiled in
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}
