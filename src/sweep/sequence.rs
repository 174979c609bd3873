//! Stimulus sequence generation

use serde::{Deserialize, Serialize};

use crate::error::SweepError;

/// Upper bound on generated sequence length
pub const MAX_POINTS: usize = 1_000_000;

/// A stimulus sequence as written in configuration
///
/// ```toml
/// [sweep.sequence]
/// kind = "logarithmic"
/// start = 1000.0
/// stop = 200000.0
/// points = 30
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sequence {
    /// `start, start + step, ...` up to and including `stop`
    Linear {
        /// First value
        start: f64,
        /// Last value
        stop: f64,
        /// Signed increment
        step: f64,
    },
    /// `points` values evenly spaced in log10 between the bounds
    Logarithmic {
        /// First value, positive
        start: f64,
        /// Last value, positive
        stop: f64,
        /// Number of values
        points: usize,
    },
    /// Explicit values, used as given
    List {
        /// The values
        values: Vec<f64>,
    },
}

impl Sequence {
    /// Expand into concrete values
    pub fn values(&self) -> Result<Vec<f64>, SweepError> {
        match self {
            Sequence::Linear { start, stop, step } => linear(*start, *stop, *step),
            Sequence::Logarithmic {
                start,
                stop,
                points,
            } => logarithmic(*start, *stop, *points),
            Sequence::List { values } => list(values.clone()),
        }
    }
}

fn round9(value: f64) -> f64 {
    let rounded = (value * 1e9).round() / 1e9;
    // keep -0.0 out of exported data
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Evenly stepped values from `start` towards `stop`
///
/// `stop` is included when it lies on the grid. `step` is signed and must
/// point from `start` to `stop`; values are rounded to 9 decimal places so
/// accumulated float error does not leak into commands.
pub fn linear(start: f64, stop: f64, step: f64) -> Result<Vec<f64>, SweepError> {
    if !(start.is_finite() && stop.is_finite() && step.is_finite()) {
        return Err(SweepError::InvalidSpec(
            "linear sequence bounds and step must be finite".to_string(),
        ));
    }
    if start == stop {
        return Ok(vec![round9(start)]);
    }
    if step == 0.0 {
        return Err(SweepError::InvalidSpec(
            "linear sequence step cannot be zero".to_string(),
        ));
    }
    let intervals = (stop - start) / step;
    if intervals < 0.0 {
        return Err(SweepError::InvalidSpec(format!(
            "step {} points away from stop {} (start {})",
            step, stop, start
        )));
    }

    let intervals = (intervals + 1e-9).floor();
    if intervals >= MAX_POINTS as f64 {
        return Err(SweepError::InvalidSpec(format!(
            "linear sequence would exceed {} points",
            MAX_POINTS
        )));
    }

    Ok((0..=intervals as usize)
        .map(|i| round9(start + i as f64 * step))
        .collect())
}

/// `points` values evenly spaced in log10 between `start` and `stop` inclusive
pub fn logarithmic(start: f64, stop: f64, points: usize) -> Result<Vec<f64>, SweepError> {
    if !(start.is_finite() && stop.is_finite()) || start <= 0.0 || stop <= 0.0 {
        return Err(SweepError::InvalidSpec(format!(
            "logarithmic sequence needs positive finite bounds, got {} and {}",
            start, stop
        )));
    }
    if points == 0 || points > MAX_POINTS {
        return Err(SweepError::InvalidSpec(format!(
            "logarithmic sequence needs 1..={} points, got {}",
            MAX_POINTS, points
        )));
    }
    if points == 1 {
        return Ok(vec![start]);
    }

    let (lo, hi) = (start.log10(), stop.log10());
    let last = points - 1;
    Ok((0..points)
        .map(|i| match i {
            0 => start,
            i if i == last => stop,
            i => 10f64.powf(lo + (hi - lo) * i as f64 / last as f64),
        })
        .collect())
}

/// Explicit values, in the given order
pub fn list(values: Vec<f64>) -> Result<Vec<f64>, SweepError> {
    match values.iter().find(|v| !v.is_finite()) {
        Some(bad) => Err(SweepError::InvalidSpec(format!(
            "sequence value {} is not finite",
            bad
        ))),
        None => Ok(values),
    }
}
