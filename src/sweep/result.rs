//! Sweep results

use std::collections::BTreeMap;

use super::spec::SweepSpec;
use crate::error::MeasurementError;

/// One measured value, or the reason there is none
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// Parsed and scaled reply
    Value(f64),
    /// Failure sentinel: the step ran but this measurement could not be taken
    Failed(MeasurementError),
}

impl Reading {
    /// The value, `None` for a failure sentinel
    pub fn value(&self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(*v),
            Reading::Failed(_) => None,
        }
    }
}

/// One completed step
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// 0-based position in the stimulus sequence
    pub index: usize,
    /// Commanded stimulus value
    pub stimulus: f64,
    /// One entry per declared measurement
    pub readings: BTreeMap<String, Reading>,
}

impl Sample {
    /// Reading of measurement `name`
    pub fn reading(&self, name: &str) -> Option<&Reading> {
        self.readings.get(name)
    }

    /// Value of measurement `name`, `None` if it failed
    pub fn value(&self, name: &str) -> Option<f64> {
        self.reading(name).and_then(Reading::value)
    }
}

/// A failed reading located in its sweep
#[derive(Debug, Clone, Copy)]
pub struct FailedReading<'a> {
    /// Step of the failure
    pub index: usize,
    /// Stimulus value of that step
    pub stimulus: f64,
    /// Measurement that failed
    pub name: &'a str,
    /// Why
    pub error: &'a MeasurementError,
}

/// Samples of one sweep together with the spec that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResult {
    /// Spec the sweep ran with
    pub spec: SweepSpec,
    /// Completed steps, in stimulus order
    pub samples: Vec<Sample>,
}

impl SweepResult {
    /// Result from samples
    pub fn new(spec: SweepSpec, samples: Vec<Sample>) -> Self {
        Self { spec, samples }
    }

    /// A result with no samples
    pub fn empty(spec: SweepSpec) -> Self {
        Self::new(spec, Vec::new())
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no step completed
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether every stimulus value produced a sample
    pub fn is_complete(&self) -> bool {
        self.samples.len() == self.spec.stimulus.len()
    }

    /// Commanded stimulus values, in sample order
    pub fn stimulus(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.stimulus).collect()
    }

    /// Values of one measurement, index-aligned with [`stimulus`](Self::stimulus)
    ///
    /// Failed readings are `None`.
    pub fn series(&self, name: &str) -> Vec<Option<f64>> {
        self.samples.iter().map(|s| s.value(name)).collect()
    }

    /// (stimulus, value) pairs of one measurement with failures dropped
    pub fn points(&self, name: &str) -> Vec<(f64, f64)> {
        self.samples
            .iter()
            .filter_map(|s| s.value(name).map(|v| (s.stimulus, v)))
            .collect()
    }

    /// Every failed reading, in sample order
    pub fn failures(&self) -> Vec<FailedReading<'_>> {
        self.samples
            .iter()
            .flat_map(|sample| {
                sample.readings.iter().filter_map(move |(name, reading)| match reading {
                    Reading::Failed(error) => Some(FailedReading {
                        index: sample.index,
                        stimulus: sample.stimulus,
                        name,
                        error,
                    }),
                    Reading::Value(_) => None,
                })
            })
            .collect()
    }
}
