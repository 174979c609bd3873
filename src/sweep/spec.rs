//! Sweep definitions
//!
//! A [`SweepSpec`] says what to drive, how long to wait, and what to read
//! back. It knows nothing about transports: devices are referred to by name
//! and resolved against a [`Meters`] map when the sweep runs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use strfmt::strfmt;

use crate::error::{MeasurementError, SweepError};
use crate::traits::ScpiEndpoint;

/// Measurement devices by name
pub type Meters = BTreeMap<String, Arc<dyn ScpiEndpoint>>;

/// Placeholder substituted into [`StimulusCommands::set`]
pub const VALUE_PLACEHOLDER: &str = "{value}";

/// Commands that drive a stimulus device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusCommands {
    /// Template for setting the level, e.g. `SOUR1:VOLT:LEV:IMM:AMPL {value}`
    pub set: String,
    /// Output-enable command; empty if the device has none
    #[serde(default)]
    pub enable: String,
    /// Output-off command
    pub disable: String,
}

impl StimulusCommands {
    /// Set template plus enable and disable commands
    pub fn new(
        set: impl Into<String>,
        enable: impl Into<String>,
        disable: impl Into<String>,
    ) -> Self {
        Self {
            set: set.into(),
            enable: enable.into(),
            disable: disable.into(),
        }
    }

    /// Render the set command for `value`
    pub fn render_set(&self, value: f64) -> Result<String, SweepError> {
        let mut context = HashMap::new();
        context.insert("value".to_string(), value.to_string());
        strfmt(&self.set, &context).map_err(|e| {
            SweepError::InvalidSpec(format!("cannot render set command '{}': {}", self.set, e))
        })
    }

    pub(crate) fn validate(&self, role: &str) -> Result<(), SweepError> {
        if !self.set.contains(VALUE_PLACEHOLDER) {
            return Err(SweepError::InvalidSpec(format!(
                "{} set command '{}' has no {} placeholder",
                role, self.set, VALUE_PLACEHOLDER
            )));
        }
        if self.disable.trim().is_empty() {
            return Err(SweepError::InvalidSpec(format!(
                "{} output-off command cannot be empty",
                role
            )));
        }
        Ok(())
    }
}

/// When to send the output-enable command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnablePolicy {
    /// After the first set command only
    #[default]
    Once,
    /// After every set command (some generators drop the output on retune)
    EveryStep,
}

/// One named reading taken at every step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Column name in the result
    pub name: String,
    /// Key into the [`Meters`] map
    pub device: String,
    /// Query whose reply is parsed as a number, e.g. `MEAS:VOLT:DC? AUTO`
    pub query: String,
    /// Factor applied to the parsed reply
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Command sent to the device before the query, e.g. `:AUToset`
    #[serde(default)]
    pub prepare: Option<String>,
    /// Wait after `prepare`
    #[serde(default)]
    pub prepare_settle: Duration,
    /// Per-query timeout; the session default when unset
    #[serde(default)]
    pub timeout: Option<Duration>,
}

fn default_scale() -> f64 {
    1.0
}

impl Measurement {
    /// Measurement `name` read from `device` with `query`
    pub fn new(name: impl Into<String>, device: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: device.into(),
            query: query.into(),
            scale: 1.0,
            prepare: None,
            prepare_settle: Duration::ZERO,
            timeout: None,
        }
    }

    /// Multiply every parsed reply by `scale`
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Send `command` and wait `settle` before each query
    pub fn with_prepare(mut self, command: impl Into<String>, settle: Duration) -> Self {
        self.prepare = Some(command.into());
        self.prepare_settle = settle;
        self
    }

    /// Override the device's query timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Parse a textual reply into a scaled value
    ///
    /// Non-numeric and non-finite replies are rejected.
    pub fn parse(&self, reply: &str) -> Result<f64, MeasurementError> {
        let trimmed = reply.trim();
        match trimmed.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value * self.scale),
            _ => Err(MeasurementError::Parse {
                reply: trimmed.to_string(),
            }),
        }
    }
}

/// Everything a sweep needs except the device handles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSpec {
    /// Stimulus values in the order they are applied
    pub stimulus: Vec<f64>,
    /// Wait between setting the stimulus and measuring
    pub settle: Duration,
    /// Stimulus device commands
    pub commands: StimulusCommands,
    /// Readings taken at every step
    pub measurements: Vec<Measurement>,
    /// When to send the enable command
    #[serde(default)]
    pub enable_policy: EnablePolicy,
}

impl SweepSpec {
    /// Sweep with no measurements, enabling the output once
    pub fn new(stimulus: Vec<f64>, settle: Duration, commands: StimulusCommands) -> Self {
        Self {
            stimulus,
            settle,
            commands,
            measurements: Vec::new(),
            enable_policy: EnablePolicy::Once,
        }
    }

    /// Add a measurement
    pub fn with_measurement(mut self, measurement: Measurement) -> Self {
        self.measurements.push(measurement);
        self
    }

    /// Set the enable policy
    pub fn with_enable_policy(mut self, policy: EnablePolicy) -> Self {
        self.enable_policy = policy;
        self
    }

    /// Names of the declared measurements, in declaration order
    pub fn measurement_names(&self) -> Vec<&str> {
        self.measurements.iter().map(|m| m.name.as_str()).collect()
    }

    /// Check the definition on its own
    ///
    /// An empty stimulus sequence is valid; an empty measurement set is not.
    pub fn validate(&self) -> Result<(), SweepError> {
        self.commands.validate("stimulus")?;

        if let Some(bad) = self.stimulus.iter().find(|v| !v.is_finite()) {
            return Err(SweepError::InvalidSpec(format!(
                "stimulus value {} is not finite",
                bad
            )));
        }

        if self.measurements.is_empty() {
            return Err(SweepError::InvalidSpec(
                "at least one measurement is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for measurement in &self.measurements {
            if measurement.name.trim().is_empty() {
                return Err(SweepError::InvalidSpec(
                    "measurement name cannot be empty".to_string(),
                ));
            }
            if !names.insert(measurement.name.as_str()) {
                return Err(SweepError::InvalidSpec(format!(
                    "duplicate measurement name '{}'",
                    measurement.name
                )));
            }
            if measurement.query.trim().is_empty() {
                return Err(SweepError::InvalidSpec(format!(
                    "measurement '{}' has an empty query",
                    measurement.name
                )));
            }
            if !measurement.scale.is_finite() {
                return Err(SweepError::InvalidSpec(format!(
                    "measurement '{}' has a non-finite scale",
                    measurement.name
                )));
            }
        }
        Ok(())
    }

    /// [`validate`](Self::validate), plus every measurement device is in `meters`
    pub fn validate_against(&self, meters: &Meters) -> Result<(), SweepError> {
        self.validate()?;
        match self
            .measurements
            .iter()
            .find(|m| !meters.contains_key(&m.device))
        {
            Some(missing) => Err(SweepError::InvalidSpec(format!(
                "measurement '{}' refers to unknown device '{}'",
                missing.name, missing.device
            ))),
            None => Ok(()),
        }
    }
}
