//! Curve families
//!
//! A family is a nested sweep: an outer stimulus (typically a transistor's
//! base current) is stepped through a few values and, at each one, a full
//! inner sweep (collector-emitter voltage) is run. The result is one curve
//! per outer value.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, info_span, Instrument};

use super::engine::run_sweep_until;
use super::result::SweepResult;
use super::spec::{Meters, StimulusCommands, SweepSpec};
use crate::error::{SweepError, TransportError};
use crate::traits::ScpiEndpoint;

/// Nested sweep definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilySpec {
    /// Outer stimulus values, one curve each
    pub outer_values: Vec<f64>,
    /// Commands for the outer stimulus device
    pub outer_commands: StimulusCommands,
    /// Legend label for the outer parameter, e.g. `Ib (A)`
    pub outer_label: String,
    /// Wait between curves
    pub inter_curve_delay: Duration,
    /// Sweep run at every outer value
    pub inner: SweepSpec,
}

impl FamilySpec {
    /// Check the outer commands, the outer values and the inner sweep
    pub fn validate(&self) -> Result<(), SweepError> {
        self.outer_commands.validate("outer")?;
        if let Some(bad) = self.outer_values.iter().find(|v| !v.is_finite()) {
            return Err(SweepError::InvalidSpec(format!(
                "outer value {} is not finite",
                bad
            )));
        }
        self.inner.validate()
    }
}

/// One inner sweep at a fixed outer value
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    /// Outer stimulus value held during this curve
    pub outer: f64,
    /// The inner sweep
    pub result: SweepResult,
}

/// Curves of a family run, in outer-value order
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyResult {
    /// Legend label for the outer parameter
    pub outer_label: String,
    /// Sweep every curve was run with
    pub inner: SweepSpec,
    /// Completed curves
    pub curves: Vec<Curve>,
}

impl FamilyResult {
    /// A family with no curves yet
    pub fn new(outer_label: impl Into<String>, inner: SweepSpec) -> Self {
        Self {
            outer_label: outer_label.into(),
            inner,
            curves: Vec::new(),
        }
    }
}

struct Abort {
    curve: usize,
    outer_value: f64,
    source: SweepError,
}

/// Run every curve of the family
///
/// # Errors
/// See [`run_family_until`].
pub async fn run_family(
    outer: &dyn ScpiEndpoint,
    inner: &dyn ScpiEndpoint,
    meters: &Meters,
    spec: &FamilySpec,
) -> Result<FamilyResult, SweepError> {
    run_family_until(outer, inner, meters, spec, std::future::pending::<()>()).await
}

/// Run every curve, abandoning the family when `shutdown` resolves
///
/// The outer output is turned off exactly once on every exit path. The inner
/// output is handled by each inner sweep. Any failure is wrapped in
/// `SweepError::Family` carrying the curves completed before it.
pub async fn run_family_until<F>(
    outer: &dyn ScpiEndpoint,
    inner: &dyn ScpiEndpoint,
    meters: &Meters,
    spec: &FamilySpec,
    shutdown: F,
) -> Result<FamilyResult, SweepError>
where
    F: Future,
{
    spec.validate()?;
    let set_commands = spec
        .outer_values
        .iter()
        .map(|value| spec.outer_commands.render_set(*value))
        .collect::<Result<Vec<_>, _>>()?;

    let family_span = info_span!(
        "family",
        outer_device = %outer.resource(),
        curves = spec.outer_values.len()
    );

    async move {
        tokio::pin!(shutdown);
        let mut family = FamilyResult::new(spec.outer_label.clone(), spec.inner.clone());
        let mut abort = None;

        for (curve, (&value, set_command)) in
            spec.outer_values.iter().zip(&set_commands).enumerate()
        {
            info!(curve, outer = value, "{} = {}", spec.outer_label, value);

            let primed = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                result = set_outer(outer, spec, curve, set_command) => Some(result),
            };
            let failure = match primed {
                None => Some(interrupted(spec)),
                Some(Err(source)) => Some(SweepError::Stimulus {
                    step: curve,
                    stimulus: value,
                    source,
                    partial: Box::new(SweepResult::empty(spec.inner.clone())),
                }),
                Some(Ok(())) => None,
            };
            if let Some(source) = failure {
                abort = Some(Abort {
                    curve,
                    outer_value: value,
                    source,
                });
                break;
            }

            match run_sweep_until(inner, meters, &spec.inner, shutdown.as_mut())
                .instrument(info_span!("curve", curve, outer = value))
                .await
            {
                Ok(result) => family.curves.push(Curve { outer: value, result }),
                Err(source) => {
                    abort = Some(Abort {
                        curve,
                        outer_value: value,
                        source,
                    });
                    break;
                }
            }

            let next = curve + 1;
            if next < spec.outer_values.len() && !spec.inter_curve_delay.is_zero() {
                let waited = tokio::select! {
                    biased;
                    _ = &mut shutdown => false,
                    _ = tokio::time::sleep(spec.inter_curve_delay) => true,
                };
                if !waited {
                    abort = Some(Abort {
                        curve: next,
                        outer_value: spec.outer_values[next],
                        source: interrupted(spec),
                    });
                    break;
                }
            }
        }

        let off = outer.write(&spec.outer_commands.disable).await;
        match &off {
            Ok(()) => debug!(command = %spec.outer_commands.disable, "outer output off"),
            Err(e) => error!(
                command = %spec.outer_commands.disable,
                error = %e,
                "outer output-off failed, output may still be energized"
            ),
        }

        let completed = Box::new(family);
        match (abort, off) {
            (
                Some(Abort {
                    curve,
                    outer_value,
                    source,
                }),
                _,
            ) => {
                error!(curve, outer = outer_value, error = %source, "curve family aborted");
                Err(SweepError::Family {
                    curve,
                    outer: outer_value,
                    source: Box::new(source),
                    completed,
                })
            }
            (None, Err(source)) => Err(SweepError::FamilyOutputOff { source, completed }),
            (None, Ok(())) => {
                info!(curves = completed.curves.len(), "curve family complete");
                Ok(*completed)
            }
        }
    }
    .instrument(family_span)
    .await
}

async fn set_outer(
    outer: &dyn ScpiEndpoint,
    spec: &FamilySpec,
    curve: usize,
    set_command: &str,
) -> Result<(), TransportError> {
    outer.write(set_command).await?;
    if curve == 0 && !spec.outer_commands.enable.is_empty() {
        outer.write(&spec.outer_commands.enable).await?;
    }
    Ok(())
}

fn interrupted(spec: &FamilySpec) -> SweepError {
    SweepError::Interrupted {
        partial: Box::new(SweepResult::empty(spec.inner.clone())),
    }
}
