//! Sweep engine
//!
//! Drives a stimulus device through a sequence of values and reads the
//! declared measurements after each one:
//!
//! ```text
//! for each value:
//!     set value (+ enable on the first step, or every step)
//!     sleep settle
//!     query every measurement; a failure becomes a sentinel, never an abort
//!     append sample
//! output off (exactly once, on every exit path)
//! ```
//!
//! The only fatal conditions are a stimulus command that cannot be sent, a
//! failed output-off, and the shutdown future resolving. Each of them still
//! returns the samples collected up to that point.

use std::collections::BTreeMap;
use std::future::Future;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::result::{Reading, Sample, SweepResult};
use super::spec::{EnablePolicy, Measurement, Meters, SweepSpec};
use crate::error::{MeasurementError, SweepError, TransportError};
use crate::traits::ScpiEndpoint;

enum Abort {
    Stimulus {
        step: usize,
        stimulus: f64,
        source: TransportError,
    },
    Interrupted,
}

/// Run a sweep to completion
///
/// Equivalent to [`run_sweep_until`] with a shutdown future that never
/// resolves.
///
/// # Errors
/// - `InvalidSpec` before any command is sent
/// - `Stimulus` when the stimulus device rejects a command
/// - `OutputOff` when the final output-off fails
pub async fn run_sweep(
    stimulus: &dyn ScpiEndpoint,
    meters: &Meters,
    spec: &SweepSpec,
) -> Result<SweepResult, SweepError> {
    run_sweep_until(stimulus, meters, spec, std::future::pending::<()>()).await
}

/// Run a sweep, abandoning it when `shutdown` resolves
///
/// `shutdown` is checked between and during steps. When it fires, the step
/// in progress is dropped, output-off is sent, and `Interrupted` is returned
/// with the completed samples.
pub async fn run_sweep_until<F>(
    stimulus: &dyn ScpiEndpoint,
    meters: &Meters,
    spec: &SweepSpec,
    shutdown: F,
) -> Result<SweepResult, SweepError>
where
    F: Future,
{
    spec.validate()?;
    let set_commands = spec
        .stimulus
        .iter()
        .map(|value| spec.commands.render_set(*value))
        .collect::<Result<Vec<_>, _>>()?;

    let sweep_span = info_span!(
        "sweep",
        device = %stimulus.resource(),
        points = spec.stimulus.len()
    );

    async move {
        tokio::pin!(shutdown);
        info!(
            measurements = ?spec.measurement_names(),
            settle_ms = spec.settle.as_millis() as u64,
            "starting sweep"
        );

        let mut samples = Vec::with_capacity(spec.stimulus.len());
        let mut abort = None;

        for (index, (&value, set_command)) in spec.stimulus.iter().zip(&set_commands).enumerate() {
            let step = run_step(stimulus, meters, spec, index, value, set_command)
                .instrument(info_span!("step", step = index, stimulus = value));

            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                result = step => Some(result),
            };

            match outcome {
                Some(Ok(sample)) => samples.push(sample),
                Some(Err(source)) => {
                    error!(
                        step = index,
                        stimulus = value,
                        error = %source,
                        "stimulus command failed at step {} (stimulus {}), aborting sweep",
                        index,
                        value
                    );
                    abort = Some(Abort::Stimulus {
                        step: index,
                        stimulus: value,
                        source,
                    });
                    break;
                }
                None => {
                    warn!(
                        completed = samples.len(),
                        "sweep interrupted before step {} (stimulus {})",
                        index,
                        value
                    );
                    abort = Some(Abort::Interrupted);
                    break;
                }
            }
        }

        let off = stimulus.write(&spec.commands.disable).await;
        if let Err(e) = &off {
            error!(
                command = %spec.commands.disable,
                error = %e,
                "output-off failed, stimulus output may still be energized"
            );
        } else {
            debug!(command = %spec.commands.disable, "stimulus output off");
        }

        let partial = Box::new(SweepResult::new(spec.clone(), samples));
        match (abort, off) {
            (
                Some(Abort::Stimulus {
                    step,
                    stimulus,
                    source,
                }),
                _,
            ) => Err(SweepError::Stimulus {
                step,
                stimulus,
                source,
                partial,
            }),
            (_, Err(source)) => Err(SweepError::OutputOff { source, partial }),
            (Some(Abort::Interrupted), Ok(())) => Err(SweepError::Interrupted { partial }),
            (None, Ok(())) => {
                let failures = partial.failures().len();
                info!(samples = partial.len(), failures, "sweep complete");
                Ok(*partial)
            }
        }
    }
    .instrument(sweep_span)
    .await
}

async fn run_step(
    stimulus: &dyn ScpiEndpoint,
    meters: &Meters,
    spec: &SweepSpec,
    index: usize,
    value: f64,
    set_command: &str,
) -> Result<Sample, TransportError> {
    stimulus.write(set_command).await?;

    let enable = &spec.commands.enable;
    let should_enable = index == 0 || spec.enable_policy == EnablePolicy::EveryStep;
    if should_enable && !enable.is_empty() {
        stimulus.write(enable).await?;
    }

    if !spec.settle.is_zero() {
        tokio::time::sleep(spec.settle).await;
    }

    let mut readings = BTreeMap::new();
    for measurement in &spec.measurements {
        let reading = match measure(meters, measurement).await {
            Ok(v) => {
                debug!(measurement = %measurement.name, value = v, "reading");
                Reading::Value(v)
            }
            Err(e) => {
                warn!(
                    step = index,
                    stimulus = value,
                    measurement = %measurement.name,
                    reason = %e,
                    "measurement '{}' failed at step {} (stimulus {}): {}",
                    measurement.name,
                    index,
                    value,
                    e
                );
                Reading::Failed(e)
            }
        };
        readings.insert(measurement.name.clone(), reading);
    }

    Ok(Sample {
        index,
        stimulus: value,
        readings,
    })
}

async fn measure(meters: &Meters, measurement: &Measurement) -> Result<f64, MeasurementError> {
    let device = meters
        .get(&measurement.device)
        .ok_or_else(|| MeasurementError::UnknownDevice(measurement.device.clone()))?;

    if let Some(prepare) = &measurement.prepare {
        device.write(prepare).await?;
        if !measurement.prepare_settle.is_zero() {
            tokio::time::sleep(measurement.prepare_settle).await;
        }
    }

    let reply = match measurement.timeout {
        Some(timeout) => device.query_with_timeout(&measurement.query, timeout).await?,
        None => device.query(&measurement.query).await?,
    };
    measurement.parse(&reply)
}
