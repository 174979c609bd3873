//! Parameter sweeps
//!
//! - [`spec`]: what to sweep and what to measure
//! - [`sequence`]: linear, logarithmic and explicit stimulus values
//! - [`engine`]: the set, settle, measure loop
//! - [`family`]: nested sweeps producing one curve per outer value
//! - [`result`]: samples and failure sentinels

pub mod engine;
pub mod family;
pub mod result;
pub mod sequence;
pub mod spec;

pub use engine::{run_sweep, run_sweep_until};
pub use family::{run_family, run_family_until, Curve, FamilyResult, FamilySpec};
pub use result::{FailedReading, Reading, Sample, SweepResult};
pub use sequence::Sequence;
pub use spec::{EnablePolicy, Measurement, Meters, StimulusCommands, SweepSpec};
