//! Export of sweep results: CSV files and charts.

pub mod plot;
pub mod storage;

pub use plot::{render, render_family, render_family_or_log, render_or_log, PlotKind, PlotSpec};
pub use storage::{write_csv, write_family_csv};
