//! Chart rendering
//!
//! Renders sweep results with `plotters`:
//! - [`PlotKind::Linear`]: one measurement against the stimulus or against
//!   another measurement (I-V curves)
//! - [`PlotKind::Bode`]: amplitude and relative gain in dB against a log
//!   frequency axis
//! - [`render_family`]: one line per curve of a curve family
//!
//! The backend follows the file extension. SVG is always available; PNG
//! needs the `plot_bitmap` feature. Failed readings are left out of the
//! drawn lines.

use plotters::coord::Shift;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use tracing::{error, info};

use crate::error::{AppResult, DaqError};
use crate::sweep::{FamilyResult, SweepResult};

/// Floor applied to amplitudes before taking the logarithm
pub const DB_FLOOR: f64 = 1e-6;

/// Fixed gain axis of Bode charts, in dB
pub const DB_RANGE: Range<f64> = -40.0..5.0;

/// Chart layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotKind {
    /// One x/y chart
    #[default]
    Linear,
    /// Magnitude in dB over log frequency, above the raw amplitude
    Bode,
}

/// What to draw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSpec {
    /// Chart layout
    #[serde(default)]
    pub kind: PlotKind,
    /// Caption above the chart
    #[serde(default)]
    pub title: Option<String>,
    /// Measurement on the x axis; the stimulus when unset
    #[serde(default)]
    pub x: Option<String>,
    /// Measurement on the y axis
    pub y: String,
    /// X axis description; the column name when unset
    #[serde(default)]
    pub x_label: Option<String>,
    /// Y axis description; the column name when unset
    #[serde(default)]
    pub y_label: Option<String>,
    /// Image size in pixels
    #[serde(default = "default_size")]
    pub size: (u32, u32),
}

fn default_size() -> (u32, u32) {
    (1024, 768)
}

impl PlotSpec {
    /// Linear chart of `y` over the stimulus
    pub fn linear(y: impl Into<String>) -> Self {
        Self {
            kind: PlotKind::Linear,
            title: None,
            x: None,
            y: y.into(),
            x_label: None,
            y_label: None,
            size: default_size(),
        }
    }

    /// Bode chart of amplitude column `y`
    pub fn bode(y: impl Into<String>) -> Self {
        Self {
            kind: PlotKind::Bode,
            ..Self::linear(y)
        }
    }

    /// Plot against a measurement instead of the stimulus
    pub fn with_x(mut self, x: impl Into<String>) -> Self {
        self.x = Some(x.into());
        self
    }

    /// Set the caption
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set both axis descriptions
    pub fn with_labels(mut self, x_label: impl Into<String>, y_label: impl Into<String>) -> Self {
        self.x_label = Some(x_label.into());
        self.y_label = Some(y_label.into());
        self
    }

    fn x_desc(&self) -> String {
        self.x_label
            .clone()
            .or_else(|| self.x.clone())
            .unwrap_or_else(|| "stimulus".to_string())
    }

    fn y_desc(&self) -> String {
        self.y_label.clone().unwrap_or_else(|| self.y.clone())
    }
}

/// Gain relative to the largest amplitude, in dB
///
/// `20 * log10(max(a, 1e-6) / max_amp)`, where `max_amp` is the largest
/// positive amplitude (1 when there is none).
pub fn to_db(amplitudes: &[f64]) -> Vec<f64> {
    let max_amp = amplitudes
        .iter()
        .copied()
        .filter(|a| *a > 0.0)
        .fold(None, |max: Option<f64>, a| Some(max.map_or(a, |m| m.max(a))))
        .unwrap_or(1.0);
    amplitudes
        .iter()
        .map(|a| 20.0 * (a.max(DB_FLOOR) / max_amp).log10())
        .collect()
}

/// (x, y) pairs of the spec's axes, failures dropped
fn xy_points(result: &SweepResult, spec: &PlotSpec) -> Vec<(f64, f64)> {
    match &spec.x {
        None => result.points(&spec.y),
        Some(x) => result
            .samples
            .iter()
            .filter_map(|s| Some((s.value(x)?, s.value(&spec.y)?)))
            .collect(),
    }
}

/// Axis range covering `values` and zero, padded by 5%
fn axis_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values.fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if hi - lo <= f64::EPSILON {
        return lo..lo + 1.0;
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad)..(hi + pad)
}

enum Chart<'a> {
    Sweep(&'a SweepResult),
    Family(&'a FamilyResult),
}

/// Render a sweep to `path`
///
/// # Errors
/// - `Plot` for drawing failures or an unsupported extension
/// - `FeatureNotEnabled` for `.png` without `plot_bitmap`
pub fn render(result: &SweepResult, spec: &PlotSpec, path: &Path) -> AppResult<()> {
    render_chart(Chart::Sweep(result), spec, path)
}

/// Render a curve family to `path`, one line per curve
pub fn render_family(family: &FamilyResult, spec: &PlotSpec, path: &Path) -> AppResult<()> {
    render_chart(Chart::Family(family), spec, path)
}

/// Render a sweep, logging instead of returning any failure
///
/// Acquisition has already succeeded when this runs; a chart that cannot be
/// drawn must not discard the data.
pub fn render_or_log(result: &SweepResult, spec: &PlotSpec, path: &Path) {
    if let Err(e) = render(result, spec, path) {
        error!(path = %path.display(), error = %e, "failed to render chart");
    }
}

/// [`render_family`], logging instead of returning any failure
pub fn render_family_or_log(family: &FamilyResult, spec: &PlotSpec, path: &Path) {
    if let Err(e) = render_family(family, spec, path) {
        error!(path = %path.display(), error = %e, "failed to render chart");
    }
}

fn render_chart(chart: Chart<'_>, spec: &PlotSpec, path: &Path) -> AppResult<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "svg" => {
            let root = SVGBackend::new(path, spec.size).into_drawing_area();
            draw(&root, chart, spec).map_err(|e| DaqError::Plot(e.to_string()))?;
        }
        "png" => render_bitmap(chart, spec, path)?,
        other => {
            return Err(DaqError::Plot(format!(
                "unsupported chart format '{}' (use .svg or .png)",
                other
            )))
        }
    }

    info!(path = %path.display(), "chart written");
    Ok(())
}

#[cfg(feature = "plot_bitmap")]
fn render_bitmap(chart: Chart<'_>, spec: &PlotSpec, path: &Path) -> AppResult<()> {
    let root = BitMapBackend::new(path, spec.size).into_drawing_area();
    draw(&root, chart, spec).map_err(|e| DaqError::Plot(e.to_string()))
}

#[cfg(not(feature = "plot_bitmap"))]
fn render_bitmap(_chart: Chart<'_>, _spec: &PlotSpec, _path: &Path) -> AppResult<()> {
    Err(DaqError::FeatureNotEnabled("plot_bitmap".to_string()))
}

type DrawResult<DB> = Result<(), DrawingAreaErrorKind<<DB as DrawingBackend>::ErrorType>>;

fn draw<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    chart: Chart<'_>,
    spec: &PlotSpec,
) -> DrawResult<DB> {
    root.fill(&WHITE)?;
    match (chart, spec.kind) {
        (Chart::Sweep(result), PlotKind::Linear) => {
            draw_lines(root, spec, &[(None, xy_points(result, spec))])?
        }
        (Chart::Sweep(result), PlotKind::Bode) => draw_bode(root, result, spec)?,
        (Chart::Family(family), _) => {
            let lines: Vec<_> = family
                .curves
                .iter()
                .map(|curve| {
                    let label = format!("{} = {}", family.outer_label, curve.outer);
                    (Some(label), xy_points(&curve.result, spec))
                })
                .collect();
            draw_lines(root, spec, &lines)?
        }
    }
    root.present()
}

fn draw_lines<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    spec: &PlotSpec,
    lines: &[(Option<String>, Vec<(f64, f64)>)],
) -> DrawResult<DB> {
    let all = || lines.iter().flat_map(|(_, points)| points.iter());
    let x_range = axis_range(all().map(|p| p.0));
    let y_range = axis_range(all().map(|p| p.1));

    let mut chart = ChartBuilder::on(root)
        .caption(spec.title.clone().unwrap_or_default(), ("sans-serif", 22))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc(spec.x_desc())
        .y_desc(spec.y_desc())
        .draw()?;

    for (i, (label, points)) in lines.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        let series = chart.draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))?;
        if let Some(label) = label {
            series
                .label(label.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }
        chart.draw_series(
            points
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 3, color.filled())),
        )?;
    }

    if lines.iter().any(|(label, _)| label.is_some()) {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .background_style(WHITE.mix(0.85))
            .border_style(BLACK.mix(0.25))
            .draw()?;
    }
    Ok(())
}

fn draw_bode<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    result: &SweepResult,
    spec: &PlotSpec,
) -> DrawResult<DB> {
    let points: Vec<(f64, f64)> = result
        .points(&spec.y)
        .into_iter()
        .filter(|(f, _)| *f > 0.0)
        .collect();
    let amplitudes: Vec<f64> = points.iter().map(|p| p.1).collect();
    let gains: Vec<(f64, f64)> = points
        .iter()
        .zip(to_db(&amplitudes))
        .map(|(&(f, _), db)| (f, db.max(DB_RANGE.start)))
        .collect();

    let (f_lo, f_hi) = points
        .iter()
        .fold((f64::INFINITY, 0.0f64), |(lo, hi), p| (lo.min(p.0), hi.max(p.0)));
    let f_range = if points.is_empty() || f_lo >= f_hi {
        let f = if points.is_empty() { 1.0 } else { f_lo };
        (f / 10.0)..(f * 10.0)
    } else {
        f_lo..f_hi
    };

    let panels = root.split_evenly((2, 1));

    let mut upper = ChartBuilder::on(&panels[0])
        .caption(
            spec.title.clone().unwrap_or_else(|| "Frequency Response".to_string()),
            ("sans-serif", 22),
        )
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(f_range.clone().log_scale(), axis_range(amplitudes.iter().copied()))?;
    upper
        .configure_mesh()
        .x_desc(spec.x_label.clone().unwrap_or_else(|| "Frequency (Hz)".to_string()))
        .y_desc(spec.y_label.clone().unwrap_or_else(|| "Amplitude (V)".to_string()))
        .draw()?;
    upper.draw_series(LineSeries::new(points.iter().copied(), BLUE.stroke_width(2)))?;
    upper.draw_series(points.iter().map(|&p| Circle::new(p, 3, BLUE.filled())))?;

    let mut lower = ChartBuilder::on(&panels[1])
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(f_range.log_scale(), DB_RANGE)?;
    lower
        .configure_mesh()
        .x_desc(spec.x_label.clone().unwrap_or_else(|| "Frequency (Hz)".to_string()))
        .y_desc("Gain (dB)")
        .draw()?;
    lower.draw_series(LineSeries::new(gains.iter().copied(), RED.stroke_width(2)))?;
    lower.draw_series(gains.iter().map(|&p| Circle::new(p, 3, RED.filled())))?;
    Ok(())
}
