//! Shipped configuration files and the export path from sweep to files.

use bench_daq::config::BenchConfig;
use bench_daq::data::{self, PlotKind, PlotSpec};
use bench_daq::hardware::MockInstrument;
use bench_daq::sweep::{run_sweep, Measurement, Meters, StimulusCommands, SweepSpec};
use bench_daq::traits::ScpiEndpoint;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn shipped(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config").join(name)
}

#[test]
fn test_shipped_iv_config() {
    let config = BenchConfig::load_from(shipped("bench.toml")).unwrap();
    let spec = config.sweep_spec().unwrap();

    assert_eq!(spec.stimulus.len(), 51);
    assert_eq!(spec.stimulus[1], 0.1);
    assert_eq!(spec.stimulus[50], 5.0);
    assert_eq!(spec.settle, Duration::from_millis(750));
    assert_eq!(spec.measurements[0].scale, -1.0);
    assert_eq!(spec.commands.render_set(0.3).unwrap(), "SOUR1:VOLT:LEV:IMM:AMPL 0.3");
    assert!(config.family_spec().unwrap().is_none());
}

#[test]
fn test_shipped_bode_config() {
    let config = BenchConfig::load_from(shipped("bode.toml")).unwrap();
    let spec = config.sweep_spec().unwrap();

    assert_eq!(spec.stimulus.len(), 30);
    assert_eq!(spec.stimulus[0], 1000.0);
    assert_eq!(spec.stimulus[29], 200000.0);
    assert_eq!(config.output.plot.as_ref().map(|p| p.kind), Some(PlotKind::Bode));
}

#[test]
fn test_shipped_family_config() {
    let config = BenchConfig::load_from(shipped("bjt_family.toml")).unwrap();
    let family = config.family_spec().unwrap().unwrap();

    assert_eq!(family.outer_values, vec![0.0, 0.00001, 0.00002, 0.00005, 0.0001]);
    assert_eq!(family.outer_label, "Ib (A)");
    assert_eq!(family.inner.stimulus.len(), 21);
    assert_eq!(family.inter_curve_delay, Duration::from_millis(500));
}

#[cfg(feature = "storage_csv")]
#[tokio::test]
async fn test_sweep_to_csv_and_chart() {
    let psu = MockInstrument::new("mock::psu");
    let dmm = MockInstrument::new("mock::dmm").with_replies("MEAS:VOLT:DC?", ["0.000", "0.041", "ERR"]);
    let mut meters = Meters::new();
    meters.insert("dmm".to_string(), Arc::new(dmm) as Arc<dyn ScpiEndpoint>);
    let spec = SweepSpec::new(
        vec![0.0, 0.2, 0.4],
        Duration::ZERO,
        StimulusCommands::new("VOLT {value}", "OUTP ON", "OUTP OFF"),
    )
    .with_measurement(Measurement::new("voltage", "dmm", "MEAS:VOLT:DC?"));

    let result = run_sweep(&psu, &meters, &spec).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("iv.csv");
    let svg_path = dir.path().join("iv.svg");
    data::write_csv(&result, &csv_path).unwrap();
    data::render(&result, &PlotSpec::linear("voltage").with_title("I-V"), &svg_path).unwrap();

    let csv = std::fs::read_to_string(&csv_path).unwrap();
    let rows: Vec<&str> = csv.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(rows, vec!["index,stimulus,voltage", "0,0,0", "1,0.2,0.041", "2,0.4,"]);
    assert!(std::fs::read_to_string(&svg_path).unwrap().contains("I-V"));
}

#[tokio::test]
async fn test_render_failure_is_only_logged() {
    let spec = SweepSpec::new(
        vec![1.0],
        Duration::ZERO,
        StimulusCommands::new("FREQ {value}", "", "OUTP OFF"),
    )
    .with_measurement(Measurement::new("amplitude", "scope", ":MEASure:VAMP?"));
    let result = bench_daq::sweep::SweepResult::empty(spec);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chart.bmp");
    data::render_or_log(&result, &PlotSpec::bode("amplitude"), &path);
    assert!(!path.exists());
}
