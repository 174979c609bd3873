//! CSV export with clean feature flag handling.
//!
//! Files start with the run metadata as `# `-prefixed JSON lines, followed by
//! a header row and one row per sample:
//!
//! ```text
//! # {
//! #   "created": "2026-03-02T10:15:00Z",
//! #   ...
//! # }
//! index,stimulus,voltage
//! 0,0,0
//! 1,0.2,0.041
//! 2,0.4,
//! ```
//!
//! A failed reading is an empty field, so rows stay aligned with the
//! stimulus sequence.

use std::path::Path;

use crate::error::AppResult;
use crate::sweep::{FamilyResult, SweepResult};

// ============================================================================
// CSV Writer
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde::Serialize;
    use std::fs::File;
    use std::io::Write;
    use tracing::info;

    #[derive(Debug, Serialize)]
    struct MeasurementInfo<'a> {
        name: &'a str,
        device: &'a str,
        query: &'a str,
        scale: f64,
    }

    /// Run description written above the data
    #[derive(Debug, Serialize)]
    struct SweepMetadata<'a> {
        created: DateTime<Utc>,
        set_command: &'a str,
        settle_ms: u64,
        points: usize,
        samples: usize,
        failures: usize,
        measurements: Vec<MeasurementInfo<'a>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        outer_label: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        curves: Option<usize>,
    }

    impl<'a> SweepMetadata<'a> {
        fn new(result: &'a SweepResult) -> Self {
            let spec = &result.spec;
            Self {
                created: Utc::now(),
                set_command: &spec.commands.set,
                settle_ms: spec.settle.as_millis() as u64,
                points: spec.stimulus.len(),
                samples: result.len(),
                failures: result.failures().len(),
                measurements: spec
                    .measurements
                    .iter()
                    .map(|m| MeasurementInfo {
                        name: &m.name,
                        device: &m.device,
                        query: &m.query,
                        scale: m.scale,
                    })
                    .collect(),
                outer_label: None,
                curves: None,
            }
        }
    }

    fn format_value(value: Option<f64>) -> String {
        value.map_or_else(String::new, |v| v.to_string())
    }

    fn sample_rows(result: &SweepResult) -> impl Iterator<Item = Vec<String>> + '_ {
        let names = result.spec.measurement_names();
        result.samples.iter().map(move |sample| {
            let mut row = vec![sample.index.to_string(), sample.stimulus.to_string()];
            row.extend(names.iter().map(|name| format_value(sample.value(name))));
            row
        })
    }

    fn header(result: &SweepResult) -> Vec<String> {
        ["index", "stimulus"]
            .into_iter()
            .chain(result.spec.measurement_names())
            .map(str::to_string)
            .collect()
    }

    fn create(path: &Path, metadata: &SweepMetadata<'_>) -> AppResult<csv::Writer<File>> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = File::create(path)?;

        let json_string = serde_json::to_string_pretty(metadata)?;
        for line in json_string.lines() {
            file.write_all(b"# ")
                .and_then(|_| file.write_all(line.as_bytes()))
                .and_then(|_| file.write_all(b"\n"))?;
        }

        Ok(csv::Writer::from_writer(file))
    }

    /// Write one sweep as CSV
    pub fn write_csv(result: &SweepResult, path: &Path) -> AppResult<()> {
        let mut writer = create(path, &SweepMetadata::new(result))?;
        writer.write_record(header(result))?;
        for row in sample_rows(result) {
            writer.write_record(&row)?;
        }
        writer.flush()?;
        info!(path = %path.display(), samples = result.len(), "CSV written");
        Ok(())
    }

    /// Write a curve family as CSV, one block of rows per curve
    ///
    /// The first column holds the outer value of the row's curve.
    pub fn write_family_csv(family: &FamilyResult, path: &Path) -> AppResult<()> {
        let empty;
        let template = match family.curves.first() {
            Some(first) => &first.result,
            None => {
                empty = SweepResult::empty(family.inner.clone());
                &empty
            }
        };

        let mut metadata = SweepMetadata::new(template);
        metadata.outer_label = Some(&family.outer_label);
        metadata.curves = Some(family.curves.len());
        metadata.samples = family.curves.iter().map(|c| c.result.len()).sum();
        metadata.failures = family.curves.iter().map(|c| c.result.failures().len()).sum();

        let mut writer = create(path, &metadata)?;
        let mut columns = vec!["outer".to_string()];
        columns.extend(header(template));
        writer.write_record(&columns)?;

        for curve in &family.curves {
            for row in sample_rows(&curve.result) {
                let mut record = vec![curve.outer.to_string()];
                record.extend(row);
                writer.write_record(&record)?;
            }
        }
        writer.flush()?;
        info!(path = %path.display(), curves = family.curves.len(), "family CSV written");
        Ok(())
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use crate::error::DaqError;

    /// Write one sweep as CSV
    pub fn write_csv(_result: &SweepResult, _path: &Path) -> AppResult<()> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }

    /// Write a curve family as CSV
    pub fn write_family_csv(_family: &FamilyResult, _path: &Path) -> AppResult<()> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::{write_csv, write_family_csv};

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::{write_csv, write_family_csv};

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use crate::error::MeasurementError;
    use crate::sweep::{Curve, Measurement, Reading, Sample, StimulusCommands, SweepSpec};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn result() -> SweepResult {
        let spec = SweepSpec::new(
            vec![0.0, 0.2, 0.4],
            Duration::from_millis(750),
            StimulusCommands::new("VOLT {value}", "OUTP ON", "OUTP OFF"),
        )
        .with_measurement(Measurement::new("voltage", "dmm", "MEAS:VOLT:DC?"))
        .with_measurement(Measurement::new("current", "psu", "MEAS:CURR?"));

        let samples = [(0.0, Some(0.0)), (0.2, Some(0.041)), (0.4, None)]
            .into_iter()
            .enumerate()
            .map(|(index, (stimulus, voltage))| Sample {
                index,
                stimulus,
                readings: BTreeMap::from([
                    (
                        "voltage".to_string(),
                        voltage.map_or(
                            Reading::Failed(MeasurementError::Parse {
                                reply: "ERR".to_string(),
                            }),
                            Reading::Value,
                        ),
                    ),
                    ("current".to_string(), Reading::Value(0.5)),
                ]),
            })
            .collect();
        SweepResult::new(spec, samples)
    }

    fn data_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| !l.starts_with("# "))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_csv_layout_with_failed_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/iv.csv");
        write_csv(&result(), &path).unwrap();

        assert_eq!(
            data_lines(&path),
            vec![
                "index,stimulus,voltage,current",
                "0,0,0,0.5",
                "1,0.2,0.041,0.5",
                "2,0.4,,0.5",
            ]
        );
    }

    #[test]
    fn test_csv_metadata_header_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iv.csv");
        write_csv(&result(), &path).unwrap();

        let json: String = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .filter_map(|l| l.strip_prefix("# "))
            .collect::<Vec<_>>()
            .join("\n");
        let metadata: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(metadata["points"], 3);
        assert_eq!(metadata["failures"], 1);
        assert_eq!(metadata["settle_ms"], 750);
        assert_eq!(metadata["measurements"][0]["query"], "MEAS:VOLT:DC?");
    }

    #[test]
    fn test_family_csv_prefixes_outer_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("family.csv");
        let family = FamilyResult {
            outer_label: "Ib (A)".to_string(),
            inner: result().spec,
            curves: vec![
                Curve { outer: 0.0, result: result() },
                Curve { outer: 1e-5, result: result() },
            ],
        };
        write_family_csv(&family, &path).unwrap();

        let lines = data_lines(&path);
        assert_eq!(lines[0], "outer,index,stimulus,voltage,current");
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[4], "0.00001,0,0,0,0.5");
    }

    #[test]
    fn test_empty_family_csv_creates_directory_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/family.csv");
        write_family_csv(&FamilyResult::new("Ib (A)", result().spec), &path).unwrap();

        assert_eq!(data_lines(&path), vec!["outer,index,stimulus,voltage,current"]);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("#   \"outer_label\": \"Ib (A)\""));
        assert!(contents.contains("#   \"curves\": 0"));
    }
}
