//! Telemetry sources.
//!
//! The pipeline only needs an ordered slice of samples; [`TelemetryStore`] is the seam
//! that produces one for a requested time window. [`FileStore`] backs it with CSV or
//! JSON exports.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{LapError, Sample};

/// Which slice of telemetry to load.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SampleWindow {
    /// Everything at or after the given instant.
    Since(DateTime<Utc>),
    /// The trailing number of hours before `now`.
    LastHours(f64),
}

impl SampleWindow {
    /// Inclusive lower bound of the window.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            SampleWindow::Since(from) => from,
            SampleWindow::LastHours(hours) => {
                // clamped values are already past the representable calendar range
                let ms = (hours * 3_600_000.0).round().clamp(-1e17, 1e17) as i64;
                now.checked_sub_signed(Duration::milliseconds(ms))
                    .unwrap_or(if ms > 0 {
                        DateTime::<Utc>::MIN_UTC
                    } else {
                        DateTime::<Utc>::MAX_UTC
                    })
            }
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        timestamp >= self.start(now)
    }
}

pub trait TelemetryStore {
    /// Samples inside `window`, ascending by timestamp.
    ///
    /// An empty window is `Ok(vec![])`; any failure to query is an error.
    fn fetch(&self, window: &SampleWindow, now: DateTime<Utc>) -> Result<Vec<Sample>, LapError>;
}

/// Decode samples from bytes using the provided format hint (extension or file name).
pub fn parse_samples(input: &[u8], format: &str) -> Result<Vec<Sample>, LapError> {
    let format_lc = format.to_ascii_lowercase();
    if format_lc.ends_with(".csv") || format_lc == "csv" {
        parse_csv_samples(input)
    } else if format_lc.ends_with(".json") || format_lc == "json" {
        serde_json::from_slice(input).map_err(|e| LapError::DataSourceFailure(e.to_string()))
    } else {
        Err(LapError::UnsupportedFormat(format.to_string()))
    }
}

fn parse_csv_samples(input: &[u8]) -> Result<Vec<Sample>, LapError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);
    reader
        .deserialize()
        .enumerate()
        .map(|(row, record)| {
            record.map_err(|e| LapError::DataSourceFailure(format!("row {}: {}", row + 1, e)))
        })
        .collect()
}

/// Samples exported to one or more CSV/JSON files.
#[derive(Clone, Debug)]
pub struct FileStore {
    paths: Vec<PathBuf>,
}

impl FileStore {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    fn load_file(path: &Path) -> Result<Vec<Sample>, LapError> {
        let data = fs::read(path).map_err(|e| {
            LapError::DataSourceFailure(format!("failed to read {}: {}", path.display(), e))
        })?;
        let hint = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("csv");
        parse_samples(&data, hint).map_err(|e| match e {
            LapError::DataSourceFailure(msg) => {
                LapError::DataSourceFailure(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }
}

impl TelemetryStore for FileStore {
    fn fetch(&self, window: &SampleWindow, now: DateTime<Utc>) -> Result<Vec<Sample>, LapError> {
        if self.paths.is_empty() {
            return Err(LapError::DataSourceFailure("no telemetry files configured".into()));
        }

        let per_file = self
            .paths
            .par_iter()
            .map(|path| Self::load_file(path))
            .collect::<Result<Vec<_>, _>>()?;

        let total: usize = per_file.iter().map(Vec::len).sum();
        let mut samples: Vec<Sample> = per_file
            .into_iter()
            .flatten()
            .filter(|s| window.contains(s.timestamp, now))
            .collect();
        samples.sort_by_key(|s| s.timestamp);

        debug!(files = self.paths.len(), decoded = total, "telemetry files decoded");
        info!(
            "Loaded {} samples since {}",
            samples.len(),
            window.start(now).to_rfc3339()
        );
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    const CSV: &str = "\
timestamp,latitude,longitude,odometer_km,battery_level_pct,ideal_range_km,est_range_km,rated_range_km,inside_temp,outside_temp
2024-05-01T10:10:00Z,48.0,11.0,110.0,70,290,260,270,21.0,
2024-05-01T10:00:00Z,48.0,11.0,100.0,80,320,290,300,20.5,14.0
2024-04-30T08:00:00Z,48.0,11.0,90.0,90,350,320,330,,
";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_csv_with_missing_temperatures() {
        let samples = parse_samples(CSV.as_bytes(), "csv").unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].inside_temp, Some(21.0));
        assert_eq!(samples[0].outside_temp, None);
        assert_eq!(samples[2].inside_temp, None);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let err = parse_samples(b"", "telemetry.parquet").unwrap_err();
        assert!(matches!(err, LapError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_window_start() {
        assert_eq!(
            SampleWindow::LastHours(24.0).start(now()),
            Utc.with_ymd_and_hms(2024, 4, 30, 12, 0, 0).unwrap()
        );
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(SampleWindow::Since(from).start(now()), from);
    }

    #[test]
    fn test_window_past_calendar_range_saturates() {
        assert_eq!(
            SampleWindow::LastHours(1e10).start(now()),
            DateTime::<Utc>::MIN_UTC
        );
        assert_eq!(
            SampleWindow::LastHours(f64::INFINITY).start(now()),
            DateTime::<Utc>::MIN_UTC
        );
    }

    #[test]
    fn test_file_store_with_huge_window_loads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "samples.csv", CSV);
        let store = FileStore::new(vec![path]);
        let samples = store.fetch(&SampleWindow::LastHours(1e10), now()).unwrap();
        assert_eq!(samples.len(), 3);
    }

    #[test]
    fn test_file_store_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "samples.csv", CSV);
        let store = FileStore::new(vec![path]);

        let samples = store.fetch(&SampleWindow::LastHours(24.0), now()).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].timestamp < samples[1].timestamp);
        assert_eq!(samples[0].odometer_km, 100.0);
    }

    #[test]
    fn test_file_store_merges_json_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = write_file(&dir, "a.csv", CSV);
        let json = serde_json::to_string(&[Sample {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap(),
            latitude: 48.1,
            longitude: 11.1,
            odometer_km: 105.0,
            battery_level_pct: 75.0,
            ideal_range_km: 305.0,
            est_range_km: 275.0,
            rated_range_km: 285.0,
            inside_temp: None,
            outside_temp: None,
        }])
        .unwrap();
        let json_path = write_file(&dir, "b.json", &json);

        let store = FileStore::new(vec![csv_path, json_path]);
        let samples = store.fetch(&SampleWindow::LastHours(24.0), now()).unwrap();
        let odo: Vec<f64> = samples.iter().map(|s| s.odometer_km).collect();
        assert_eq!(odo, vec![100.0, 105.0, 110.0]);
    }

    #[test]
    fn test_empty_window_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "samples.csv", CSV);
        let store = FileStore::new(vec![path]);
        let samples = store.fetch(&SampleWindow::LastHours(0.5), now()).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_missing_file_is_a_source_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(vec![dir.path().join("absent.csv")]);
        let err = store.fetch(&SampleWindow::LastHours(24.0), now()).unwrap_err();
        assert!(matches!(err, LapError::DataSourceFailure(_)));
    }

    #[test]
    fn test_malformed_row_is_a_source_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "bad.csv",
            "timestamp,latitude\nnot-a-time,48.0\n",
        );
        let store = FileStore::new(vec![path]);
        let err = store.fetch(&SampleWindow::LastHours(24.0), now()).unwrap_err();
        assert!(matches!(err, LapError::DataSourceFailure(_)));
    }
}
