//! Lap segmentation and energy summaries for geotagged vehicle telemetry.
//!
//! A lap is the stretch between two successive passes through a circular region around
//! a reference point. [`compute_laps`] detects those passes, optionally merges runs of
//! laps, and derives distance, speed and consumption figures for each one.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod aggregate;
pub mod detect;
pub mod geodesic;
pub mod store;
pub mod summary;

pub use aggregate::aggregate_laps;
pub use detect::{
    build_laps, detect_boundaries, detect_laps, reference_distances, relative_times,
    DetectorConfig, LapRange, RegionState,
};
pub use geodesic::{geodesic_distance, ReferencePoint};
pub use store::{parse_samples, FileStore, SampleWindow, TelemetryStore};
pub use summary::{summarize_lap, LapSummary, SummaryConfig};

#[derive(Error, Debug)]
pub enum LapError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("lap {label} ({start_index}..={end_index}) has no elapsed time")]
    DegenerateLap {
        label: String,
        start_index: usize,
        end_index: usize,
    },
    #[error("lap {label} ({start_index}..={end_index}) is outside {len} samples")]
    LapOutOfBounds {
        label: String,
        start_index: usize,
        end_index: usize,
        len: usize,
    },
    #[error("telemetry source failed: {0}")]
    DataSourceFailure(String),
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
}

/// One telemetry reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub odometer_km: f64,
    pub battery_level_pct: f64,
    pub ideal_range_km: f64,
    pub est_range_km: f64,
    pub rated_range_km: f64,
    #[serde(default)]
    pub inside_temp: Option<f64>,
    #[serde(default)]
    pub outside_temp: Option<f64>,
}

impl Sample {
    pub fn position(&self) -> ReferencePoint {
        ReferencePoint::new(self.latitude, self.longitude)
    }
}

/// How lap summaries are rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Html,
    Csv,
    Json,
}

/// Longest trailing window accepted for `hours_before_now` (100 years).
pub const MAX_HOURS_BEFORE_NOW: f64 = 100.0 * 365.25 * 24.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub reference_latitude: Option<f64>,
    pub reference_longitude: Option<f64>,
    pub radius_m: f64,
    pub min_dwell_s: f64,
    pub start_index: usize,
    pub merge_from: usize,
    pub merge_size: usize,
    pub consumption_rate_kwh_per_100km: f64,
    pub hours_before_now: f64,
    pub from_time: Option<String>,
    pub display_timezone: String,
    pub output_format: OutputFormat,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            reference_latitude: None,
            reference_longitude: None,
            radius_m: 100.0,
            min_dwell_s: 0.0,
            start_index: 0,
            merge_from: 1,
            merge_size: 1,
            consumption_rate_kwh_per_100km: 14.7,
            hours_before_now: 24.0,
            from_time: None,
            display_timezone: "local".to_string(),
            output_format: OutputFormat::Html,
        }
    }
}

impl Params {
    /// Check every setting that does not depend on the samples.
    pub fn validate(&self) -> Result<(), LapError> {
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(invalid(format!("radius_m must be > 0, got {}", self.radius_m)));
        }
        if !self.min_dwell_s.is_finite() || self.min_dwell_s < 0.0 {
            return Err(invalid(format!(
                "min_dwell_s must be >= 0, got {}",
                self.min_dwell_s
            )));
        }
        if self.merge_from < 1 {
            return Err(invalid("merge_from is 1-based and must be >= 1".into()));
        }
        if self.merge_size < 1 {
            return Err(invalid("merge_size must be >= 1".into()));
        }
        let rate = self.consumption_rate_kwh_per_100km;
        if !rate.is_finite() || rate < 0.0 {
            return Err(invalid(format!(
                "consumption_rate_kwh_per_100km must be >= 0, got {}",
                rate
            )));
        }
        if let Some(lat) = self.reference_latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(invalid(format!("reference_latitude {} out of range", lat)));
            }
        }
        if let Some(lon) = self.reference_longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(invalid(format!("reference_longitude {} out of range", lon)));
            }
        }
        self.display_offset()?;
        self.window()?;
        Ok(())
    }

    /// Explicit reference point, when both coordinates are configured.
    pub fn explicit_reference(&self) -> Option<ReferencePoint> {
        match (self.reference_latitude, self.reference_longitude) {
            (Some(lat), Some(lon)) => Some(ReferencePoint::new(lat, lon)),
            _ => None,
        }
    }

    pub fn display_offset(&self) -> Result<FixedOffset, LapError> {
        parse_utc_offset(&self.display_timezone)
    }

    /// Telemetry window to request. `from_time` wins over `hours_before_now`.
    pub fn window(&self) -> Result<SampleWindow, LapError> {
        if let Some(from) = self.from_time.as_deref() {
            let offset = self.display_offset()?;
            return parse_from_time(from, &offset).map(SampleWindow::Since);
        }
        let hours = self.hours_before_now;
        if !hours.is_finite() || hours <= 0.0 || hours > MAX_HOURS_BEFORE_NOW {
            return Err(invalid(format!(
                "hours_before_now must be in (0, {}], got {}",
                MAX_HOURS_BEFORE_NOW, hours
            )));
        }
        Ok(SampleWindow::LastHours(self.hours_before_now))
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            radius_m: self.radius_m,
            min_dwell_s: self.min_dwell_s,
            start_index: self.start_index,
        }
    }

    pub fn summary_config(&self) -> Result<SummaryConfig, LapError> {
        Ok(SummaryConfig {
            consumption_rate_kwh_per_100km: self.consumption_rate_kwh_per_100km,
            display_offset: self.display_offset()?,
        })
    }
}

fn invalid(msg: String) -> LapError {
    LapError::InvalidConfiguration(msg)
}

/// Parse `UTC`, `Z`, `local`, `+HH:MM`, `+HHMM` or `+HH` (and `-` variants).
pub fn parse_utc_offset(input: &str) -> Result<FixedOffset, LapError> {
    let trimmed = input.trim();
    let bad = || invalid(format!("unrecognised timezone offset '{}'", input));
    match trimmed.to_ascii_lowercase().as_str() {
        "utc" | "z" | "gmt" => return FixedOffset::east_opt(0).ok_or_else(bad),
        "local" => return Ok(Local::now().offset().fix()),
        _ => {}
    }

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(bad()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().map_err(|_| bad())?, 0),
        4 => (
            digits[..2].parse::<i32>().map_err(|_| bad())?,
            digits[2..].parse::<i32>().map_err(|_| bad())?,
        ),
        _ => return Err(bad()),
    };
    if hours > 23 || minutes > 59 {
        return Err(bad());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(bad)
}

/// Parse an RFC 3339 instant, or a naive `YYYY-MM-DD HH:MM[:SS]` in `offset`.
pub fn parse_from_time(input: &str, offset: &FixedOffset) -> Result<DateTime<Utc>, LapError> {
    let trimmed = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            if let Some(local) = offset.from_local_datetime(&naive).single() {
                return Ok(local.with_timezone(&Utc));
            }
        }
    }
    Err(invalid(format!("unrecognised from_time '{}'", input)))
}

/// Resolve the reference point once, before any sample is scanned.
pub fn resolve_reference(samples: &[Sample], params: &Params) -> Result<ReferencePoint, LapError> {
    if let Some(reference) = params.explicit_reference() {
        return Ok(reference);
    }
    if params.reference_latitude.is_some() || params.reference_longitude.is_some() {
        warn!("only one reference coordinate configured; deriving from samples");
    }
    samples
        .get(params.start_index)
        .map(Sample::position)
        .ok_or_else(|| {
            invalid(format!(
                "no reference point: none configured and no sample at index {} ({} samples)",
                params.start_index,
                samples.len()
            ))
        })
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LapReport {
    pub reference: ReferencePoint,
    pub boundaries: Vec<usize>,
    pub laps: Vec<LapRange>,
    pub summaries: Vec<LapSummary>,
    /// Laps dropped because their boundary samples share a timestamp.
    pub skipped: usize,
}

/// Detect, merge and summarize laps over one ordered sample window.
pub fn compute_laps(samples: &[Sample], params: &Params) -> Result<LapReport, LapError> {
    params.validate()?;
    let reference = resolve_reference(samples, params)?;
    let summary_config = params.summary_config()?;

    let (boundaries, raw) = detect_laps(samples, reference, &params.detector_config());
    debug!(
        boundaries = boundaries.len(),
        "reference {:.6},{:.6} radius {} m",
        reference.latitude,
        reference.longitude,
        params.radius_m
    );

    let laps = aggregate_laps(&raw, params.merge_from, params.merge_size);

    let mut summaries = Vec::with_capacity(laps.len());
    let mut skipped = 0usize;
    for lap in &laps {
        match summarize_lap(samples, lap, &summary_config) {
            Ok(summary) => summaries.push(summary),
            Err(err @ LapError::DegenerateLap { .. }) => {
                debug!("skipping lap: {}", err);
                skipped += 1;
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        "Detected {} raw laps, {} after merging, {} summarized, {} skipped",
        raw.len(),
        laps.len(),
        summaries.len(),
        skipped
    );

    Ok(LapReport {
        reference,
        boundaries,
        laps,
        summaries,
        skipped,
    })
}
