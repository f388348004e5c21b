//! Region-crossing detection and raw lap construction.
//!
//! The scan walks the distance series once, tracking whether the vehicle is parked in
//! the reference region. A boundary is emitted when the vehicle leaves the region after
//! dwelling in it for longer than the configured minimum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::geodesic::{geodesic_distance, ReferencePoint};
use super::Sample;

/// Inclusive index range into the sample sequence, labelled by lap ordinal.
///
/// Raw laps carry `"1"`, `"2"`, ...; merged laps carry `"<first>-<last>"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LapRange {
    pub label: String,
    pub start_index: usize,
    pub end_index: usize,
}

impl LapRange {
    pub fn new(label: impl Into<String>, start_index: usize, end_index: usize) -> Self {
        Self {
            label: label.into(),
            start_index,
            end_index,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionState {
    Outside,
    Tracking { since: usize },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorConfig {
    pub radius_m: f64,
    pub min_dwell_s: f64,
    pub start_index: usize,
}

/// Distance from every sample to the reference point, in meters.
pub fn reference_distances(samples: &[Sample], reference: ReferencePoint) -> Vec<f64> {
    samples
        .iter()
        .map(|s| {
            geodesic_distance(
                s.latitude,
                s.longitude,
                reference.latitude,
                reference.longitude,
            )
        })
        .collect()
}

/// Seconds elapsed since the first sample, for each sample.
pub fn relative_times(samples: &[Sample]) -> Vec<f64> {
    let Some(base) = samples.first().map(|s| s.timestamp) else {
        return Vec::new();
    };
    samples.iter().map(|s| seconds_between(base, s.timestamp)).collect()
}

pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Scan a distance series and return the indices at which laps begin.
///
/// `distances` and `times` must have equal length. Samples before `start_index` are
/// ignored; the sample at `start_index` only seeds the scan.
pub fn detect_boundaries(
    distances: &[f64],
    times: &[f64],
    config: &DetectorConfig,
) -> Vec<usize> {
    let len = distances.len().min(times.len());
    let mut boundaries = Vec::new();
    if config.start_index >= len {
        return boundaries;
    }

    let radius = config.radius_m;
    let mut state = RegionState::Tracking {
        since: config.start_index,
    };

    for i in (config.start_index + 1)..len {
        if distances[i] < radius && distances[i - 1] >= radius {
            state = RegionState::Tracking { since: i };
        }

        if let RegionState::Tracking { since } = state {
            if distances[i] > radius {
                let dwell = times[i] - times[since];
                if dwell > config.min_dwell_s {
                    boundaries.push(since);
                } else {
                    debug!(since, exit = i, dwell_s = dwell, "discarding short dwell");
                }
                state = RegionState::Outside;
            }
        }
    }

    boundaries
}

/// Turn boundary indices into contiguous laps that share their boundary samples.
pub fn build_laps(boundaries: &[usize], sample_count: usize) -> Vec<LapRange> {
    if sample_count == 0 {
        return Vec::new();
    }
    let last_index = sample_count - 1;
    boundaries
        .iter()
        .enumerate()
        .map(|(k, &start)| {
            let end = boundaries.get(k + 1).copied().unwrap_or(last_index);
            LapRange::new((k + 1).to_string(), start, end)
        })
        .collect()
}

/// Run detection over samples against a resolved reference point.
pub fn detect_laps(
    samples: &[Sample],
    reference: ReferencePoint,
    config: &DetectorConfig,
) -> (Vec<usize>, Vec<LapRange>) {
    let distances = reference_distances(samples, reference);
    let times = relative_times(samples);
    let boundaries = detect_boundaries(&distances, &times, config);
    let laps = build_laps(&boundaries, samples.len());
    (boundaries, laps)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISTANCES: [f64; 6] = [0.0, 80.0, 20.0, 80.0, 20.0, 80.0];
    const TIMES: [f64; 6] = [0.0, 10.0, 20.0, 30.0, 40.0, 50.0];

    fn config(radius_m: f64, min_dwell_s: f64) -> DetectorConfig {
        DetectorConfig {
            radius_m,
            min_dwell_s,
            start_index: 0,
        }
    }

    #[test]
    fn test_alternating_passes_emit_every_entry() {
        let boundaries = detect_boundaries(&DISTANCES, &TIMES, &config(50.0, 5.0));
        assert_eq!(boundaries, vec![0, 2, 4]);

        let laps = build_laps(&boundaries, DISTANCES.len());
        let spans: Vec<_> = laps.iter().map(|l| (l.start_index, l.end_index)).collect();
        assert_eq!(spans, vec![(0, 2), (2, 4), (4, 5)]);
        let labels: Vec<_> = laps.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_short_dwells_are_debounced() {
        let boundaries = detect_boundaries(&DISTANCES, &TIMES, &config(50.0, 15.0));
        assert!(boundaries.is_empty());
        assert!(build_laps(&boundaries, DISTANCES.len()).is_empty());
    }

    #[test]
    fn test_dwell_equal_to_threshold_is_rejected() {
        let boundaries = detect_boundaries(&DISTANCES, &TIMES, &config(50.0, 10.0));
        assert!(boundaries.is_empty());
    }

    #[test]
    fn test_point_on_radius_neither_enters_nor_exits() {
        let distances = [0.0, 50.0, 80.0, 50.0, 20.0, 80.0];
        let boundaries = detect_boundaries(&distances, &TIMES, &config(50.0, 5.0));
        // index 1 sits on the radius so tracking from 0 continues until index 2,
        // and the entry at 4 follows a sample at exactly the radius
        assert_eq!(boundaries, vec![0, 4]);
    }

    #[test]
    fn test_reentry_refreshes_dwell_anchor() {
        // leaves to exactly the radius, comes back, then exits: anchor moves to 3
        let distances = [0.0, 20.0, 50.0, 10.0, 80.0];
        let times = [0.0, 10.0, 20.0, 30.0, 32.0];
        let boundaries = detect_boundaries(&distances, &times, &config(50.0, 5.0));
        assert!(boundaries.is_empty());

        let boundaries = detect_boundaries(&distances, &times, &config(50.0, 1.0));
        assert_eq!(boundaries, vec![3]);
    }

    #[test]
    fn test_start_index_skips_earlier_samples() {
        let cfg = DetectorConfig {
            radius_m: 50.0,
            min_dwell_s: 5.0,
            start_index: 2,
        };
        let boundaries = detect_boundaries(&DISTANCES, &TIMES, &cfg);
        assert_eq!(boundaries, vec![2, 4]);
    }

    #[test]
    fn test_start_index_past_end_yields_nothing() {
        let cfg = DetectorConfig {
            radius_m: 50.0,
            min_dwell_s: 0.0,
            start_index: 10,
        };
        assert!(detect_boundaries(&DISTANCES, &TIMES, &cfg).is_empty());
    }

    #[test]
    fn test_final_lap_may_collapse_to_one_sample() {
        let laps = build_laps(&[0, 3], 4);
        assert_eq!(laps[1], LapRange::new("2", 3, 3));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_boundaries_bounded_and_contiguous(
                distances in proptest::collection::vec(0.0..200.0_f64, 0..64),
                radius in 1.0..150.0_f64,
                min_dwell in 0.0..30.0_f64,
            ) {
                let times: Vec<f64> = (0..distances.len()).map(|i| i as f64 * 5.0).collect();
                let boundaries = detect_boundaries(&distances, &times, &config(radius, min_dwell));
                prop_assert!(boundaries.len() <= distances.len());
                prop_assert!(boundaries.windows(2).all(|w| w[0] < w[1]));

                let laps = build_laps(&boundaries, distances.len());
                prop_assert_eq!(laps.len(), boundaries.len());
                for pair in laps.windows(2) {
                    prop_assert_eq!(pair[0].end_index, pair[1].start_index);
                }
                for lap in &laps {
                    prop_assert!(lap.start_index <= lap.end_index);
                }
            }
        }
    }
}
