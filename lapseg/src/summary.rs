use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::detect::{seconds_between, LapRange};
use super::{LapError, Sample};

/// Derived travel and energy figures for one lap.
///
/// Point-in-time readings (odometer, charge, ranges, temperatures) are taken from the
/// lap's last sample. Deltas are `first - last`, so consumption is positive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LapSummary {
    pub id: String,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub duration_s: f64,
    pub distance_km: f64,
    pub avg_speed_kmh: f64,
    pub odometer_km: f64,
    pub soc_pct: f64,
    pub soc_delta_pct: f64,
    pub range_ideal_km: f64,
    pub range_ideal_delta_km: f64,
    pub range_est_km: f64,
    pub range_est_delta_km: f64,
    pub range_rated_km: f64,
    pub range_rated_delta_km: f64,
    pub energy_consumed_kwh: f64,
    pub energy_per_hour_kwh: f64,
    pub energy_remaining_kwh: f64,
    pub inside_temp: Option<f64>,
    pub outside_temp: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SummaryConfig {
    pub consumption_rate_kwh_per_100km: f64,
    pub display_offset: FixedOffset,
}

/// Summarize a lap from its two boundary samples.
pub fn summarize_lap(
    samples: &[Sample],
    lap: &LapRange,
    config: &SummaryConfig,
) -> Result<LapSummary, LapError> {
    let (first, last) = match (samples.get(lap.start_index), samples.get(lap.end_index)) {
        (Some(first), Some(last)) if lap.start_index <= lap.end_index => (first, last),
        _ => {
            return Err(LapError::LapOutOfBounds {
                label: lap.label.clone(),
                start_index: lap.start_index,
                end_index: lap.end_index,
                len: samples.len(),
            })
        }
    };

    let duration_s = seconds_between(first.timestamp, last.timestamp);
    if duration_s <= 0.0 {
        return Err(LapError::DegenerateLap {
            label: lap.label.clone(),
            start_index: lap.start_index,
            end_index: lap.end_index,
        });
    }

    let kwh_per_km = config.consumption_rate_kwh_per_100km / 100.0;
    let distance_km = last.odometer_km - first.odometer_km;
    let range_rated_delta_km = first.rated_range_km - last.rated_range_km;
    let energy_consumed_kwh = kwh_per_km * range_rated_delta_km;

    Ok(LapSummary {
        id: lap.label.clone(),
        start_time: first.timestamp.with_timezone(&config.display_offset),
        end_time: last.timestamp.with_timezone(&config.display_offset),
        duration_s,
        distance_km,
        avg_speed_kmh: distance_km / duration_s * 3600.0,
        odometer_km: last.odometer_km,
        soc_pct: last.battery_level_pct,
        soc_delta_pct: first.battery_level_pct - last.battery_level_pct,
        range_ideal_km: last.ideal_range_km,
        range_ideal_delta_km: first.ideal_range_km - last.ideal_range_km,
        range_est_km: last.est_range_km,
        range_est_delta_km: first.est_range_km - last.est_range_km,
        range_rated_km: last.rated_range_km,
        range_rated_delta_km,
        energy_consumed_kwh,
        energy_per_hour_kwh: energy_consumed_kwh / duration_s * 3600.0,
        energy_remaining_kwh: kwh_per_km * last.rated_range_km,
        inside_temp: last.inside_temp,
        outside_temp: last.outside_temp,
    })
}
