use std::io::Write;

use anyhow::Result;
use lapseg::LapSummary;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const COLUMNS: [&str; 20] = [
    "id",
    "start_time",
    "end_time",
    "duration",
    "distance_km",
    "avg_speed_kmh",
    "odometer_km",
    "soc_pct",
    "soc_delta_pct",
    "range_ideal_km",
    "range_ideal_delta_km",
    "range_est_km",
    "range_est_delta_km",
    "range_rated_km",
    "range_rated_delta_km",
    "energy_consumed_kwh",
    "energy_per_hour_kwh",
    "energy_remaining_kwh",
    "inside_temp",
    "outside_temp",
];

/// `H:MM:SS`, rounded to the nearest second.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

fn fixed(value: f64) -> String {
    format!("{:.2}", value)
}

fn optional(value: Option<f64>) -> String {
    value.map(fixed).unwrap_or_default()
}

fn row(summary: &LapSummary) -> [String; 20] {
    [
        summary.id.clone(),
        summary.start_time.format(TIME_FORMAT).to_string(),
        summary.end_time.format(TIME_FORMAT).to_string(),
        format_duration(summary.duration_s),
        fixed(summary.distance_km),
        fixed(summary.avg_speed_kmh),
        fixed(summary.odometer_km),
        fixed(summary.soc_pct),
        fixed(summary.soc_delta_pct),
        fixed(summary.range_ideal_km),
        fixed(summary.range_ideal_delta_km),
        fixed(summary.range_est_km),
        fixed(summary.range_est_delta_km),
        fixed(summary.range_rated_km),
        fixed(summary.range_rated_delta_km),
        fixed(summary.energy_consumed_kwh),
        fixed(summary.energy_per_hour_kwh),
        fixed(summary.energy_remaining_kwh),
        optional(summary.inside_temp),
        optional(summary.outside_temp),
    ]
}

pub fn write_csv<W: Write>(summaries: &[LapSummary], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(COLUMNS)?;
    for summary in summaries {
        writer.write_record(row(summary))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_html<W: Write>(summaries: &[LapSummary], mut out: W) -> Result<()> {
    writeln!(out, "<table>")?;
    writeln!(out, "  <thead>")?;
    write!(out, "    <tr>")?;
    for column in COLUMNS {
        write!(out, "<th>{}</th>", column)?;
    }
    writeln!(out, "</tr>")?;
    writeln!(out, "  </thead>")?;
    writeln!(out, "  <tbody>")?;
    for summary in summaries {
        write!(out, "    <tr>")?;
        for cell in row(summary) {
            write!(out, "<td>{}</td>", escape_html(&cell))?;
        }
        writeln!(out, "</tr>")?;
    }
    writeln!(out, "  </tbody>")?;
    writeln!(out, "</table>")?;
    out.flush()?;
    Ok(())
}

pub fn write_json<W: Write>(summaries: &[LapSummary], mut out: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, summaries)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
