use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use lapseg::{
    compute_laps, reference_distances, relative_times, FileStore, LapReport, OutputFormat, Params,
    Sample, TelemetryStore,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod render;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lap segmentation for vehicle telemetry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a telemetry window into laps and render per-lap summaries
    Laps(LapsArgs),
    /// Report per-sample distance to the reference point and the detected boundaries
    Crossings(CrossingsArgs),
}

#[derive(Parser, Debug)]
struct WindowArgs {
    /// CSV/JSON telemetry exports to read
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// JSON file with default parameters (flags override it)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Reference latitude (defaults to the sample at --start-index)
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Reference longitude (defaults to the sample at --start-index)
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Region radius in meters [default: 100]
    #[arg(long)]
    radius: Option<f64>,

    /// Minimum dwell inside the region before an exit counts (seconds) [default: 0]
    #[arg(long)]
    min_dwell: Option<f64>,

    /// Sample index anchoring the scan [default: 0]
    #[arg(long)]
    start_index: Option<usize>,

    /// Hours of telemetry before now to load [default: 24]
    #[arg(long)]
    hours: Option<f64>,

    /// Load telemetry from this time onwards (RFC 3339 or `YYYY-MM-DD HH:MM[:SS]`)
    #[arg(long)]
    from: Option<String>,

    /// Display timezone offset (`local`, `UTC`, `+02:00`, ...) [default: local]
    #[arg(long, allow_hyphen_values = true)]
    timezone: Option<String>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct LapsArgs {
    #[command(flatten)]
    window: WindowArgs,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    summary: SummaryArgs,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct SummaryArgs {
    /// Output format [default: html]
    #[arg(long, value_enum)]
    format: Option<FormatOpt>,

    /// First lap (1-based) to merge [default: 1]
    #[arg(long)]
    merge_from: Option<usize>,

    /// Number of consecutive laps merged into one [default: 1]
    #[arg(long)]
    merge_size: Option<usize>,

    /// Nominal consumption in kWh per 100 km [default: 14.7]
    #[arg(long, allow_hyphen_values = true)]
    consumption: Option<f64>,
}

#[derive(Parser, Debug)]
struct CrossingsArgs {
    #[command(flatten)]
    window: WindowArgs,

    /// Output report path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FormatOpt {
    Html,
    Csv,
    Json,
}

impl From<FormatOpt> for OutputFormat {
    fn from(value: FormatOpt) -> Self {
        match value {
            FormatOpt::Html => OutputFormat::Html,
            FormatOpt::Csv => OutputFormat::Csv,
            FormatOpt::Json => OutputFormat::Json,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Laps(args) => args.window.verbose,
        Command::Crossings(args) => args.window.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Laps(args) => handle_laps(args),
        Command::Crossings(args) => handle_crossings(args),
    }
}

fn load_params(path: Option<&Path>) -> Result<Params> {
    let Some(path) = path else {
        return Ok(Params::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Config file, then flag overrides, then validation. Runs before any telemetry is read.
fn build_params(window: &WindowArgs, summary: Option<&SummaryArgs>) -> Result<Params> {
    let mut params = load_params(window.config.as_deref())?;
    if window.lat.is_some() != window.lon.is_some() {
        return Err(anyhow!("--lat and --lon must be given together"));
    }
    if let (Some(lat), Some(lon)) = (window.lat, window.lon) {
        params.reference_latitude = Some(lat);
        params.reference_longitude = Some(lon);
    }
    if let Some(radius) = window.radius {
        params.radius_m = radius;
    }
    if let Some(dwell) = window.min_dwell {
        params.min_dwell_s = dwell;
    }
    if let Some(index) = window.start_index {
        params.start_index = index;
    }
    if let Some(hours) = window.hours {
        params.hours_before_now = hours;
    }
    if let Some(from) = window.from.as_ref() {
        params.from_time = Some(from.clone());
    }
    if let Some(tz) = window.timezone.as_ref() {
        params.display_timezone = tz.clone();
    }
    if let Some(summary) = summary {
        if let Some(format) = summary.format {
            params.output_format = format.into();
        }
        if let Some(merge_from) = summary.merge_from {
            params.merge_from = merge_from;
        }
        if let Some(merge_size) = summary.merge_size {
            params.merge_size = merge_size;
        }
        if let Some(rate) = summary.consumption {
            params.consumption_rate_kwh_per_100km = rate;
        }
    }
    params.validate()?;
    Ok(params)
}

fn fetch_samples(window: &WindowArgs, params: &Params) -> Result<Vec<Sample>> {
    let store = FileStore::new(window.inputs.clone());
    let samples = store.fetch(&params.window()?, Utc::now())?;
    if samples.is_empty() {
        warn!("No telemetry in the requested window");
    }
    Ok(samples)
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufWriter::new(io::stdout().lock())));
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}

fn handle_laps(args: LapsArgs) -> Result<()> {
    let params = build_params(&args.window, Some(&args.summary))?;

    let t_fetch = Instant::now();
    let samples = fetch_samples(&args.window, &params)?;
    if args.profile || args.window.verbose {
        info!(
            "Fetch stage: {:.1} ms ({} samples)",
            t_fetch.elapsed().as_secs_f64() * 1000.0,
            samples.len()
        );
    }

    let t_compute = Instant::now();
    let report = compute_laps(&samples, &params)?;
    if args.profile || args.window.verbose {
        info!(
            "Compute stage: {:.1} ms ({} laps)",
            t_compute.elapsed().as_secs_f64() * 1000.0,
            report.summaries.len()
        );
    }
    if report.skipped > 0 {
        warn!(
            "Skipped {} lap(s) with zero elapsed time",
            report.skipped
        );
    }

    let out = open_output(&args.output)?;
    match params.output_format {
        OutputFormat::Csv => render::write_csv(&report.summaries, out)?,
        OutputFormat::Html => render::write_html(&report.summaries, out)?,
        OutputFormat::Json => render::write_json(&report.summaries, out)?,
    }
    if args.output.as_os_str() != "-" {
        info!("Wrote {} laps: {}", report.summaries.len(), args.output.display());
    }
    Ok(())
}

fn handle_crossings(args: CrossingsArgs) -> Result<()> {
    let params = build_params(&args.window, None)?;
    let samples = fetch_samples(&args.window, &params)?;
    let report = compute_laps(&samples, &params)?;
    let text = crossing_report(&samples, &params, &report)?;

    let mut out = open_output(&args.output)?;
    out.write_all(text.as_bytes())
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    out.flush()?;
    if args.output.as_os_str() != "-" {
        info!("Crossing report written: {}", args.output.display());
    }
    Ok(())
}

fn crossing_report(samples: &[Sample], params: &Params, report: &LapReport) -> Result<String> {
    let reference = report.reference;
    let offset = params.display_offset()?;
    let distances = reference_distances(samples, reference);
    let times = relative_times(samples);

    let mut text = String::new();
    text.push_str(&format!(
        "reference: {:.6},{:.6}\n",
        reference.latitude, reference.longitude
    ));
    text.push_str(&format!(
        "radius_m: {:.1}  min_dwell_s: {:.1}  start_index: {}\n",
        params.radius_m, params.min_dwell_s, params.start_index
    ));
    text.push_str(&format!("samples: {}\n", samples.len()));
    text.push_str(&format!("boundaries: {:?}\n\n", report.boundaries));

    text.push_str("index  time                 offset_s  distance_m  region\n");
    for (i, sample) in samples.iter().enumerate() {
        let region = if distances[i] < params.radius_m {
            "inside"
        } else if distances[i] > params.radius_m {
            "outside"
        } else {
            "edge"
        };
        let marker = if report.boundaries.contains(&i) {
            "  <- lap start"
        } else {
            ""
        };
        text.push_str(&format!(
            "{:>5}  {}  {:>8.0}  {:>10.1}  {}{}\n",
            i,
            sample
                .timestamp
                .with_timezone(&offset)
                .format("%Y-%m-%d %H:%M:%S"),
            times[i],
            distances[i],
            region,
            marker
        ));
    }

    if !report.laps.is_empty() {
        text.push_str("\nlaps:\n");
        for lap in &report.laps {
            text.push_str(&format!(
                "  {}: {}..={}\n",
                lap.label, lap.start_index, lap.end_index
            ));
        }
    }
    Ok(text)
}
