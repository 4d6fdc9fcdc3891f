//! CLI entry point for the Tricity GTFS-Realtime builder.
//!
//! Provides subcommands for producing the realtime feed once or in a loop,
//! diagnosing matches at a single stop, and inspecting a produced feed.

use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Europe::Warsaw;
use clap::{Args, Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use tristar_rt::{
    alerts::{AlertFeedClient, DEFAULT_ALERTS_URL},
    delays::{DEFAULT_BASE_URL, DelayFeedClient, DelaySource},
    feed::build_feed,
    fetch::BasicClient,
    matcher::{MatchOutcome, match_entry},
    output::{append_record, print_summary, read_feed, record_failure, write_feed},
    pipeline,
    schedule::{ScheduleIndex, StopTimeRow, load_stop_times, service_day},
    stats::{FeedSummary, RunStats},
    tables::IdTables,
    vehicles::{VehicleFeedClient, VehiclePositions},
};

/// Pause used when a build overruns its period.
const OVERRUN_SLEEP: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "tristar_rt")]
#[command(about = "GTFS-Realtime feed for ZTM Gdańsk from the per-stop delay API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DelayArgs {
    /// Base URL of the delay API
    #[arg(long, env = "DELAYS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    delays_url: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 15)]
    timeout: u64,

    /// Attempts per stop when requests time out
    #[arg(long, default_value_t = 3)]
    attempts: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the GTFS-Realtime feed
    Build {
        /// stop_times.txt of the static feed
        #[arg(long, value_name = "PATH")]
        stop_times: String,

        /// tables.json exported with the static feed
        #[arg(long, value_name = "PATH")]
        tables: Option<String>,

        /// Destination of the feed file
        #[arg(short, long = "output-file", default_value = "gtfs-rt.pb")]
        output: String,

        /// Write a human-readable dump instead of binary protobuf
        #[arg(long, default_value_t = false)]
        readable: bool,

        /// Optional: CSV file to append run statistics to
        #[arg(long)]
        stats_file: Option<String>,

        /// Maximum number of concurrent stop requests
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,

        /// Keep rebuilding the feed until interrupted
        #[arg(short = 'l', long = "loop", default_value_t = false)]
        run_loop: bool,

        /// Seconds between builds in loop mode
        #[arg(short, long, default_value_t = 30)]
        period: u64,

        /// Seconds between checks for a changed stop_times.txt in loop mode
        #[arg(long, default_value_t = 1800)]
        schedule_check_period: u64,

        /// URL of the service announcements file
        #[arg(long, env = "ALERTS_URL", default_value = DEFAULT_ALERTS_URL)]
        alerts_url: String,

        /// Leave service alerts out of the feed
        #[arg(long, default_value_t = false)]
        no_alerts: bool,

        /// Leave vehicle positions out of the feed
        #[arg(long, default_value_t = false)]
        no_vehicles: bool,

        #[command(flatten)]
        delays: DelayArgs,
    },
    /// Show how every scheduled arrival at one stop matches live data
    Match {
        /// stop_times.txt of the static feed
        #[arg(long, value_name = "PATH")]
        stop_times: String,

        /// Original (agency) stop number
        #[arg(long)]
        stop: u32,

        #[command(flatten)]
        delays: DelayArgs,
    },
    /// Decode a binary feed file and summarize it
    Inspect {
        #[arg(value_name = "FILE")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/tristar_rt.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("tristar_rt.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            stop_times,
            tables,
            output,
            readable,
            stats_file,
            concurrency,
            run_loop,
            period,
            schedule_check_period,
            alerts_url,
            no_alerts,
            no_vehicles,
            delays,
        } => {
            let tables = match tables {
                Some(path) => IdTables::load(&path)?,
                None => IdTables::default(),
            };
            let http = http_client(&delays)?;
            let source = Arc::new(delay_client(http.clone(), &delays));
            let mut schedule = ScheduleFile::load(&stop_times)?;

            let retry = Duration::from_secs(2);
            let opts = BuildOptions {
                output,
                readable,
                stats_file,
                concurrency,
                alerts: (!no_alerts).then(|| {
                    AlertFeedClient::new(http.clone(), alerts_url).with_retry(delays.attempts, retry)
                }),
                vehicles: (!no_vehicles).then(|| {
                    VehicleFeedClient::new(http.clone(), &delays.delays_url)
                        .with_retry(delays.attempts, retry)
                }),
            };

            if run_loop {
                info!(period, schedule_check_period, "Starting in loop mode");
                build_loop(
                    source,
                    &mut schedule,
                    &tables,
                    &opts,
                    Duration::from_secs(period),
                    Duration::from_secs(schedule_check_period),
                )
                .await?;
            } else {
                build_once(source, &schedule, &tables, &opts).await?;
            }
        }
        Commands::Match {
            stop_times,
            stop,
            delays,
        } => {
            let client = delay_client(http_client(&delays)?, &delays);
            let rows = load_stop_times(&stop_times)?;
            let index = ScheduleIndex::build(rows, service_day(&Utc::now().with_timezone(&Warsaw)));
            match_stop(&client, &index, stop).await?;
        }
        Commands::Inspect { path } => {
            let feed = read_feed(&path)?;
            print_summary(&FeedSummary::from_feed(&feed))?;
        }
    }

    Ok(())
}

struct BuildOptions {
    output: String,
    readable: bool,
    stats_file: Option<String>,
    concurrency: usize,
    alerts: Option<AlertFeedClient<BasicClient>>,
    vehicles: Option<VehicleFeedClient<BasicClient>>,
}

/// The loaded `stop_times.txt` and the modification time it was read at.
struct ScheduleFile {
    path: String,
    modified: Option<SystemTime>,
    rows: Vec<StopTimeRow>,
}

impl ScheduleFile {
    fn load(path: &str) -> Result<Self> {
        let modified = modified_time(path);
        let rows = load_stop_times(path)?;
        Ok(Self {
            path: path.to_string(),
            modified,
            rows,
        })
    }

    /// Reloads the file if it changed on disk. Returns whether it did.
    fn refresh(&mut self) -> Result<bool> {
        let current = modified_time(&self.path);
        let changed = match (current, self.modified) {
            (Some(current), Some(previous)) => current > previous,
            (Some(_), None) => true,
            _ => false,
        };

        if changed {
            info!(path = %self.path, "stop_times changed, reloading");
            *self = Self::load(&self.path)?;
        }
        Ok(changed)
    }
}

fn modified_time(path: &str) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn http_client(args: &DelayArgs) -> Result<BasicClient> {
    BasicClient::with_timeout(Duration::from_secs(args.timeout)).context("building HTTP client")
}

fn delay_client(http: BasicClient, args: &DelayArgs) -> DelayFeedClient<BasicClient> {
    DelayFeedClient::new(http, args.delays_url.clone()).with_retry(args.attempts, Duration::from_secs(2))
}

/// Runs one build and writes the feed and, if configured, the stats row.
#[tracing::instrument(skip_all, fields(output = %opts.output))]
async fn build_once<S: DelaySource + 'static>(
    source: Arc<S>,
    schedule: &ScheduleFile,
    tables: &IdTables,
    opts: &BuildOptions,
) -> Result<RunStats> {
    let now = Utc::now().with_timezone(&Warsaw);
    let index = ScheduleIndex::build(schedule.rows.iter().cloned(), service_day(&now));

    let alerts = async {
        match &opts.alerts {
            Some(client) => pipeline::collect_alerts(client).await,
            None => Vec::new(),
        }
    };
    let vehicles = async {
        match &opts.vehicles {
            Some(client) => pipeline::collect_positions(client).await,
            None => VehiclePositions::default(),
        }
    };

    let (mut result, alerts, vehicles) =
        tokio::join!(pipeline::run(source, &index, opts.concurrency), alerts, vehicles);

    let feed = build_feed(&result.matches, tables, index.day(), &vehicles, &alerts, &now);
    write_feed(&opts.output, &feed, opts.readable)?;

    let summary = FeedSummary::from_feed(&feed);
    result.stats.alerts = summary.alerts;
    result.stats.vehicle_positions = summary.vehicle_positions;

    if let Some(path) = &opts.stats_file {
        append_record(path, &result.stats)?;
    }

    Ok(result.stats)
}

/// Rebuilds the feed every `period` until Ctrl+C, reloading the schedule
/// when it changes.
async fn build_loop<S: DelaySource + 'static>(
    source: Arc<S>,
    schedule: &mut ScheduleFile,
    tables: &IdTables,
    opts: &BuildOptions,
    period: Duration,
    schedule_check_period: Duration,
) -> Result<()> {
    let mut last_schedule_check = Instant::now();

    loop {
        let started = Instant::now();

        if last_schedule_check.elapsed() >= schedule_check_period {
            last_schedule_check = Instant::now();
            if let Err(e) = schedule.refresh() {
                error!(error = ?e, "Failed to reload stop_times, keeping the previous schedule");
            }
        }

        match build_once(source.clone(), schedule, tables, opts).await {
            Ok(stats) => {
                debug!(match_pct = stats.match_pct(), "Build finished");
            }
            Err(e) => {
                error!(error = ?e, "Build failed");
                if let Some(path) = &opts.stats_file {
                    record_failure(path, "build_error", &format!("{e:#}"));
                }
            }
        }

        let sleep = match period.checked_sub(started.elapsed()) {
            Some(remaining) => remaining,
            None => {
                warn!(elapsed_secs = started.elapsed().as_secs(), "Build overran its period");
                OVERRUN_SLEEP
            }
        };
        info!(sleep_secs = sleep.as_secs(), "Waiting before next build");

        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                return Ok(());
            }
        }
    }
}

/// Logs the match outcome of every scheduled arrival at `stop`.
#[tracing::instrument(skip(source, index))]
async fn match_stop<S: DelaySource>(source: &S, index: &ScheduleIndex, stop: u32) -> Result<()> {
    let entries = index.entries_at(stop);
    if entries.is_empty() {
        warn!(day = %index.day(), "No scheduled arrivals at this stop");
        return Ok(());
    }

    let batch = source.delays_for_stop(stop).await?;
    info!(
        entries = entries.len(),
        records = batch.delay.len(),
        "Matching stop"
    );

    for row in entries {
        match match_entry(&row.trip_id, row.original_stop_id, &row.arrival_time, &batch.delay) {
            MatchOutcome::Matched(record) => info!(
                trip_id = %row.trip_id,
                arrival = %row.arrival_time,
                delay_seconds = ?record.delay_seconds,
                estimated = ?record.estimated_time.map(|t| t.to_string()),
                status = record.status.as_deref().unwrap_or(""),
                "Matched"
            ),
            MatchOutcome::NotFound => info!(
                trip_id = %row.trip_id,
                arrival = %row.arrival_time,
                "No realtime data"
            ),
            MatchOutcome::ParseError(e) => warn!(
                trip_id = %row.trip_id,
                error = %e,
                "Unmatchable stop time"
            ),
        }
    }

    Ok(())
}
