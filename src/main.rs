// src/main.rs
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use geomatch_lib::geocoding::lookup::lookup_one_line_address;
use geomatch_lib::geocoding::manager::{run_geocode_stage, spawn_parse_stage};
use geomatch_lib::geocoding::{BatchGeocoder, CensusBatchGeocoder};
use geomatch_lib::matching::manager::run_match_stage;
use geomatch_lib::models::stats_models::{PipelineRunSummary, PipelineStage};
use geomatch_lib::utils::config::{GeocodeConfig, MatchConfig, PipelineConfig};
use geomatch_lib::utils::env::load_env;
use geomatch_lib::utils::instantiate_run::{create_initial_pipeline_run, write_run_summary};
use geomatch_lib::utils::progress_bars::logging::{
    log_pipeline_completion, log_pipeline_start, log_stage_failed,
};
use geomatch_lib::utils::progress_bars::progress_config::ProgressConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Where to write the run summary JSON (defaults next to the stage output)
    #[arg(long, global = true)]
    summary: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Submit the address table to the census batch geocoder
    Geocode(GeocodeArgs),
    /// Parse raw geocoder output into the geocoded table
    Parse(ParseArgs),
    /// Match geocoded addresses against the reference listings
    Match(MatchArgs),
    /// Run geocode, parse and match in order
    Run(RunArgs),
    /// Look up a single one-line address
    Lookup(LookupArgs),
}

#[derive(Args)]
struct GeocodeArgs {
    /// Address table (.parquet or .csv)
    #[arg(long)]
    input: PathBuf,

    #[arg(long, default_value = "output/geocode_results_raw.txt")]
    raw_output: PathBuf,

    #[command(flatten)]
    tuning: GeocodeOverrides,
}

#[derive(Args)]
struct ParseArgs {
    #[arg(long, default_value = "output/geocode_results_raw.txt")]
    raw_input: PathBuf,

    #[arg(long, default_value = "output/geocoded.parquet")]
    output: PathBuf,
}

#[derive(Args)]
struct MatchArgs {
    #[arg(long, default_value = "output/geocoded.parquet")]
    geocoded_input: PathBuf,

    /// Reference business listings (.parquet)
    #[arg(long)]
    reference: PathBuf,

    #[arg(long, default_value = "output/matched_addresses.parquet")]
    output: PathBuf,

    #[command(flatten)]
    tuning: MatchOverrides,
}

#[derive(Args)]
struct RunArgs {
    /// Address table (.parquet or .csv)
    #[arg(long)]
    input: PathBuf,

    /// Reference business listings (.parquet)
    #[arg(long)]
    reference: PathBuf,

    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    #[command(flatten)]
    geocode: GeocodeOverrides,

    #[command(flatten)]
    matching: MatchOverrides,
}

#[derive(Args)]
struct LookupArgs {
    /// Free-form address, e.g. "4600 Silver Hill Rd, Washington, DC 20233"
    address: String,
}

#[derive(Args, Default)]
struct GeocodeOverrides {
    /// Rows per batch submission
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Pause between submissions in milliseconds
    #[arg(long)]
    chunk_delay_ms: Option<u64>,

    #[arg(long)]
    benchmark: Option<String>,

    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long)]
    tmp_dir: Option<PathBuf>,

    /// Ignore any checkpoint and start from the first chunk
    #[arg(long)]
    no_resume: bool,
}

impl GeocodeOverrides {
    fn apply(&self, config: &mut GeocodeConfig) {
        if let Some(v) = self.chunk_size {
            config.chunk_size = v;
        }
        if let Some(v) = self.chunk_delay_ms {
            config.chunk_delay_ms = v;
        }
        if let Some(v) = &self.benchmark {
            config.benchmark = v.clone();
        }
        if let Some(v) = self.max_attempts {
            config.max_attempts = v;
        }
        if let Some(v) = &self.tmp_dir {
            config.tmp_dir = v.clone();
        }
        if self.no_resume {
            config.resume = false;
        }
    }
}

#[derive(Args, Default)]
struct MatchOverrides {
    /// Grid cell width in degrees
    #[arg(long)]
    bucket_size: Option<f64>,

    /// Candidate box half-width in degrees
    #[arg(long)]
    radius: Option<f64>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,
}

impl MatchOverrides {
    fn apply(&self, config: &mut MatchConfig) {
        if let Some(v) = self.bucket_size {
            config.bucket_size = v;
        }
        if let Some(v) = self.radius {
            config.radius = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Sets the flag on Ctrl-C so matching workers stop at the next query.
fn install_cancel_handler() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after the current query");
            flag.store(true, Ordering::SeqCst);
        }
    });
    cancel
}

/// Times a stage, logging a failure banner before passing the error on.
async fn timed_stage<T, F>(stage: PipelineStage, fut: F) -> Result<(T, f64)>
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    match fut.await {
        Ok(value) => Ok((value, start.elapsed().as_secs_f64())),
        Err(e) => {
            log_stage_failed(stage, start.elapsed(), &format!("{:#}", e));
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    load_env();
    info!("Starting carrier address geocoding pipeline");

    let cli = Cli::parse();
    let progress = if cli.no_progress {
        ProgressConfig::disabled()
    } else {
        ProgressConfig::from_env()
    };
    let mut config = PipelineConfig::from_env();

    let run_id = Uuid::new_v4().to_string();
    let run_timestamp = Utc::now().naive_utc();
    let pipeline_start = Instant::now();

    let (mut summary, default_summary_dir): (PipelineRunSummary, PathBuf) = match &cli.command {
        Command::Lookup(args) => {
            config.geocode.validate()?;
            let geography = lookup_one_line_address(&config.geocode, &args.address)
                .await
                .with_context(|| format!("Lookup failed for '{}'", args.address))?;
            match geography {
                Some(g) => println!("{}", serde_json::to_string_pretty(&g)?),
                None => info!("No census match for '{}'", args.address),
            }
            return Ok(());
        }
        Command::Geocode(args) => {
            args.tuning.apply(&mut config.geocode);
            config.validate()?;
            config.log_config();
            log_pipeline_start(&run_id, &[PipelineStage::Geocode]);
            let mut summary = create_initial_pipeline_run(&run_id, run_timestamp, Some("geocode stage"));

            let geocoder: Arc<dyn BatchGeocoder> = Arc::new(CensusBatchGeocoder::new(&config.geocode)?);
            let (stats, secs) = timed_stage(
                PipelineStage::Geocode,
                run_geocode_stage(&config, geocoder, &progress, &args.input, &args.raw_output, &run_id),
            )
            .await?;
            summary.geocode = Some(stats);
            summary.geocode_time = secs;
            (summary, parent_dir(&args.raw_output))
        }
        Command::Parse(args) => {
            config.validate()?;
            log_pipeline_start(&run_id, &[PipelineStage::Parse]);
            let mut summary = create_initial_pipeline_run(&run_id, run_timestamp, Some("parse stage"));

            let (stats, secs) = timed_stage(
                PipelineStage::Parse,
                spawn_parse_stage(args.raw_input.clone(), args.output.clone(), run_id.clone()),
            )
            .await?;
            summary.parse = Some(stats);
            summary.parse_time = secs;
            (summary, parent_dir(&args.output))
        }
        Command::Match(args) => {
            args.tuning.apply(&mut config.matching);
            config.validate()?;
            config.log_config();
            log_pipeline_start(&run_id, &[PipelineStage::Match]);
            let mut summary = create_initial_pipeline_run(&run_id, run_timestamp, Some("match stage"));

            let cancel = install_cancel_handler();
            let (stats, secs) = timed_stage(
                PipelineStage::Match,
                run_match_stage(
                    &config,
                    &progress,
                    &args.geocoded_input,
                    &args.reference,
                    &args.output,
                    &run_id,
                    cancel,
                ),
            )
            .await?;
            summary.matching = Some(stats);
            summary.matching_time = secs;
            (summary, parent_dir(&args.output))
        }
        Command::Run(args) => {
            args.geocode.apply(&mut config.geocode);
            args.matching.apply(&mut config.matching);
            config.validate()?;
            config.log_config();
            log_pipeline_start(
                &run_id,
                &[PipelineStage::Geocode, PipelineStage::Parse, PipelineStage::Match],
            );
            let mut summary = create_initial_pipeline_run(&run_id, run_timestamp, Some("full pipeline run"));

            let raw_path = args.output_dir.join("geocode_results_raw.txt");
            let geocoded_path = args.output_dir.join("geocoded.parquet");
            let matched_path = args.output_dir.join("matched_addresses.parquet");

            let geocoder: Arc<dyn BatchGeocoder> = Arc::new(CensusBatchGeocoder::new(&config.geocode)?);
            let (stats, secs) = timed_stage(
                PipelineStage::Geocode,
                run_geocode_stage(&config, geocoder, &progress, &args.input, &raw_path, &run_id),
            )
            .await?;
            summary.geocode = Some(stats);
            summary.geocode_time = secs;

            let (stats, secs) = timed_stage(
                PipelineStage::Parse,
                spawn_parse_stage(raw_path.clone(), geocoded_path.clone(), run_id.clone()),
            )
            .await?;
            summary.parse = Some(stats);
            summary.parse_time = secs;

            let cancel = install_cancel_handler();
            let (stats, secs) = timed_stage(
                PipelineStage::Match,
                run_match_stage(
                    &config,
                    &progress,
                    &geocoded_path,
                    &args.reference,
                    &matched_path,
                    &run_id,
                    cancel,
                ),
            )
            .await?;
            summary.matching = Some(stats);
            summary.matching_time = secs;
            (summary, args.output_dir.clone())
        }
    };

    summary.total_processing_time = pipeline_start.elapsed().as_secs_f64();
    let summary_path = cli
        .summary
        .clone()
        .unwrap_or_else(|| default_summary_dir.join(format!("run_summary_{}.json", run_id)));
    write_run_summary(&summary_path, &summary)?;
    log_pipeline_completion(&summary);
    Ok(())
}
