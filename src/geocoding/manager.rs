// src/geocoding/manager.rs - Stage entry points for geocoding and parsing
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::geocoding::client::BatchGeocoder;
use crate::geocoding::parser::parse_lines;
use crate::geocoding::submitter::GeocodeSubmitter;
use crate::models::stats_models::{GeocodeStageStats, ParseStageStats, PipelineStage};
use crate::storage::address_table::load_address_records;
use crate::storage::geocoded_table::write_geocoded;
use crate::storage::raw_text::read_raw_lines;
use crate::utils::config::PipelineConfig;
use crate::utils::progress_bars::logging::StageLogger;
use crate::utils::progress_bars::progress_config::ProgressConfig;

/// Loads the address table and writes the raw geocoder response artifact.
pub async fn run_geocode_stage(
    config: &PipelineConfig,
    geocoder: Arc<dyn BatchGeocoder>,
    progress: &ProgressConfig,
    address_table: &Path,
    raw_output: &Path,
    run_id: &str,
) -> Result<GeocodeStageStats> {
    let records = load_address_records(address_table, &config.columns)
        .context("Failed to load address table")?;
    StageLogger::new(PipelineStage::Geocode).log_data_loaded(records.len(), "address");

    let submitter = GeocodeSubmitter::new(geocoder, config.geocode.clone(), progress.clone());
    let outcome = submitter.submit_all(&records, raw_output, run_id).await?;
    Ok(outcome.stats)
}

/// Parses the raw artifact into the geocoded table.
pub fn run_parse_stage(raw_input: &Path, geocoded_output: &Path, run_id: &str) -> Result<ParseStageStats> {
    let logger = StageLogger::new(PipelineStage::Parse);
    if !raw_input.exists() {
        bail!("raw geocode artifact {} does not exist", raw_input.display());
    }
    let lines = read_raw_lines(raw_input)?;
    if lines.is_empty() {
        bail!("raw geocode artifact {} is empty", raw_input.display());
    }
    logger.log_start(
        run_id,
        &format!("{} -> {}", raw_input.display(), geocoded_output.display()),
    );
    logger.log_data_loaded(lines.len(), "raw response");

    let (rows, stats) = parse_lines(&lines);
    logger.log_data_quality_issue("malformed lines", stats.malformed_rows);
    logger.log_data_quality_issue("over-long lines", stats.overlong_rows);
    logger.log_data_quality_issue("unrecognized categorical tokens", stats.unrecognized_tokens);
    logger.log_debug(&format!("{} short lines padded", stats.short_rows));

    logger.log_phase("Writing geocoded table", Some(&geocoded_output.display().to_string()));
    write_geocoded(geocoded_output, &rows)?;

    logger.log_completion(&format!(
        "{} rows ({} matched, {} tied, {} no match, {} with coordinates)",
        rows.len(),
        stats.matched,
        stats.tied,
        stats.no_match,
        stats.with_coordinates
    ));
    Ok(stats)
}

/// Runs [`run_parse_stage`] on the blocking pool so the runtime threads stay free.
pub async fn spawn_parse_stage(raw_input: PathBuf, geocoded_output: PathBuf, run_id: String) -> Result<ParseStageStats> {
    tokio::task::spawn_blocking(move || run_parse_stage(&raw_input, &geocoded_output, &run_id))
        .await
        .context("parse task panicked")?
}
