// src/matching/manager.rs - Match stage coordination
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::matching::address::{match_all, SpatialFuzzyMatcher};
use crate::matching::spatial_index::SpatialIndex;
use crate::models::stats_models::{MatchStageStats, PipelineStage};
use crate::models::{GeocodedAddress, MatchResult};
use crate::storage::geocoded_table::read_geocoded;
use crate::storage::match_table::write_match_table;
use crate::storage::parquet_io::parquet_row_count;
use crate::utils::config::PipelineConfig;
use crate::utils::get_memory_usage;
use crate::utils::progress_bars::logging::StageLogger;
use crate::utils::progress_bars::progress_config::ProgressConfig;

/// Matches the geocoded table against the reference listings and writes the match table.
pub async fn run_match_stage(
    config: &PipelineConfig,
    progress: &ProgressConfig,
    geocoded_input: &Path,
    reference_input: &Path,
    match_output: &Path,
    run_id: &str,
    cancel: Arc<AtomicBool>,
) -> Result<MatchStageStats> {
    config.matching.validate()?;
    let logger = StageLogger::new(PipelineStage::Match);

    for (label, path) in [("geocoded table", geocoded_input), ("reference dataset", reference_input)] {
        if !path.exists() {
            bail!("{} {} does not exist", label, path.display());
        }
        if parquet_row_count(path)? == 0 {
            bail!("{} {} has no rows", label, path.display());
        }
    }

    logger.log_start(
        run_id,
        &format!(
            "bucket_size={}, radius={}, batch_size={}, workers={}",
            config.matching.bucket_size,
            config.matching.radius,
            config.matching.batch_size,
            config.matching.workers
        ),
    );

    logger.log_phase("Building spatial index", Some(&reference_input.display().to_string()));
    let (index, scan) = SpatialIndex::build_from_parquet(
        reference_input,
        &config.columns,
        config.matching.bucket_size,
    )
    .context("Failed to index reference listings")?;
    logger.log_data_loaded(index.len(), "reference listing");
    logger.log_data_quality_issue("reference rows without coordinates", scan.rows_without_coordinates);
    logger.log_data_quality_issue("reference rows with incomplete address", scan.rows_without_address);
    logger.log_debug(&format!("{} occupied buckets", index.bucket_count()));
    if index.is_empty() {
        logger.log_warning("reference dataset has no usable coordinates; every query will be unmatched");
    }

    let queries = read_geocoded(geocoded_input).context("Failed to read geocoded table")?;
    logger.log_data_loaded(queries.len(), "geocoded");
    let queries = Arc::new(queries);

    let matcher = Arc::new(SpatialFuzzyMatcher::new(Arc::new(index), config.matching.radius));
    let results = match_all(
        Arc::clone(&matcher),
        Arc::clone(&queries),
        &config.matching,
        progress,
        cancel,
    )
    .await?;

    let mut stats = summarize(&queries, &results);
    stats.reference_listings_indexed = matcher.index().len();
    stats.reference_rows_skipped = scan.rows_without_coordinates;
    stats.buckets = matcher.index().bucket_count();

    logger.log_phase("Writing match table", Some(&match_output.display().to_string()));
    write_match_table(match_output, &queries, &results)?;

    if progress.should_show_memory() {
        logger.log_memory(get_memory_usage().await);
    }
    logger.log_completion(&format!(
        "{}/{} queries matched ({:.1}%), avg confidence {:.1}",
        stats.matched,
        stats.queries_total,
        stats.match_rate() * 100.0,
        stats.avg_confidence
    ));
    Ok(stats)
}

fn summarize(queries: &[GeocodedAddress], results: &[MatchResult]) -> MatchStageStats {
    let mut stats = MatchStageStats {
        queries_total: queries.len(),
        ..MatchStageStats::default()
    };
    let mut confidence_sum = 0.0;
    for (query, result) in queries.iter().zip(results) {
        if result.is_match() {
            stats.matched += 1;
            confidence_sum += result.confidence;
        } else if query.coordinates().is_none() || query.matched_address.is_none() {
            stats.missing_coordinates += 1;
        } else {
            stats.no_candidates += 1;
        }
    }
    if stats.matched > 0 {
        stats.avg_confidence = confidence_sum / stats.matched as f64;
    }
    stats
}
