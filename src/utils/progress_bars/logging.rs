// src/utils/progress_bars/logging.rs - Logging helpers for pipeline stages
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

use crate::models::stats_models::{MatchStageStats, PipelineRunSummary, PipelineStage};

#[derive(Clone)]
pub struct StageLogger {
    stage_name: &'static str,
    stage_emoji: &'static str,
    start_time: Instant,
}

impl StageLogger {
    pub fn new(stage: PipelineStage) -> Self {
        let (stage_name, stage_emoji) = stage_label(stage);
        Self {
            stage_name,
            stage_emoji,
            start_time: Instant::now(),
        }
    }

    pub fn log_start(&self, run_id: &str, details: &str) {
        info!(
            "[{}] {} 🚀 Starting {} stage (run ID: {})",
            self.stage_name,
            self.stage_emoji,
            self.stage_name.to_lowercase(),
            run_id
        );
        info!(
            "[{}] {} ⚙️  Configuration: {}",
            self.stage_name, self.stage_emoji, details
        );
    }

    pub fn log_phase(&self, phase: &str, details: Option<&str>) {
        let elapsed = self.start_time.elapsed();
        let msg = if let Some(details) = details {
            format!(
                "[{}] {} 🔄 Phase: {} - {} [+{:.1}s]",
                self.stage_name, self.stage_emoji, phase, details, elapsed.as_secs_f32()
            )
        } else {
            format!(
                "[{}] {} 🔄 Phase: {} [+{:.1}s]",
                self.stage_name, self.stage_emoji, phase, elapsed.as_secs_f32()
            )
        };
        info!("{}", msg);
    }

    pub fn log_data_loaded(&self, count: usize, data_type: &str) {
        info!(
            "[{}] {} 📊 Loaded {} {} records",
            self.stage_name, self.stage_emoji, count, data_type
        );
    }

    pub fn log_resume(&self, completed_chunks: usize, total_chunks: usize, lines: usize) {
        info!(
            "[{}] {} ⏭️  Resuming from checkpoint: {}/{} chunks already submitted ({} lines kept)",
            self.stage_name, self.stage_emoji, completed_chunks, total_chunks, lines
        );
    }

    pub fn log_chunk_progress(&self, chunk_num: usize, total_chunks: usize, rows: usize, lines: usize) {
        info!(
            "[{}] {} 📦 Chunk {}/{} submitted ({} rows → {} response lines)",
            self.stage_name, self.stage_emoji, chunk_num, total_chunks, rows, lines
        );
    }

    pub fn log_retry(&self, chunk_num: usize, attempt: u32, max_attempts: u32, delay: Duration, error: &str) {
        warn!(
            "[{}] {} 🔁 Chunk {} attempt {}/{} failed, retrying after {:?}: {}",
            self.stage_name, self.stage_emoji, chunk_num, attempt, max_attempts, delay, error
        );
    }

    pub fn log_batch_processing_start(&self, total_items: usize, batch_size: usize, workers: usize) {
        let batch_count = (total_items + batch_size - 1) / batch_size;
        info!(
            "[{}] {} ⚙️  Processing {} queries in {} batches (batch size: {}, workers: {})",
            self.stage_name, self.stage_emoji, total_items, batch_count, batch_size, workers
        );
    }

    pub fn log_batch_progress(&self, batches_done: usize, total_batches: usize, items_in_batch: usize) {
        if batches_done % 5 == 0 || batches_done == 1 || batches_done == total_batches {
            info!(
                "[{}] {} 📦 Finished batch {}/{} ({} queries)",
                self.stage_name, self.stage_emoji, batches_done, total_batches, items_in_batch
            );
        }
    }

    pub fn log_data_quality_issue(&self, issue_type: &str, count: usize) {
        if count > 0 {
            warn!(
                "[{}] {} ⚠️  Data quality: {} instances of {}",
                self.stage_name, self.stage_emoji, count, issue_type
            );
        }
    }

    pub fn log_memory(&self, memory_mb: u64) {
        info!(
            "[{}] {} 💾 Memory usage: {} MB",
            self.stage_name, self.stage_emoji, memory_mb
        );
    }

    pub fn log_completion(&self, summary: &str) {
        let duration = self.start_time.elapsed();
        info!(
            "[{}] {} 🎉 COMPLETED in {:.2?}: {}",
            self.stage_name, self.stage_emoji, duration, summary
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!("[{}] {} ⚠️  {}", self.stage_name, self.stage_emoji, message);
    }

    pub fn log_error(&self, message: &str) {
        error!("[{}] {} ❌ {}", self.stage_name, self.stage_emoji, message);
    }

    pub fn log_debug(&self, message: &str) {
        debug!("[{}] {} {}", self.stage_name, self.stage_emoji, message);
    }
}

fn stage_label(stage: PipelineStage) -> (&'static str, &'static str) {
    match stage {
        PipelineStage::Geocode => ("GEOCODE", "🛰️"),
        PipelineStage::Parse => ("PARSE", "🧾"),
        PipelineStage::Match => ("MATCH", "📍"),
    }
}

// Pipeline-level logging functions
pub fn log_pipeline_start(run_id: &str, stages: &[PipelineStage]) {
    info!("🚀 ===== ADDRESS GEOCODING PIPELINE STARTING =====");
    info!("📅 Pipeline Run ID: {}", run_id);
    let names: Vec<String> = stages
        .iter()
        .map(|stage| {
            let (name, emoji) = stage_label(*stage);
            format!("{} {}", name, emoji)
        })
        .collect();
    info!("🎯 Stages: {}", names.join(" → "));
    info!("================================================");
}

pub fn log_stage_failed(stage: PipelineStage, duration: Duration, error: &str) {
    let (name, emoji) = stage_label(stage);
    error!(
        "❌ [{}] {} {} stage failed after {:.2?}: {}",
        name,
        emoji,
        name.to_lowercase(),
        duration,
        error
    );
}

pub fn log_pipeline_completion(summary: &PipelineRunSummary) {
    info!("🎉 ===== ADDRESS GEOCODING PIPELINE COMPLETED =====");
    info!("📅 Pipeline Run ID: {}", summary.run_id);
    info!("⏱️  Total Duration: {:.2}s", summary.total_processing_time);

    if let Some(geocode) = &summary.geocode {
        info!(
            "  🛰️ GEOCODE: {}/{} chunks, {} rows submitted, {} response lines ({:.2}s)",
            geocode.chunks_completed,
            geocode.chunks_total,
            geocode.rows_submitted,
            geocode.lines_received,
            summary.geocode_time
        );
    }
    if let Some(parse) = &summary.parse {
        info!(
            "  🧾 PARSE: {} lines → {} matched, {} tied, {} no match, {} with coordinates ({:.2}s)",
            parse.lines_total,
            parse.matched,
            parse.tied,
            parse.no_match,
            parse.with_coordinates,
            summary.parse_time
        );
    }
    if let Some(matching) = &summary.matching {
        log_match_summary(matching, summary.matching_time);
    }
    info!("===============================================");
}

fn log_match_summary(stats: &MatchStageStats, seconds: f64) {
    info!(
        "  📍 MATCH: {} queries → {} matched ({:.1}%), avg confidence {:.1} ({:.2}s)",
        stats.queries_total,
        stats.matched,
        stats.match_rate() * 100.0,
        stats.avg_confidence,
        seconds
    );
    info!(
        "     {} without coordinates, {} without candidates, {} listings in {} buckets",
        stats.missing_coordinates, stats.no_candidates, stats.reference_listings_indexed, stats.buckets
    );
}
