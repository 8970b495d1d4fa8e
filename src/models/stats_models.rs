// src/models/stats_models.rs
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Geocode,
    Parse,
    Match,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Geocode => "geocode",
            PipelineStage::Parse => "parse",
            PipelineStage::Match => "match",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeocodeStageStats {
    pub rows_total: usize,
    pub chunks_total: usize,
    pub chunks_completed: usize,
    pub rows_submitted: usize,
    pub lines_received: usize,
    pub resumed_from_chunk: Option<usize>,
    pub retries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseStageStats {
    pub lines_total: usize,
    pub matched: usize,
    pub tied: usize,
    pub no_match: usize,
    pub short_rows: usize,
    pub overlong_rows: usize,
    pub malformed_rows: usize,
    pub unrecognized_tokens: usize,
    pub with_coordinates: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStageStats {
    pub queries_total: usize,
    pub matched: usize,
    pub missing_coordinates: usize,
    pub no_candidates: usize,
    pub reference_listings_indexed: usize,
    pub reference_rows_skipped: usize,
    pub buckets: usize,
    pub avg_confidence: f64,
}

impl MatchStageStats {
    pub fn match_rate(&self) -> f64 {
        if self.queries_total == 0 {
            0.0
        } else {
            self.matched as f64 / self.queries_total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunSummary {
    pub run_id: String,
    pub run_timestamp: NaiveDateTime,
    pub description: Option<String>,
    pub geocode: Option<GeocodeStageStats>,
    pub parse: Option<ParseStageStats>,
    pub matching: Option<MatchStageStats>,
    pub geocode_time: f64,
    pub parse_time: f64,
    pub matching_time: f64,
    pub total_processing_time: f64,
}
