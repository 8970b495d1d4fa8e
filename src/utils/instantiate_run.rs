use crate::models::stats_models::PipelineRunSummary;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::info;
use std::fs;
use std::path::Path;

pub fn create_initial_pipeline_run(
    run_id: &str,
    run_timestamp: NaiveDateTime,
    description: Option<&str>,
) -> PipelineRunSummary {
    info!("Created pipeline run with ID: {}", run_id);

    PipelineRunSummary {
        run_id: run_id.to_string(),
        run_timestamp,
        description: description.map(|s| s.to_string()),
        geocode: None,
        parse: None,
        matching: None,
        geocode_time: 0.0,
        parse_time: 0.0,
        matching_time: 0.0,
        total_processing_time: 0.0,
    }
}

/// Writes the run summary as pretty JSON, creating parent directories as needed.
pub fn write_run_summary(path: &Path, summary: &PipelineRunSummary) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write run summary to {}", path.display()))?;
    info!("Run summary written to {}", path.display());
    Ok(())
}
