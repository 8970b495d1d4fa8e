// src/storage/match_table.rs
use anyhow::{bail, Context, Result};
use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use std::path::Path;
use std::sync::Arc;

use crate::models::{GeocodedAddress, MatchResult};
use crate::storage::geocoded_table::geocoded_columns;
use crate::storage::parquet_io::write_parquet;

pub const REFERENCE_ROW_INDEX_COLUMN: &str = "data_axle_row_index";

/// The geocoded columns followed by best_match, confidence and the reference row index.
pub fn match_batch(rows: &[GeocodedAddress], results: &[MatchResult]) -> Result<RecordBatch> {
    if rows.len() != results.len() {
        bail!(
            "{} geocoded rows but {} match results",
            rows.len(),
            results.len()
        );
    }
    let (mut fields, mut arrays) = geocoded_columns(rows);
    fields.push(Field::new("best_match", DataType::Utf8, true));
    fields.push(Field::new("confidence", DataType::Float64, false));
    fields.push(Field::new(REFERENCE_ROW_INDEX_COLUMN, DataType::Int64, false));

    let best: ArrayRef = Arc::new(
        results
            .iter()
            .map(|r| r.best_match.as_deref())
            .collect::<StringArray>(),
    );
    let confidence: ArrayRef = Arc::new(Float64Array::from_iter_values(
        results.iter().map(|r| r.confidence),
    ));
    let row_index: ArrayRef = Arc::new(Int64Array::from_iter_values(
        results.iter().map(|r| r.reference_row_index),
    ));
    arrays.extend([best, confidence, row_index]);

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .context("assembling match record batch")
}

pub fn write_match_table(path: &Path, rows: &[GeocodedAddress], results: &[MatchResult]) -> Result<()> {
    write_parquet(path, match_batch(rows, results)?)
        .with_context(|| format!("writing match table {}", path.display()))
}
