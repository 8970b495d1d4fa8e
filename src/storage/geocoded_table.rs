// src/storage/geocoded_table.rs
//! Columnar form of the parsed geocoder output.
//!
//! Layout: id, input_address, match_status, match_type, matched_address,
//! lat, lon, tiger_line_id, side. The three categorical columns are stored
//! dictionary-encoded.

use anyhow::{Context, Result};
use arrow_array::types::Int32Type;
use arrow_array::{ArrayRef, DictionaryArray, Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use std::path::Path;
use std::sync::Arc;

use crate::models::{GeocodedAddress, MatchStatus, MatchType, StreetSide};
use crate::storage::parquet_io::{f64_values, open_projected, string_values, write_parquet};

pub const GEOCODED_COLUMNS: [&str; 9] = [
    "id",
    "input_address",
    "match_status",
    "match_type",
    "matched_address",
    "lat",
    "lon",
    "tiger_line_id",
    "side",
];

fn categorical_type() -> DataType {
    DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
}

fn utf8_column<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(values.collect::<StringArray>())
}

fn categorical_column<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(values.collect::<DictionaryArray<Int32Type>>())
}

/// Fields and arrays for the geocoded columns, shared with the match table writer.
pub(crate) fn geocoded_columns(rows: &[GeocodedAddress]) -> (Vec<Field>, Vec<ArrayRef>) {
    let fields = vec![
        Field::new("id", DataType::Utf8, true),
        Field::new("input_address", DataType::Utf8, true),
        Field::new("match_status", categorical_type(), true),
        Field::new("match_type", categorical_type(), true),
        Field::new("matched_address", DataType::Utf8, true),
        Field::new("lat", DataType::Float64, true),
        Field::new("lon", DataType::Float64, true),
        Field::new("tiger_line_id", DataType::Utf8, true),
        Field::new("side", categorical_type(), true),
    ];
    let arrays: Vec<ArrayRef> = vec![
        utf8_column(rows.iter().map(|r| r.id.as_deref())),
        utf8_column(rows.iter().map(|r| r.input_address.as_deref())),
        categorical_column(rows.iter().map(|r| r.match_status.map(|s| s.as_str()))),
        categorical_column(rows.iter().map(|r| r.match_type.map(|t| t.as_str()))),
        utf8_column(rows.iter().map(|r| r.matched_address.as_deref())),
        Arc::new(rows.iter().map(|r| r.lat).collect::<Float64Array>()),
        Arc::new(rows.iter().map(|r| r.lon).collect::<Float64Array>()),
        utf8_column(rows.iter().map(|r| r.tiger_line_id.as_deref())),
        categorical_column(rows.iter().map(|r| r.side.map(|s| s.as_str()))),
    ];
    (fields, arrays)
}

pub fn geocoded_batch(rows: &[GeocodedAddress]) -> Result<RecordBatch> {
    let (fields, arrays) = geocoded_columns(rows);
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .context("assembling geocoded record batch")
}

pub fn write_geocoded(path: &Path, rows: &[GeocodedAddress]) -> Result<()> {
    write_parquet(path, geocoded_batch(rows)?)
        .with_context(|| format!("writing geocoded table {}", path.display()))
}

/// Reads a geocoded table back in row order.
pub fn read_geocoded(path: &Path) -> Result<Vec<GeocodedAddress>> {
    let reader = open_projected(path, &GEOCODED_COLUMNS)?;
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("reading record batch from {}", path.display()))?;
        let ids = string_values(&batch, "id")?;
        let inputs = string_values(&batch, "input_address")?;
        let statuses = string_values(&batch, "match_status")?;
        let types = string_values(&batch, "match_type")?;
        let matched = string_values(&batch, "matched_address")?;
        let lats = f64_values(&batch, "lat")?;
        let lons = f64_values(&batch, "lon")?;
        let tiger = string_values(&batch, "tiger_line_id")?;
        let sides = string_values(&batch, "side")?;

        for i in 0..batch.num_rows() {
            rows.push(GeocodedAddress {
                id: ids[i].clone(),
                input_address: inputs[i].clone(),
                match_status: statuses[i].as_deref().and_then(MatchStatus::parse),
                match_type: types[i].as_deref().and_then(MatchType::parse),
                matched_address: matched[i].clone(),
                lat: lats[i],
                lon: lons[i],
                tiger_line_id: tiger[i].clone(),
                side: sides[i].as_deref().and_then(StreetSide::parse),
            });
        }
    }
    Ok(rows)
}
