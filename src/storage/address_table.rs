// src/storage/address_table.rs
use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;

use crate::models::AddressRecord;
use crate::storage::parquet_io::{open_projected, string_values};
use crate::utils::config::ColumnConfig;

/// Loads the carrier address table from `.parquet` or `.csv` (with a header row).
/// Fails when the file is missing or holds no rows, before any geocoding starts.
pub fn load_address_records(path: &Path, columns: &ColumnConfig) -> Result<Vec<AddressRecord>> {
    if !path.exists() {
        bail!("address table {} does not exist", path.display());
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let records = match extension.as_str() {
        "parquet" => load_from_parquet(path, columns)?,
        "csv" => load_from_csv(path, columns)?,
        other => bail!(
            "unsupported address table format '{}' for {} (expected .parquet or .csv)",
            other,
            path.display()
        ),
    };
    if records.is_empty() {
        bail!("address table {} contains no rows", path.display());
    }
    Ok(records)
}

fn load_from_parquet(path: &Path, columns: &ColumnConfig) -> Result<Vec<AddressRecord>> {
    let names = columns.address_columns();
    let reader = open_projected(path, &names)?;
    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("reading record batch from {}", path.display()))?;
        let ids = string_values(&batch, names[0])?;
        let streets = string_values(&batch, names[1])?;
        let cities = string_values(&batch, names[2])?;
        let states = string_values(&batch, names[3])?;
        let zips = string_values(&batch, names[4])?;
        for i in 0..batch.num_rows() {
            records.push(AddressRecord {
                id: ids[i].clone().unwrap_or_default(),
                street: streets[i].clone().unwrap_or_default(),
                city: cities[i].clone().unwrap_or_default(),
                state: states[i].clone().unwrap_or_default(),
                zip: zips[i].clone().unwrap_or_default(),
            });
        }
    }
    Ok(records)
}

fn load_from_csv(path: &Path, columns: &ColumnConfig) -> Result<Vec<AddressRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .clone();
    let mut indices = [0usize; 5];
    for (slot, name) in indices.iter_mut().zip(columns.address_columns()) {
        *slot = headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| anyhow!("column '{}' not found in {}", name, path.display()))?;
    }
    let field = |record: &csv::StringRecord, idx: usize| -> String {
        record.get(idx).unwrap_or("").trim().to_string()
    };

    let mut records = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("reading row {} of {}", line + 1, path.display()))?;
        records.push(AddressRecord {
            id: field(&record, indices[0]),
            street: field(&record, indices[1]),
            city: field(&record, indices[2]),
            state: field(&record, indices[3]),
            zip: field(&record, indices[4]),
        });
    }
    Ok(records)
}

/// Serializes a chunk as headerless CSV: id, street, city, state, zip.
pub fn serialize_chunk(records: &[AddressRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(records.len() * 64));
    for record in records {
        writer
            .write_record([
                record.id.as_str(),
                record.street.as_str(),
                record.city.as_str(),
                record.state.as_str(),
                record.zip.as_str(),
            ])
            .with_context(|| format!("serializing address {}", record.id))?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("flushing chunk payload: {}", e.error()))
}
