// src/storage/reference.rs
use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::models::ReferenceListing;
use crate::storage::parquet_io::{f64_values, open_projected, string_values};
use crate::utils::config::ColumnConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceScan {
    pub rows_total: usize,
    pub rows_without_coordinates: usize,
    pub rows_without_address: usize,
}

/// Joins the address components with ", ". Any missing component yields `None`.
pub fn compose_reference_address(parts: &[Option<&str>]) -> Option<String> {
    let mut joined = String::new();
    for (i, part) in parts.iter().enumerate() {
        let part = (*part)?;
        if i > 0 {
            joined.push_str(", ");
        }
        joined.push_str(part);
    }
    Some(joined)
}

/// Streams the reference listings batch by batch, handing each usable row to `visit`.
///
/// `row_index` counts every row in the file, including the ones skipped for
/// missing or non-finite coordinates, so it always points back at the source row.
pub fn scan_reference_listings<F>(
    path: &Path,
    columns: &ColumnConfig,
    mut visit: F,
) -> Result<ReferenceScan>
where
    F: FnMut(ReferenceListing),
{
    if !path.exists() {
        bail!("reference dataset {} does not exist", path.display());
    }
    let [street_col, city_col, state_col, zip_col] = columns.reference_address_columns();
    let lat_col = columns.reference_latitude.as_str();
    let lon_col = columns.reference_longitude.as_str();
    let reader = open_projected(path, &[lat_col, lon_col, street_col, city_col, state_col, zip_col])?;

    let mut scan = ReferenceScan::default();
    for batch in reader {
        let batch = batch.with_context(|| format!("reading record batch from {}", path.display()))?;
        let lats = f64_values(&batch, lat_col)?;
        let lons = f64_values(&batch, lon_col)?;
        let streets = string_values(&batch, street_col)?;
        let cities = string_values(&batch, city_col)?;
        let states = string_values(&batch, state_col)?;
        let zips = string_values(&batch, zip_col)?;

        for i in 0..batch.num_rows() {
            let row_index = scan.rows_total as i64;
            scan.rows_total += 1;
            let (latitude, longitude) = match (lats[i], lons[i]) {
                (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => (lat, lon),
                _ => {
                    scan.rows_without_coordinates += 1;
                    continue;
                }
            };
            let address = compose_reference_address(&[
                streets[i].as_deref(),
                cities[i].as_deref(),
                states[i].as_deref(),
                zips[i].as_deref(),
            ]);
            if address.is_none() {
                scan.rows_without_address += 1;
            }
            visit(ReferenceListing {
                row_index,
                latitude,
                longitude,
                address,
            });
        }
    }
    Ok(scan)
}
