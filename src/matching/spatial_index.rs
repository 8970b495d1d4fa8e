// src/matching/spatial_index.rs
//! Grid index over reference listings.
//!
//! A listing at (lat, lon) lives in cell `(floor(lat / size), floor(lon / size))`.
//! Any point within `size` degrees of a query on both axes falls in the
//! query's cell or one of its eight neighbors.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::Path;

use crate::models::ReferenceListing;
use crate::storage::reference::{scan_reference_listings, ReferenceScan};
use crate::utils::config::ColumnConfig;
use crate::utils::constants::BUCKET_ID_MULTIPLIER;

pub fn bucket_coords(lat: f64, lon: f64, bucket_size: f64) -> (i64, i64) {
    (
        (lat / bucket_size).floor() as i64,
        (lon / bucket_size).floor() as i64,
    )
}

pub fn bucket_id(lat_bucket: i64, lon_bucket: i64) -> i64 {
    lat_bucket * BUCKET_ID_MULTIPLIER + lon_bucket
}

#[derive(Debug)]
pub struct SpatialIndex {
    bucket_size: f64,
    buckets: HashMap<i64, Vec<ReferenceListing>>,
    listings: usize,
}

impl SpatialIndex {
    pub fn new(bucket_size: f64) -> Result<Self> {
        if !bucket_size.is_finite() || bucket_size <= 0.0 {
            bail!("bucket_size must be a positive number, got {}", bucket_size);
        }
        Ok(Self {
            bucket_size,
            buckets: HashMap::new(),
            listings: 0,
        })
    }

    pub fn insert(&mut self, listing: ReferenceListing) {
        let (lat_b, lon_b) = bucket_coords(listing.latitude, listing.longitude, self.bucket_size);
        self.buckets
            .entry(bucket_id(lat_b, lon_b))
            .or_default()
            .push(listing);
        self.listings += 1;
    }

    pub fn from_listings<I>(bucket_size: f64, listings: I) -> Result<Self>
    where
        I: IntoIterator<Item = ReferenceListing>,
    {
        let mut index = Self::new(bucket_size)?;
        for listing in listings {
            index.insert(listing);
        }
        Ok(index)
    }

    /// Builds the index in one streaming pass over the reference parquet file.
    pub fn build_from_parquet(
        path: &Path,
        columns: &ColumnConfig,
        bucket_size: f64,
    ) -> Result<(Self, ReferenceScan)> {
        let mut index = Self::new(bucket_size)?;
        let scan = scan_reference_listings(path, columns, |listing| index.insert(listing))?;
        Ok((index, scan))
    }

    /// Listings in the 3x3 block of cells around the query, in a fixed order:
    /// latitude offset -1, 0, +1, within each longitude offset -1, 0, +1,
    /// then insertion order inside a cell.
    pub fn neighborhood(&self, lat: f64, lon: f64) -> impl Iterator<Item = &ReferenceListing> + '_ {
        let (lat_b, lon_b) = bucket_coords(lat, lon, self.bucket_size);
        (-1..=1)
            .flat_map(move |dlat| (-1..=1).map(move |dlon| bucket_id(lat_b + dlat, lon_b + dlon)))
            .filter_map(move |id| self.buckets.get(&id))
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.listings
    }

    pub fn is_empty(&self) -> bool {
        self.listings == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
