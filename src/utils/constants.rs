// src/utils/constants.rs

pub const CENSUS_GEOCODER_BASE_URL: &str = "https://geocoding.geo.census.gov/geocoder";
pub const ADDRESS_BATCH_PATH: &str = "/locations/addressbatch";
pub const ONE_LINE_ADDRESS_PATH: &str = "/geographies/onelineaddress";
pub const DEFAULT_BENCHMARK: &str = "Public_AR_Current";
pub const DEFAULT_VINTAGE: &str = "Current_Current";

/// Multiplier folding (lat_bucket, lon_bucket) into one scalar bucket id.
/// Must exceed twice the largest |lon_bucket| the configured bucket size can produce.
pub const BUCKET_ID_MULTIPLIER: i64 = 100_000;

/// Exponent cap for the retry backoff (2^6 * base).
pub const MAX_BACKOFF_EXPONENT: u32 = 6;
