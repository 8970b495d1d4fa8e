// src/utils/config.rs
//! Run configuration for all three stages.
//!
//! Defaults mirror the values the census extract pipeline has always used;
//! every field can be overridden from the environment (see `from_env`) and
//! again from the command line.

use anyhow::{bail, Result};
use log::info;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::constants::{
    BUCKET_ID_MULTIPLIER, CENSUS_GEOCODER_BASE_URL, DEFAULT_BENCHMARK, DEFAULT_VINTAGE,
};
use crate::utils::env::{string_or, var_or};

#[derive(Debug, Clone)]
pub struct GeocodeConfig {
    /// Rows per batch submission
    pub chunk_size: usize,
    /// Pause between consecutive submissions
    pub chunk_delay_ms: u64,
    pub base_url: String,
    pub benchmark: String,
    pub vintage: String,
    /// Timeout for a single batch upload
    pub request_timeout_secs: u64,
    /// Timeout for a single one-line lookup
    pub lookup_timeout_secs: u64,
    /// Attempts per chunk, including the first
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    /// Where per-chunk request files are written
    pub tmp_dir: PathBuf,
    /// Continue from a matching checkpoint instead of starting over
    pub resume: bool,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_delay_ms: 1000,
            base_url: CENSUS_GEOCODER_BASE_URL.to_string(),
            benchmark: DEFAULT_BENCHMARK.to_string(),
            vintage: DEFAULT_VINTAGE.to_string(),
            request_timeout_secs: 300,
            lookup_timeout_secs: 10,
            max_attempts: 4,
            base_backoff_ms: 2000,
            tmp_dir: PathBuf::from("./tmp"),
            resume: true,
        }
    }
}

impl GeocodeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: var_or("GEOCODE_CHUNK_SIZE", defaults.chunk_size),
            chunk_delay_ms: var_or("GEOCODE_CHUNK_DELAY_MS", defaults.chunk_delay_ms),
            base_url: string_or("GEOCODE_BASE_URL", &defaults.base_url),
            benchmark: string_or("GEOCODE_BENCHMARK", &defaults.benchmark),
            vintage: string_or("GEOCODE_VINTAGE", &defaults.vintage),
            request_timeout_secs: var_or(
                "GEOCODE_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
            lookup_timeout_secs: var_or("GEOCODE_LOOKUP_TIMEOUT_SECS", defaults.lookup_timeout_secs),
            max_attempts: var_or("GEOCODE_MAX_ATTEMPTS", defaults.max_attempts),
            base_backoff_ms: var_or("GEOCODE_BASE_BACKOFF_MS", defaults.base_backoff_ms),
            tmp_dir: PathBuf::from(string_or(
                "GEOCODE_TMP_DIR",
                &defaults.tmp_dir.to_string_lossy(),
            )),
            resume: var_or("GEOCODE_RESUME", defaults.resume),
        }
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Grid cell width in degrees
    pub bucket_size: f64,
    /// Bounding-box half-width in degrees for the candidate filter
    pub radius: f64,
    /// Queries per progress batch
    pub batch_size: usize,
    /// Blocking tasks used for matching
    pub workers: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            bucket_size: 0.01,
            radius: 0.001,
            batch_size: 1000,
            workers: num_cpus::get(),
        }
    }
}

impl MatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bucket_size: var_or("MATCH_BUCKET_SIZE", defaults.bucket_size),
            radius: var_or("MATCH_RADIUS", defaults.radius),
            batch_size: var_or("MATCH_BATCH_SIZE", defaults.batch_size),
            workers: var_or("MATCH_WORKERS", defaults.workers),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.bucket_size.is_finite() || self.bucket_size <= 0.0 {
            bail!("bucket_size must be a positive number, got {}", self.bucket_size);
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            bail!("radius must be a positive number, got {}", self.radius);
        }
        // A wider radius would reach past the 3x3 neighborhood.
        if self.radius > self.bucket_size {
            bail!(
                "radius ({}) must not exceed bucket_size ({})",
                self.radius,
                self.bucket_size
            );
        }
        let max_lon_bucket = (180.0 / self.bucket_size).ceil() as i64 + 1;
        if max_lon_bucket * 2 >= BUCKET_ID_MULTIPLIER {
            bail!(
                "bucket_size {} is too fine: longitude buckets would collide in the bucket id",
                self.bucket_size
            );
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        Ok(())
    }
}

/// Source column names for the address table and the reference listings.
#[derive(Debug, Clone)]
pub struct ColumnConfig {
    pub address_id: String,
    pub address_street: String,
    pub address_city: String,
    pub address_state: String,
    pub address_zip: String,
    pub reference_latitude: String,
    pub reference_longitude: String,
    pub reference_street: String,
    pub reference_city: String,
    pub reference_state: String,
    pub reference_zip: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            address_id: "DOT_NUMBER".to_string(),
            address_street: "PHY_STREET".to_string(),
            address_city: "PHY_CITY".to_string(),
            address_state: "PHY_STATE".to_string(),
            address_zip: "PHY_ZIP".to_string(),
            reference_latitude: "latitude".to_string(),
            reference_longitude: "longitude".to_string(),
            reference_street: "address_line_1".to_string(),
            reference_city: "city".to_string(),
            reference_state: "state".to_string(),
            reference_zip: "zipcode".to_string(),
        }
    }
}

impl ColumnConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            address_id: string_or("ADDRESS_ID_COLUMN", &d.address_id),
            address_street: string_or("ADDRESS_STREET_COLUMN", &d.address_street),
            address_city: string_or("ADDRESS_CITY_COLUMN", &d.address_city),
            address_state: string_or("ADDRESS_STATE_COLUMN", &d.address_state),
            address_zip: string_or("ADDRESS_ZIP_COLUMN", &d.address_zip),
            reference_latitude: string_or("REFERENCE_LATITUDE_COLUMN", &d.reference_latitude),
            reference_longitude: string_or("REFERENCE_LONGITUDE_COLUMN", &d.reference_longitude),
            reference_street: string_or("REFERENCE_STREET_COLUMN", &d.reference_street),
            reference_city: string_or("REFERENCE_CITY_COLUMN", &d.reference_city),
            reference_state: string_or("REFERENCE_STATE_COLUMN", &d.reference_state),
            reference_zip: string_or("REFERENCE_ZIP_COLUMN", &d.reference_zip),
        }
    }

    pub fn address_columns(&self) -> [&str; 5] {
        [
            &self.address_id,
            &self.address_street,
            &self.address_city,
            &self.address_state,
            &self.address_zip,
        ]
    }

    pub fn reference_address_columns(&self) -> [&str; 4] {
        [
            &self.reference_street,
            &self.reference_city,
            &self.reference_state,
            &self.reference_zip,
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub geocode: GeocodeConfig,
    pub matching: MatchConfig,
    pub columns: ColumnConfig,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            geocode: GeocodeConfig::from_env(),
            matching: MatchConfig::from_env(),
            columns: ColumnConfig::from_env(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.geocode.validate()?;
        self.matching.validate()?;
        Ok(())
    }

    pub fn log_config(&self) {
        info!("⚙️  Configuration:");
        info!(
            "   • Geocode: chunk_size={}, delay={}ms, benchmark={}, timeout={}s, attempts={}",
            self.geocode.chunk_size,
            self.geocode.chunk_delay_ms,
            self.geocode.benchmark,
            self.geocode.request_timeout_secs,
            self.geocode.max_attempts
        );
        info!(
            "   • Match: bucket_size={}, radius={}, batch_size={}, workers={}",
            self.matching.bucket_size,
            self.matching.radius,
            self.matching.batch_size,
            self.matching.workers
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.geocode.chunk_size, 1000);
        assert_eq!(config.geocode.chunk_delay_ms, 1000);
        assert_eq!(config.geocode.benchmark, "Public_AR_Current");
        assert_eq!(config.matching.bucket_size, 0.01);
        assert_eq!(config.matching.radius, 0.001);
        assert_eq!(config.matching.batch_size, 1000);
        assert!(config.matching.workers >= 1);
        assert_eq!(config.columns.address_id, "DOT_NUMBER");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_config() {
        env::set_var("GEOCODE_CHUNK_SIZE", "250");
        env::set_var("GEOCODE_MAX_ATTEMPTS", "not-a-number");
        env::set_var("MATCH_RADIUS", "0.002");

        let geocode = GeocodeConfig::from_env();
        let matching = MatchConfig::from_env();
        assert_eq!(geocode.chunk_size, 250);
        assert_eq!(geocode.max_attempts, 4);
        assert_eq!(matching.radius, 0.002);

        env::remove_var("GEOCODE_CHUNK_SIZE");
        env::remove_var("GEOCODE_MAX_ATTEMPTS");
        env::remove_var("MATCH_RADIUS");
    }

    #[test]
    fn test_radius_wider_than_bucket_is_rejected() {
        let config = MatchConfig {
            bucket_size: 0.01,
            radius: 0.02,
            ..MatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bucket_size_too_fine_for_bucket_id_is_rejected() {
        let config = MatchConfig {
            bucket_size: 0.001,
            radius: 0.0005,
            ..MatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bucket_size_limit_for_bucket_id() {
        // 0.0037 keeps (48649 + 1) * 2 = 97300 below the multiplier, 0.0036 reaches 100002
        let accepted = MatchConfig {
            bucket_size: 0.0037,
            radius: 0.0037,
            ..MatchConfig::default()
        };
        assert!(accepted.validate().is_ok());
        let rejected = MatchConfig {
            bucket_size: 0.0036,
            radius: 0.0036,
            ..MatchConfig::default()
        };
        assert!(rejected.validate().is_err());
        assert!(MatchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let config = GeocodeConfig {
            chunk_size: 0,
            ..GeocodeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
