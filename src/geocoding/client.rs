// src/geocoding/client.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::fmt;
use std::path::Path;

use crate::utils::config::GeocodeConfig;
use crate::utils::constants::ADDRESS_BATCH_PATH;

/// Submits one request file to a batch geocoder and returns the raw response text.
#[async_trait]
pub trait BatchGeocoder: Send + Sync {
    async fn submit_chunk(&self, chunk_index: usize, request_file: &Path) -> Result<String>;
}

/// Non-success HTTP response from the geocoder.
#[derive(Debug, Clone)]
pub struct GeocoderStatusError {
    pub status: u16,
    pub body: String,
}

impl fmt::Display for GeocoderStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snippet: String = self.body.chars().take(200).collect();
        write!(f, "geocoder returned HTTP {}: {}", self.status, snippet)
    }
}

impl std::error::Error for GeocoderStatusError {}

/// Timeouts, connection failures, HTTP 5xx and 429 are worth retrying; nothing else is.
pub fn is_transient(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(status_err) = cause.downcast_ref::<GeocoderStatusError>() {
            return status_err.status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                || (500..600).contains(&status_err.status);
        }
        if let Some(http_err) = cause.downcast_ref::<reqwest::Error>() {
            if http_err.is_timeout() || http_err.is_connect() {
                return true;
            }
            if let Some(status) = http_err.status() {
                return status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            }
            return false;
        }
    }
    false
}

pub struct CensusBatchGeocoder {
    http: reqwest::Client,
    endpoint: String,
    benchmark: String,
}

impl CensusBatchGeocoder {
    pub fn new(config: &GeocodeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build census geocoder HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                ADDRESS_BATCH_PATH
            ),
            benchmark: config.benchmark.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BatchGeocoder for CensusBatchGeocoder {
    async fn submit_chunk(&self, chunk_index: usize, request_file: &Path) -> Result<String> {
        let payload = tokio::fs::read(request_file)
            .await
            .with_context(|| format!("reading request file {}", request_file.display()))?;
        let file_name = request_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("addresses_{}.csv", chunk_index));
        let part = Part::bytes(payload)
            .file_name(file_name)
            .mime_str("text/csv")
            .context("building multipart file part")?;
        let form = Form::new().part("addressFile", part);

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("benchmark", self.benchmark.as_str())])
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("sending chunk {} to {}", chunk_index, self.endpoint))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("reading response body for chunk {}", chunk_index))?;
        if !status.is_success() {
            return Err(anyhow::Error::new(GeocoderStatusError {
                status: status.as_u16(),
                body,
            }))
            .with_context(|| format!("chunk {} rejected", chunk_index));
        }
        Ok(body)
    }
}
