// src/geocoding/lookup.rs
//! Single-address lookup against the census `geographies/onelineaddress` endpoint.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::geocoding::client::GeocoderStatusError;
use crate::utils::config::GeocodeConfig;
use crate::utils::constants::ONE_LINE_ADDRESS_PATH;

const CENSUS_TRACTS_LAYER: &str = "Census Tracts";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressGeography {
    pub matched_address: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub state_fips: Option<String>,
    pub county_fips: Option<String>,
    pub tract_fips: Option<String>,
    pub geoid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupEnvelope {
    result: LookupResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResult {
    #[serde(default)]
    address_matches: Vec<AddressMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressMatch {
    matched_address: Option<String>,
    coordinates: MatchCoordinates,
    #[serde(default)]
    geographies: HashMap<String, Vec<GeographyUnit>>,
}

#[derive(Debug, Deserialize)]
struct MatchCoordinates {
    x: f64,
    y: f64,
}

#[derive(Debug, Deserialize)]
struct GeographyUnit {
    #[serde(rename = "STATE")]
    state: Option<String>,
    #[serde(rename = "COUNTY")]
    county: Option<String>,
    #[serde(rename = "TRACT")]
    tract: Option<String>,
    #[serde(rename = "GEOID")]
    geoid: Option<String>,
}

/// Decodes a lookup response body. `None` when the geocoder found no match.
pub fn parse_lookup_response(body: &str) -> Result<Option<AddressGeography>> {
    let envelope: LookupEnvelope =
        serde_json::from_str(body).context("decoding onelineaddress response")?;
    let Some(first) = envelope.result.address_matches.into_iter().next() else {
        return Ok(None);
    };
    let tract = first
        .geographies
        .get(CENSUS_TRACTS_LAYER)
        .and_then(|units| units.first());

    Ok(Some(AddressGeography {
        matched_address: first.matched_address,
        lat: first.coordinates.y,
        lon: first.coordinates.x,
        state_fips: tract.and_then(|t| t.state.clone()),
        county_fips: tract.and_then(|t| t.county.clone()),
        tract_fips: tract.and_then(|t| t.tract.clone()),
        geoid: tract.and_then(|t| t.geoid.clone()),
    }))
}

pub struct OneLineLookup {
    http: reqwest::Client,
    endpoint: String,
    benchmark: String,
    vintage: String,
}

impl OneLineLookup {
    pub fn new(config: &GeocodeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.lookup_timeout())
            .build()
            .context("Failed to build census lookup HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                ONE_LINE_ADDRESS_PATH
            ),
            benchmark: config.benchmark.clone(),
            vintage: config.vintage.clone(),
        })
    }

    pub async fn lookup(&self, address: &str) -> Result<Option<AddressGeography>> {
        debug!("Looking up '{}' via {}", address, self.endpoint);
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("address", address),
                ("benchmark", self.benchmark.as_str()),
                ("vintage", self.vintage.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .with_context(|| format!("requesting lookup for '{}'", address))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("reading lookup response body")?;
        if !status.is_success() {
            return Err(anyhow::Error::new(GeocoderStatusError {
                status: status.as_u16(),
                body,
            }))
            .with_context(|| format!("lookup for '{}' rejected", address));
        }
        parse_lookup_response(&body)
    }
}

pub async fn lookup_one_line_address(
    config: &GeocodeConfig,
    address: &str,
) -> Result<Option<AddressGeography>> {
    OneLineLookup::new(config)?.lookup(address).await
}
