// src/geocoding/mod.rs
pub mod client;
pub mod lookup;
pub mod manager;
pub mod parser;
pub mod submitter;

pub use client::{BatchGeocoder, CensusBatchGeocoder, GeocoderStatusError};
pub use submitter::{GeocodeOutcome, GeocodeSubmitter};
