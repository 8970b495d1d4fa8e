// src/geocoding/parser.rs
//! Tolerant parsing of census batch geocoder response lines.
//!
//! Lines are CSV-quoted but their field count varies: unmatched addresses
//! stop after the status column. Every line produces exactly one row, and a
//! line that cannot be read at all becomes a row of `None`s.

use crate::models::stats_models::ParseStageStats;
use crate::models::{GeocodedAddress, MatchStatus, MatchType, RawGeocodeLine, StreetSide};
use crate::models::address::RAW_GEOCODE_COLUMNS;

/// Field count observed on a line before padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineShape {
    Complete,
    Short(usize),
    Overlong(usize),
    Malformed,
}

fn split_fields(line: &str) -> Option<Vec<String>> {
    if line.trim().is_empty() {
        return None;
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Some(record.iter().map(str::to_string).collect()),
        Ok(false) | Err(_) => None,
    }
}

/// Splits a line into exactly eight positional fields, reporting its original shape.
pub fn parse_with_shape(line: &str) -> (RawGeocodeLine, LineShape) {
    match split_fields(line) {
        None => (RawGeocodeLine::default(), LineShape::Malformed),
        Some(fields) => {
            let shape = match fields.len() {
                n if n == RAW_GEOCODE_COLUMNS => LineShape::Complete,
                n if n < RAW_GEOCODE_COLUMNS => LineShape::Short(n),
                n => LineShape::Overlong(n),
            };
            (RawGeocodeLine::from_fields(fields), shape)
        }
    }
}

pub fn parse_with_padding(line: &str) -> RawGeocodeLine {
    parse_with_shape(line).0
}

/// `"lon,lat"` to `(lat, lon)`. Anything but two finite numbers yields `None`.
pub fn parse_coordinates(lonlat: &str) -> Option<(f64, f64)> {
    let mut parts = lonlat.split(',');
    let lon = parts.next()?.trim().parse::<f64>().ok()?;
    let lat = parts.next()?.trim().parse::<f64>().ok()?;
    if parts.next().is_some() || !lon.is_finite() || !lat.is_finite() {
        return None;
    }
    Some((lat, lon))
}

fn categorical<T>(token: Option<&str>, parse: fn(&str) -> Option<T>, unrecognized: &mut usize) -> Option<T> {
    let token = token?;
    let parsed = parse(token);
    if parsed.is_none() {
        *unrecognized += 1;
    }
    parsed
}

/// Normalizes a padded line, counting anything it had to drop.
pub fn normalize_line(raw: RawGeocodeLine, stats: &mut ParseStageStats) -> GeocodedAddress {
    let match_status = categorical(raw.match_status.as_deref(), MatchStatus::parse, &mut stats.unrecognized_tokens);
    let match_type = categorical(raw.match_type.as_deref(), MatchType::parse, &mut stats.unrecognized_tokens);
    let side = categorical(raw.side.as_deref(), StreetSide::parse, &mut stats.unrecognized_tokens);
    let coordinates = raw.lonlat.as_deref().and_then(parse_coordinates);

    match match_status {
        Some(MatchStatus::Match) => stats.matched += 1,
        Some(MatchStatus::Tie) => stats.tied += 1,
        Some(MatchStatus::NoMatch) => stats.no_match += 1,
        None => {}
    }
    if coordinates.is_some() {
        stats.with_coordinates += 1;
    }

    GeocodedAddress {
        id: raw.id,
        input_address: raw.input_address,
        match_status,
        match_type,
        matched_address: raw.matched_address,
        lat: coordinates.map(|(lat, _)| lat),
        lon: coordinates.map(|(_, lon)| lon),
        tiger_line_id: raw.tiger_line_id,
        side,
    }
}

pub fn parse_line(line: &str) -> GeocodedAddress {
    normalize_line(parse_with_padding(line), &mut ParseStageStats::default())
}

/// One output row per input line, in input order.
pub fn parse_lines<S: AsRef<str>>(lines: &[S]) -> (Vec<GeocodedAddress>, ParseStageStats) {
    let mut stats = ParseStageStats {
        lines_total: lines.len(),
        ..ParseStageStats::default()
    };
    let mut rows = Vec::with_capacity(lines.len());
    for line in lines {
        let (raw, shape) = parse_with_shape(line.as_ref());
        match shape {
            LineShape::Complete => {}
            LineShape::Short(_) => stats.short_rows += 1,
            LineShape::Overlong(_) => stats.overlong_rows += 1,
            LineShape::Malformed => stats.malformed_rows += 1,
        }
        rows.push(normalize_line(raw, &mut stats));
    }
    (rows, stats)
}
