// src/models/address.rs
use serde::{Deserialize, Serialize};

/// Number of positional fields in a census batch geocoder response line.
pub const RAW_GEOCODE_COLUMNS: usize = 8;

/// Row index reported when no reference listing matched.
pub const NO_MATCH_ROW_INDEX: i64 = -1;

/// One motor carrier address as read from the census extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub id: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl AddressRecord {
    pub fn new(
        id: impl Into<String>,
        street: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        zip: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            street: street.into(),
            city: city.into(),
            state: state.into(),
            zip: zip.into(),
        }
    }
}

/// A response line after padding: always eight slots, absent trailing fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawGeocodeLine {
    pub id: Option<String>,
    pub input_address: Option<String>,
    pub match_status: Option<String>,
    pub match_type: Option<String>,
    pub matched_address: Option<String>,
    pub lonlat: Option<String>,
    pub tiger_line_id: Option<String>,
    pub side: Option<String>,
}

impl RawGeocodeLine {
    /// Builds a padded line from however many fields the geocoder supplied.
    /// Text is kept byte for byte. Empty cells count as missing and anything
    /// past the eighth field is dropped.
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut slots: [Option<String>; RAW_GEOCODE_COLUMNS] = Default::default();
        for (slot, field) in slots.iter_mut().zip(fields) {
            let value = field.as_ref();
            if !value.is_empty() {
                *slot = Some(value.to_string());
            }
        }
        let [id, input_address, match_status, match_type, matched_address, lonlat, tiger_line_id, side] =
            slots;
        Self {
            id,
            input_address,
            match_status,
            match_type,
            matched_address,
            lonlat,
            tiger_line_id,
            side,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    Match,
    Tie,
    NoMatch,
}

impl MatchStatus {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "match" => Some(Self::Match),
            "tie" => Some(Self::Tie),
            "no_match" | "no match" | "nomatch" => Some(Self::NoMatch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Match => "Match",
            Self::Tie => "Tie",
            Self::NoMatch => "No_Match",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchType {
    Exact,
    NonExact,
}

impl MatchType {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "non_exact" | "non exact" | "nonexact" => Some(Self::NonExact),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "Exact",
            Self::NonExact => "Non_Exact",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreetSide {
    Left,
    Right,
}

impl StreetSide {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "L" | "l" => Some(Self::Left),
            "R" | "r" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "L",
            Self::Right => "R",
        }
    }
}

/// Normalized geocoder output. `lat` and `lon` are either both set or both `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeocodedAddress {
    pub id: Option<String>,
    pub input_address: Option<String>,
    pub match_status: Option<MatchStatus>,
    pub match_type: Option<MatchType>,
    pub matched_address: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub tiger_line_id: Option<String>,
    pub side: Option<StreetSide>,
}

impl GeocodedAddress {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// One business listing from the reference dataset. `row_index` is its position in the source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceListing {
    pub row_index: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub best_match: Option<String>,
    pub confidence: f64,
    pub reference_row_index: i64,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            best_match: None,
            confidence: 0.0,
            reference_row_index: NO_MATCH_ROW_INDEX,
        }
    }

    pub fn is_match(&self) -> bool {
        self.reference_row_index != NO_MATCH_ROW_INDEX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_fields_are_padded_with_none() {
        let line = RawGeocodeLine::from_fields(["123", "1 Main St, X, Y, 12345", "No_Match"]);
        assert_eq!(line.id.as_deref(), Some("123"));
        assert_eq!(line.match_status.as_deref(), Some("No_Match"));
        assert!(line.match_type.is_none());
        assert!(line.matched_address.is_none());
        assert!(line.lonlat.is_none());
        assert!(line.tiger_line_id.is_none());
        assert!(line.side.is_none());
    }

    #[test]
    fn test_extra_fields_are_dropped_and_blanks_are_none() {
        let fields = ["1", "", "Match", "Exact", "A", "-73,40", "99", "L", "extra"];
        let line = RawGeocodeLine::from_fields(fields);
        assert!(line.input_address.is_none());
        assert_eq!(line.side.as_deref(), Some("L"));
    }

    #[test]
    fn test_field_text_is_not_trimmed() {
        let line = RawGeocodeLine::from_fields(["7", " 1 Main St, X, Y, 12345 ", "Match", "Exact", "1 MAIN ST "]);
        assert_eq!(line.input_address.as_deref(), Some(" 1 Main St, X, Y, 12345 "));
        assert_eq!(line.matched_address.as_deref(), Some("1 MAIN ST "));
    }

    #[test]
    fn test_categorical_tokens() {
        assert_eq!(MatchStatus::parse("No_Match"), Some(MatchStatus::NoMatch));
        assert_eq!(MatchStatus::parse(" Tie "), Some(MatchStatus::Tie));
        assert_eq!(MatchStatus::parse("Maybe"), None);
        assert_eq!(MatchType::parse("Non_Exact"), Some(MatchType::NonExact));
        assert_eq!(StreetSide::parse("R"), Some(StreetSide::Right));
        assert_eq!(MatchStatus::NoMatch.as_str(), "No_Match");
    }

    #[test]
    fn test_no_match_result() {
        let result = MatchResult::no_match();
        assert!(result.best_match.is_none());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.reference_row_index, NO_MATCH_ROW_INDEX);
        assert!(!result.is_match());
    }
}
