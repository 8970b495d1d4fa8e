pub mod address;
pub mod stats_models;

pub use address::{
    AddressRecord, GeocodedAddress, MatchResult, MatchStatus, MatchType, RawGeocodeLine,
    ReferenceListing, StreetSide, NO_MATCH_ROW_INDEX,
};
