// src/matching/mod.rs
pub mod address;
pub mod fuzzy;
pub mod manager;
pub mod spatial_index;

pub use address::{match_all, SpatialFuzzyMatcher};
pub use spatial_index::SpatialIndex;
