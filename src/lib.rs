pub mod geocoding;
pub mod matching;
pub mod models;
pub mod storage;
pub mod utils;
