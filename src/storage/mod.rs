// src/storage/mod.rs
pub mod address_table;
pub mod geocoded_table;
pub mod match_table;
pub mod parquet_io;
pub mod raw_text;
pub mod reference;
