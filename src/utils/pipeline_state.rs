// src/utils/pipeline_state.rs
//! Chunk-level checkpointing for the geocode submitter.
//!
//! The raw response artifact is appended chunk by chunk. After every append
//! the checkpoint records how many chunks and bytes are durable, so a later
//! run can truncate any torn tail and continue with the next chunk.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::AddressRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeCheckpoint {
    pub input_fingerprint: String,
    pub chunk_size: usize,
    pub chunks_total: usize,
    pub completed_chunks: usize,
    pub raw_bytes_written: u64,
    pub lines_written: usize,
    pub updated_at: DateTime<Utc>,
}

impl GeocodeCheckpoint {
    pub fn new(input_fingerprint: String, chunk_size: usize, chunks_total: usize) -> Self {
        Self {
            input_fingerprint,
            chunk_size,
            chunks_total,
            completed_chunks: 0,
            raw_bytes_written: 0,
            lines_written: 0,
            updated_at: Utc::now(),
        }
    }

    /// True when this checkpoint was produced from the same input and chunking.
    pub fn is_compatible(&self, input_fingerprint: &str, chunk_size: usize, chunks_total: usize) -> bool {
        self.input_fingerprint == input_fingerprint
            && self.chunk_size == chunk_size
            && self.chunks_total == chunks_total
    }

    pub fn record_chunk(&mut self, bytes: u64, lines: usize) {
        self.completed_chunks += 1;
        self.raw_bytes_written += bytes;
        self.lines_written += lines;
        self.updated_at = Utc::now();
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        match serde_json::from_str(&contents) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                warn!("Ignoring unreadable checkpoint {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Writes to a sibling temp file and renames it over the checkpoint.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("Failed to serialize checkpoint")?;
        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write checkpoint {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move checkpoint into {}", path.display()))?;
        debug!(
            "Checkpoint saved: {}/{} chunks, {} bytes",
            self.completed_chunks, self.chunks_total, self.raw_bytes_written
        );
        Ok(())
    }

    pub fn clear(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove checkpoint {}", path.display()))?;
        }
        Ok(())
    }
}

/// `geocode_results_raw.txt` → `geocode_results_raw.txt.checkpoint.json`
pub fn checkpoint_path_for(raw_output: &Path) -> PathBuf {
    let mut name = raw_output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".checkpoint.json");
    raw_output.with_file_name(name)
}

/// SHA-256 over every address field, so a checkpoint is only reused for the same input.
pub fn fingerprint_records(records: &[AddressRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        for field in [&record.id, &record.street, &record.city, &record.state, &record.zip] {
            hasher.update(field.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<AddressRecord> {
        vec![
            AddressRecord::new("1", "1 Main St", "Albany", "NY", "12207"),
            AddressRecord::new("2", "2 Elm St", "Troy", "NY", "12180"),
        ]
    }

    #[test]
    fn test_fingerprint_is_stable_and_field_sensitive() {
        let a = fingerprint_records(&records());
        let b = fingerprint_records(&records());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let mut changed = records();
        changed[1].zip = "12181".to_string();
        assert_ne!(a, fingerprint_records(&changed));

        // Field boundaries matter: "1 Main" + "St" differs from "1 Main St" + "".
        let shifted = vec![AddressRecord::new("1", "1 Main", "St", "", "")];
        let joined = vec![AddressRecord::new("1", "1 Main St", "", "", "")];
        assert_ne!(fingerprint_records(&shifted), fingerprint_records(&joined));
    }

    #[test]
    fn test_checkpoint_save_load_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.txt");
        let path = checkpoint_path_for(&raw);
        assert_eq!(path.file_name().unwrap(), "raw.txt.checkpoint.json");
        assert!(GeocodeCheckpoint::load(&path).unwrap().is_none());

        let mut checkpoint = GeocodeCheckpoint::new("abc".to_string(), 1000, 3);
        checkpoint.record_chunk(120, 4);
        checkpoint.save(&path).unwrap();

        let loaded = GeocodeCheckpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded.completed_chunks, 1);
        assert_eq!(loaded.raw_bytes_written, 120);
        assert_eq!(loaded.lines_written, 4);
        assert!(loaded.is_compatible("abc", 1000, 3));
        assert!(!loaded.is_compatible("abc", 500, 3));

        GeocodeCheckpoint::clear(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_checkpoint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.txt.checkpoint.json");
        fs::write(&path, "{not json").unwrap();
        assert!(GeocodeCheckpoint::load(&path).unwrap().is_none());
    }
}
