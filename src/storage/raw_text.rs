// src/storage/raw_text.rs
use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Reads the raw geocoder artifact, one entry per line. A trailing `\r` is stripped.
pub fn read_raw_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("opening raw artifact {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut lines = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {} of {}", n + 1, path.display()))?;
        lines.push(line.trim_end_matches('\r').to_string());
    }
    Ok(lines)
}

pub fn write_raw_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut writer = RawArtifactWriter::open(path, 0)?;
    writer.append_lines(lines)?;
    writer.sync()
}

/// Append-only writer for the raw artifact.
///
/// Opening at `offset` drops anything past it, so a tail written after the
/// last checkpoint is discarded before the next chunk lands.
pub struct RawArtifactWriter {
    path: PathBuf,
    file: File,
}

impl RawArtifactWriter {
    pub fn open(path: &Path, offset: u64) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        if offset > 0 {
            let existing = fs::metadata(path)
                .with_context(|| format!("raw artifact {} is missing", path.display()))?
                .len();
            if existing < offset {
                bail!(
                    "raw artifact {} holds {} bytes but the checkpoint expects {}",
                    path.display(),
                    existing,
                    offset
                );
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(offset == 0)
            .open(path)
            .with_context(|| format!("opening raw artifact {}", path.display()))?;
        file.set_len(offset)
            .with_context(|| format!("truncating {} to {} bytes", path.display(), offset))?;
        let mut writer = Self {
            path: path.to_path_buf(),
            file,
        };
        writer.seek_end()?;
        Ok(writer)
    }

    fn seek_end(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::End(0))
            .with_context(|| format!("seeking in {}", self.path.display()))?;
        Ok(())
    }

    /// Appends each line followed by `\n` and returns the bytes written.
    pub fn append_lines(&mut self, lines: &[String]) -> Result<u64> {
        let mut buffer = Vec::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            buffer.extend_from_slice(line.as_bytes());
            buffer.push(b'\n');
        }
        self.file
            .write_all(&buffer)
            .with_context(|| format!("appending to {}", self.path.display()))?;
        Ok(buffer.len() as u64)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file
            .flush()
            .and_then(|_| self.file.sync_data())
            .with_context(|| format!("syncing {}", self.path.display()))
    }
}
