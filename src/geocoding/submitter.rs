// src/geocoding/submitter.rs
//! Chunked submission of the address table to the batch geocoder.
//!
//! Chunks go out strictly in order, one at a time, with a pause between
//! them. Each chunk's response lines are appended to the raw artifact and a
//! checkpoint is saved before the next chunk starts.

use anyhow::{bail, Context, Result};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::geocoding::client::{is_transient, BatchGeocoder};
use crate::models::stats_models::{GeocodeStageStats, PipelineStage};
use crate::models::AddressRecord;
use crate::storage::address_table::serialize_chunk;
use crate::storage::raw_text::{read_raw_lines, RawArtifactWriter};
use crate::utils::config::GeocodeConfig;
use crate::utils::constants::MAX_BACKOFF_EXPONENT;
use crate::utils::get_memory_usage;
use crate::utils::pipeline_state::{checkpoint_path_for, fingerprint_records, GeocodeCheckpoint};
use crate::utils::progress_bars::logging::StageLogger;
use crate::utils::progress_bars::progress_config::ProgressConfig;

#[derive(Debug, Clone)]
pub struct GeocodeOutcome {
    /// Every response line, in chunk order, as written to the raw artifact
    pub lines: Vec<String>,
    pub stats: GeocodeStageStats,
}

pub struct GeocodeSubmitter {
    geocoder: Arc<dyn BatchGeocoder>,
    config: GeocodeConfig,
    progress: ProgressConfig,
}

impl GeocodeSubmitter {
    pub fn new(geocoder: Arc<dyn BatchGeocoder>, config: GeocodeConfig, progress: ProgressConfig) -> Self {
        Self {
            geocoder,
            config,
            progress,
        }
    }

    /// Geocodes `records` in chunks and writes every response line to `raw_output`.
    pub async fn submit_all(
        &self,
        records: &[AddressRecord],
        raw_output: &Path,
        run_id: &str,
    ) -> Result<GeocodeOutcome> {
        self.config.validate()?;
        if records.is_empty() {
            bail!("address table is empty; nothing to geocode");
        }

        let logger = StageLogger::new(PipelineStage::Geocode);
        let chunk_size = self.config.chunk_size;
        let chunks_total = (records.len() + chunk_size - 1) / chunk_size;
        logger.log_start(
            run_id,
            &format!(
                "{} rows, {} chunks of up to {}, benchmark {}, {}ms between chunks",
                records.len(),
                chunks_total,
                chunk_size,
                self.config.benchmark,
                self.config.chunk_delay_ms
            ),
        );

        let fingerprint = fingerprint_records(records);
        let checkpoint_path = checkpoint_path_for(raw_output);
        let mut stats = GeocodeStageStats {
            rows_total: records.len(),
            chunks_total,
            ..GeocodeStageStats::default()
        };

        let (mut checkpoint, mut writer, mut lines) = self.prepare_output(
            &fingerprint,
            chunks_total,
            raw_output,
            &checkpoint_path,
            &logger,
        )?;
        let start_chunk = checkpoint.completed_chunks;
        if start_chunk > 0 {
            stats.resumed_from_chunk = Some(start_chunk);
        }

        tokio::fs::create_dir_all(&self.config.tmp_dir)
            .await
            .with_context(|| format!("creating temp directory {}", self.config.tmp_dir.display()))?;

        let pb = self.progress.create_bar(chunks_total as u64, "🛰️", "chunks");
        pb.set_position(start_chunk as u64);

        for chunk_index in start_chunk..chunks_total {
            let start = chunk_index * chunk_size;
            let end = (start + chunk_size).min(records.len());
            let chunk = &records[start..end];

            let request_file = self.write_request_file(chunk_index, chunk).await?;
            let submitted = self
                .submit_with_retry(chunk_index, chunks_total, &request_file, &logger, &mut stats)
                .await;
            remove_request_file(&request_file, &logger).await;

            let body = match submitted {
                Ok(body) => body,
                Err(e) => {
                    pb.abandon_with_message("failed");
                    return Err(e).with_context(|| {
                        format!(
                            "geocoding halted at chunk {}/{}: {} chunks ({} rows) completed before the failure; rerun to resume",
                            chunk_index + 1,
                            chunks_total,
                            checkpoint.completed_chunks,
                            start
                        )
                    });
                }
            };

            let chunk_lines: Vec<String> = body.lines().map(str::to_string).collect();
            let bytes = writer.append_lines(&chunk_lines)?;
            writer.sync()?;
            checkpoint.record_chunk(bytes, chunk_lines.len());
            checkpoint.save(&checkpoint_path)?;

            stats.chunks_completed = checkpoint.completed_chunks;
            stats.rows_submitted += chunk.len();
            logger.log_chunk_progress(chunk_index + 1, chunks_total, chunk.len(), chunk_lines.len());
            if chunk_lines.len() != chunk.len() {
                logger.log_warning(&format!(
                    "chunk {} returned {} lines for {} rows",
                    chunk_index + 1,
                    chunk_lines.len(),
                    chunk.len()
                ));
            }
            lines.extend(chunk_lines);
            pb.inc(1);

            if chunk_index + 1 < chunks_total {
                sleep(self.config.chunk_delay()).await;
            }
        }
        pb.finish_with_message("done");

        GeocodeCheckpoint::clear(&checkpoint_path)?;
        stats.chunks_completed = chunks_total;
        stats.lines_received = lines.len();

        if self.progress.should_show_memory() {
            logger.log_memory(get_memory_usage().await);
        }
        logger.log_completion(&format!(
            "{} response lines for {} rows written to {} ({} retries)",
            stats.lines_received,
            stats.rows_total,
            raw_output.display(),
            stats.retries
        ));

        Ok(GeocodeOutcome { lines, stats })
    }

    /// Picks up a compatible checkpoint or starts a fresh artifact.
    fn prepare_output(
        &self,
        fingerprint: &str,
        chunks_total: usize,
        raw_output: &Path,
        checkpoint_path: &Path,
        logger: &StageLogger,
    ) -> Result<(GeocodeCheckpoint, RawArtifactWriter, Vec<String>)> {
        let fresh = GeocodeCheckpoint::new(fingerprint.to_string(), self.config.chunk_size, chunks_total);

        if !self.config.resume {
            GeocodeCheckpoint::clear(checkpoint_path)?;
            let writer = RawArtifactWriter::open(raw_output, 0)?;
            return Ok((fresh, writer, Vec::new()));
        }

        let existing = match GeocodeCheckpoint::load(checkpoint_path)? {
            Some(existing) => existing,
            None => {
                let writer = RawArtifactWriter::open(raw_output, 0)?;
                return Ok((fresh, writer, Vec::new()));
            }
        };

        if !existing.is_compatible(fingerprint, self.config.chunk_size, chunks_total) {
            bail!(
                "checkpoint {} was written for a different input or chunk size; \
                 delete it or disable resume to start over",
                checkpoint_path.display()
            );
        }

        let writer = RawArtifactWriter::open(raw_output, existing.raw_bytes_written)?;
        let lines = read_raw_lines(raw_output)?;
        if lines.len() != existing.lines_written {
            bail!(
                "raw artifact {} holds {} lines but checkpoint {} recorded {}",
                raw_output.display(),
                lines.len(),
                checkpoint_path.display(),
                existing.lines_written
            );
        }
        logger.log_resume(existing.completed_chunks, chunks_total, lines.len());
        Ok((existing, writer, lines))
    }

    async fn write_request_file(&self, chunk_index: usize, chunk: &[AddressRecord]) -> Result<PathBuf> {
        let payload = serialize_chunk(chunk)?;
        let path = self
            .config
            .tmp_dir
            .join(format!("addresses_{}.csv", chunk_index));
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("writing request file {}", path.display()))?;
        Ok(path)
    }

    async fn submit_with_retry(
        &self,
        chunk_index: usize,
        chunks_total: usize,
        request_file: &Path,
        logger: &StageLogger,
        stats: &mut GeocodeStageStats,
    ) -> Result<String> {
        let max_attempts = self.config.max_attempts;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.geocoder.submit_chunk(chunk_index, request_file).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < max_attempts && is_transient(&e) => {
                    let delay = self.backoff_delay(attempt);
                    logger.log_retry(chunk_index + 1, attempt, max_attempts, delay, &format!("{:#}", e));
                    stats.retries += 1;
                    sleep(delay).await;
                }
                Err(e) => {
                    logger.log_error(&format!(
                        "chunk {}/{} failed after {} attempt(s): {:#}",
                        chunk_index + 1,
                        chunks_total,
                        attempt,
                        e
                    ));
                    return Err(e);
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_backoff_ms;
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let base = Duration::from_millis(base_ms.saturating_mul(1 << exponent));
        let jitter = if base_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..base_ms))
        } else {
            Duration::ZERO
        };
        base + jitter
    }
}

async fn remove_request_file(path: &Path, logger: &StageLogger) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        logger.log_warning(&format!("could not remove request file {}: {}", path.display(), e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocoding::client::GeocoderStatusError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers every request row with a No_Match line; scripted statuses fail a chunk first.
    #[derive(Default)]
    struct FakeGeocoder {
        failures: Mutex<HashMap<usize, Vec<u16>>>,
        calls: Mutex<Vec<(usize, usize)>>,
        call_times: Mutex<Vec<tokio::time::Instant>>,
    }

    impl FakeGeocoder {
        fn failing(chunk_index: usize, statuses: Vec<u16>) -> Self {
            let fake = Self::default();
            fake.failures.lock().unwrap().insert(chunk_index, statuses);
            fake
        }

        fn calls(&self) -> Vec<(usize, usize)> {
            self.calls.lock().unwrap().clone()
        }

        fn call_times(&self) -> Vec<tokio::time::Instant> {
            self.call_times.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchGeocoder for FakeGeocoder {
        async fn submit_chunk(&self, chunk_index: usize, request_file: &Path) -> Result<String> {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .from_path(request_file)?;
            let mut body = String::new();
            let mut rows = 0;
            for record in reader.records() {
                let record = record?;
                rows += 1;
                body.push_str(&format!(
                    "\"{}\",\"{}, {}, {}, {}\",\"No_Match\"\n",
                    &record[0], &record[1], &record[2], &record[3], &record[4]
                ));
            }
            self.calls.lock().unwrap().push((chunk_index, rows));
            self.call_times.lock().unwrap().push(tokio::time::Instant::now());

            if let Some(statuses) = self.failures.lock().unwrap().get_mut(&chunk_index) {
                if !statuses.is_empty() {
                    let status = statuses.remove(0);
                    return Err(anyhow::Error::new(GeocoderStatusError {
                        status,
                        body: "unavailable".to_string(),
                    }));
                }
            }
            Ok(body)
        }
    }

    fn records(n: usize) -> Vec<AddressRecord> {
        (0..n)
            .map(|i| AddressRecord::new(i.to_string(), format!("{} Main St", i), "Albany", "NY", "12207"))
            .collect()
    }

    fn config(tmp: &Path, chunk_size: usize) -> GeocodeConfig {
        GeocodeConfig {
            chunk_size,
            chunk_delay_ms: 0,
            base_backoff_ms: 0,
            max_attempts: 3,
            tmp_dir: tmp.join("requests"),
            ..GeocodeConfig::default()
        }
    }

    fn submitter(fake: Arc<FakeGeocoder>, config: GeocodeConfig) -> GeocodeSubmitter {
        GeocodeSubmitter::new(fake, config, ProgressConfig::disabled())
    }

    #[tokio::test]
    async fn test_chunks_are_sized_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.txt");
        let fake = Arc::new(FakeGeocoder::default());
        let outcome = submitter(fake.clone(), config(dir.path(), 1000))
            .submit_all(&records(2500), &raw, "run")
            .await
            .unwrap();

        assert_eq!(fake.calls(), vec![(0, 1000), (1, 1000), (2, 500)]);
        assert_eq!(outcome.lines.len(), 2500);
        assert!(outcome.lines[0].starts_with("\"0\","));
        assert!(outcome.lines[2499].starts_with("\"2499\","));
        assert_eq!(read_raw_lines(&raw).unwrap(), outcome.lines);
        assert_eq!(outcome.stats.chunks_completed, 3);
        assert_eq!(outcome.stats.rows_submitted, 2500);

        // request files and checkpoint are cleaned up
        assert_eq!(std::fs::read_dir(dir.path().join("requests")).unwrap().count(), 0);
        assert!(!checkpoint_path_for(&raw).exists());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.txt");
        let fake = Arc::new(FakeGeocoder::failing(1, vec![503, 429]));
        let outcome = submitter(fake.clone(), config(dir.path(), 2))
            .submit_all(&records(5), &raw, "run")
            .await
            .unwrap();

        let chunk_calls: Vec<usize> = fake.calls().iter().map(|(i, _)| *i).collect();
        assert_eq!(chunk_calls, vec![0, 1, 1, 1, 2]);
        assert_eq!(outcome.stats.retries, 2);
        assert_eq!(outcome.lines.len(), 5);
    }

    #[tokio::test]
    async fn test_client_error_is_fatal_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.txt");
        let fake = Arc::new(FakeGeocoder::failing(1, vec![400]));
        let err = submitter(fake.clone(), config(dir.path(), 2))
            .submit_all(&records(5), &raw, "run")
            .await
            .unwrap_err();

        assert_eq!(fake.calls().len(), 2);
        let message = format!("{:#}", err);
        assert!(message.contains("chunk 2/3"));
        assert!(message.contains("1 chunks (2 rows) completed"));
        assert!(message.contains("HTTP 400"));
    }

    #[tokio::test]
    async fn test_exhausted_transient_retries_halt_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.txt");
        let fake = Arc::new(FakeGeocoder::failing(1, vec![503; 10]));
        let err = submitter(fake.clone(), config(dir.path(), 2))
            .submit_all(&records(5), &raw, "run")
            .await
            .unwrap_err();

        let chunk_calls: Vec<usize> = fake.calls().iter().map(|(i, _)| *i).collect();
        assert_eq!(chunk_calls, vec![0, 1, 1, 1]);
        let message = format!("{:#}", err);
        assert!(message.contains("chunk 2/3"));
        assert!(message.contains("1 chunks (2 rows) completed before the failure"));
        assert!(message.contains("HTTP 503"));

        assert_eq!(read_raw_lines(&raw).unwrap().len(), 2);
        let checkpoint = GeocodeCheckpoint::load(&checkpoint_path_for(&raw))
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.completed_chunks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_are_spaced_by_the_configured_delay() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.txt");
        let fake = Arc::new(FakeGeocoder::default());
        let mut spaced = config(dir.path(), 2);
        spaced.chunk_delay_ms = 1000;

        let started = tokio::time::Instant::now();
        submitter(fake.clone(), spaced)
            .submit_all(&records(5), &raw, "run")
            .await
            .unwrap();
        let elapsed = started.elapsed();

        let times = fake.call_times();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
        // two pauses, none after the last chunk
        assert_eq!(elapsed.as_millis(), 2000);
    }

    #[tokio::test]
    async fn test_resume_skips_completed_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.txt");
        let input = records(5);

        let failing = Arc::new(FakeGeocoder::failing(2, vec![404]));
        assert!(submitter(failing, config(dir.path(), 2))
            .submit_all(&input, &raw, "first")
            .await
            .is_err());
        let checkpoint = GeocodeCheckpoint::load(&checkpoint_path_for(&raw))
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.completed_chunks, 2);

        let healthy = Arc::new(FakeGeocoder::default());
        let outcome = submitter(healthy.clone(), config(dir.path(), 2))
            .submit_all(&input, &raw, "second")
            .await
            .unwrap();

        assert_eq!(healthy.calls(), vec![(2, 1)]);
        assert_eq!(outcome.stats.resumed_from_chunk, Some(2));
        let ids: Vec<String> = read_raw_lines(&raw)
            .unwrap()
            .iter()
            .map(|l| l.split(',').next().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["\"0\"", "\"1\"", "\"2\"", "\"3\"", "\"4\""]);
    }

    #[tokio::test]
    async fn test_resume_discards_unrecorded_tail() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.txt");
        let input = records(4);

        let failing = Arc::new(FakeGeocoder::failing(1, vec![400]));
        assert!(submitter(failing, config(dir.path(), 2))
            .submit_all(&input, &raw, "first")
            .await
            .is_err());
        // a response appended after the last checkpoint save
        std::fs::OpenOptions::new()
            .append(true)
            .open(&raw)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"\"2\",\"torn\"\n"))
            .unwrap();

        let outcome = submitter(Arc::new(FakeGeocoder::default()), config(dir.path(), 2))
            .submit_all(&input, &raw, "second")
            .await
            .unwrap();
        assert_eq!(outcome.lines.len(), 4);
        assert!(!read_raw_lines(&raw).unwrap().iter().any(|l| l.contains("torn")));
    }

    #[tokio::test]
    async fn test_mismatched_checkpoint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.txt");

        let failing = Arc::new(FakeGeocoder::failing(1, vec![400]));
        assert!(submitter(failing, config(dir.path(), 2))
            .submit_all(&records(5), &raw, "first")
            .await
            .is_err());

        let err = submitter(Arc::new(FakeGeocoder::default()), config(dir.path(), 2))
            .submit_all(&records(6), &raw, "second")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("different input"));

        // without resume the stale checkpoint is discarded
        let mut fresh = config(dir.path(), 2);
        fresh.resume = false;
        let outcome = submitter(Arc::new(FakeGeocoder::default()), fresh)
            .submit_all(&records(6), &raw, "third")
            .await
            .unwrap();
        assert_eq!(outcome.lines.len(), 6);
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let config = GeocodeConfig {
            base_backoff_ms: 100,
            ..GeocodeConfig::default()
        };
        let s = submitter(Arc::new(FakeGeocoder::default()), config);
        let first = s.backoff_delay(1);
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(200));
        let third = s.backoff_delay(3);
        assert!(third >= Duration::from_millis(400) && third < Duration::from_millis(500));
        let capped = s.backoff_delay(20);
        assert!(capped >= Duration::from_millis(6400) && capped < Duration::from_millis(6500));
    }
}
