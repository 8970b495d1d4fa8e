// src/matching/address.rs - Spatial candidate retrieval plus fuzzy address scoring
use anyhow::{anyhow, bail, Context, Result};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::matching::fuzzy::{token_sort_key, token_sort_ratio_keyed};
use crate::matching::spatial_index::SpatialIndex;
use crate::models::stats_models::PipelineStage;
use crate::models::{GeocodedAddress, MatchResult};
use crate::utils::config::MatchConfig;
use crate::utils::progress_bars::logging::StageLogger;
use crate::utils::progress_bars::progress_config::ProgressConfig;

pub struct SpatialFuzzyMatcher {
    index: Arc<SpatialIndex>,
    radius: f64,
}

impl SpatialFuzzyMatcher {
    pub fn new(index: Arc<SpatialIndex>, radius: f64) -> Self {
        Self { index, radius }
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Best-scoring nearby listing for a geocoded row.
    /// Rows without both coordinates or without a matched address never match.
    pub fn match_one(&self, query: &GeocodedAddress) -> MatchResult {
        match (query.coordinates(), query.matched_address.as_deref()) {
            (Some((lat, lon)), Some(address)) => self.match_point(lat, lon, address),
            _ => MatchResult::no_match(),
        }
    }

    /// Scores every listing strictly inside the `radius` box around (lat, lon).
    /// The first listing reaching the top score wins; listings without an address are skipped.
    pub fn match_point(&self, lat: f64, lon: f64, address: &str) -> MatchResult {
        if !lat.is_finite() || !lon.is_finite() {
            return MatchResult::no_match();
        }
        let key = token_sort_key(address);
        let mut best: Option<(f64, &str, i64)> = None;

        for candidate in self.index.neighborhood(lat, lon) {
            if (candidate.latitude - lat).abs() >= self.radius
                || (candidate.longitude - lon).abs() >= self.radius
            {
                continue;
            }
            let Some(text) = candidate.address.as_deref() else {
                continue;
            };
            let score = token_sort_ratio_keyed(&key, text);
            if best.map_or(true, |(top, _, _)| score > top) {
                best = Some((score, text, candidate.row_index));
            }
        }

        match best {
            Some((score, text, row_index)) => MatchResult {
                best_match: Some(text.to_string()),
                confidence: score,
                reference_row_index: row_index,
            },
            None => MatchResult::no_match(),
        }
    }
}

/// Matches every query across `config.workers` blocking tasks.
///
/// Queries are cut into `batch_size` batches that workers claim in turn.
/// Results are placed back by offset, so the output lines up with `queries`.
/// Setting `cancel` stops all workers at the next query and fails the call.
pub async fn match_all(
    matcher: Arc<SpatialFuzzyMatcher>,
    queries: Arc<Vec<GeocodedAddress>>,
    config: &MatchConfig,
    progress: &ProgressConfig,
    cancel: Arc<AtomicBool>,
) -> Result<Vec<MatchResult>> {
    let logger = StageLogger::new(PipelineStage::Match);
    let total = queries.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let batch_size = config.batch_size.max(1);
    let total_batches = (total + batch_size - 1) / batch_size;
    let workers = config.workers.clamp(1, total_batches);
    logger.log_batch_processing_start(total, batch_size, workers);

    let pb = progress.create_bar(total as u64, "📍", "queries");
    let next_batch = Arc::new(AtomicUsize::new(0));
    let batches_done = Arc::new(AtomicUsize::new(0));
    let queries_done = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let matcher = Arc::clone(&matcher);
        let queries = Arc::clone(&queries);
        let cancel = Arc::clone(&cancel);
        let next_batch = Arc::clone(&next_batch);
        let batches_done = Arc::clone(&batches_done);
        let queries_done = Arc::clone(&queries_done);
        let pb = pb.clone();
        let logger = logger.clone();

        handles.push(tokio::task::spawn_blocking(move || {
            let mut produced: Vec<(usize, Vec<MatchResult>)> = Vec::new();
            loop {
                let batch = next_batch.fetch_add(1, Ordering::SeqCst);
                if batch >= total_batches {
                    break;
                }
                let start = batch * batch_size;
                let end = (start + batch_size).min(total);
                let mut results = Vec::with_capacity(end - start);
                for query in &queries[start..end] {
                    if cancel.load(Ordering::Relaxed) {
                        return produced;
                    }
                    results.push(matcher.match_one(query));
                    queries_done.fetch_add(1, Ordering::Relaxed);
                }
                pb.inc(results.len() as u64);
                let done = batches_done.fetch_add(1, Ordering::SeqCst) + 1;
                logger.log_batch_progress(done, total_batches, results.len());
                produced.push((start, results));
            }
            produced
        }));
    }

    let mut slots: Vec<Option<MatchResult>> = vec![None; total];
    for joined in join_all(handles).await {
        let produced = joined.context("matcher worker panicked")?;
        for (offset, results) in produced {
            for (i, result) in results.into_iter().enumerate() {
                slots[offset + i] = Some(result);
            }
        }
    }

    if cancel.load(Ordering::SeqCst) {
        pb.abandon_with_message("cancelled");
        bail!(
            "matching cancelled after {} of {} queries",
            queries_done.load(Ordering::SeqCst),
            total
        );
    }
    pb.finish_with_message("done");

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or_else(|| anyhow!("no match result produced for query {}", i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReferenceListing;

    const BUCKET_SIZE: f64 = 0.01;
    const RADIUS: f64 = 0.001;

    fn listing(row_index: i64, latitude: f64, longitude: f64, address: Option<&str>) -> ReferenceListing {
        ReferenceListing {
            row_index,
            latitude,
            longitude,
            address: address.map(str::to_string),
        }
    }

    fn matcher(listings: Vec<ReferenceListing>) -> SpatialFuzzyMatcher {
        let index = SpatialIndex::from_listings(BUCKET_SIZE, listings).unwrap();
        SpatialFuzzyMatcher::new(Arc::new(index), RADIUS)
    }

    fn query(lat: Option<f64>, lon: Option<f64>, address: Option<&str>) -> GeocodedAddress {
        GeocodedAddress {
            lat,
            lon,
            matched_address: address.map(str::to_string),
            ..GeocodedAddress::default()
        }
    }

    #[test]
    fn test_boundary_straddling_candidate_is_found() {
        let m = matcher(vec![listing(0, 40.000, -73.000, Some("1 MAIN ST, ALBANY, NY, 12207"))]);
        let result = m.match_one(&query(
            Some(40.0009),
            Some(-73.0009),
            Some("1 MAIN ST, ALBANY, NY, 12207"),
        ));
        assert_eq!(result.reference_row_index, 0);
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.best_match.as_deref(), Some("1 MAIN ST, ALBANY, NY, 12207"));
    }

    #[test]
    fn test_far_query_has_no_candidates() {
        let m = matcher(vec![
            listing(0, 40.0, -73.0, Some("1 Main St")),
            listing(1, 40.0005, -73.0005, Some("2 Main St")),
        ]);
        assert_eq!(m.match_one(&query(Some(0.0), Some(0.0), Some("1 Main St"))), MatchResult::no_match());
    }

    #[test]
    fn test_radius_filter_is_strict() {
        // binary-exact offsets so the edge comparison is not blurred by rounding
        let index = SpatialIndex::from_listings(0.5, vec![listing(7, 0.0, 0.0, Some("x"))]).unwrap();
        let m = SpatialFuzzyMatcher::new(Arc::new(index), 0.25);
        assert!(!m.match_point(0.25, 0.0, "x").is_match());
        assert!(!m.match_point(0.0, -0.25, "x").is_match());
        assert_eq!(m.match_point(0.125, -0.125, "x").reference_row_index, 7);

        // same neighborhood, outside the box
        let near = matcher(vec![listing(1, 40.0, -73.005, Some("1 Main St"))]);
        assert!(!near.match_point(40.0, -73.0, "1 Main St").is_match());
    }

    #[test]
    fn test_highest_score_wins_and_ties_go_to_first_seen() {
        let m = matcher(vec![
            listing(0, 40.0005, -73.0005, Some("9000 Industrial Pkwy, Albany, NY, 12207")),
            listing(1, 40.0004, -73.0004, Some("1 Main Street, Albany, NY, 12207")),
            listing(2, 40.0003, -73.0003, Some("1 Main Street, Albany, NY, 12207")),
        ]);
        let result = m.match_point(40.0004, -73.0004, "1 MAIN ST, ALBANY, NY, 12207");
        assert_eq!(result.reference_row_index, 1);
        assert!(result.confidence > 0.0 && result.confidence <= 100.0);
    }

    #[test]
    fn test_missing_inputs_yield_no_match() {
        let m = matcher(vec![listing(0, 40.0, -73.0, Some("1 Main St"))]);
        assert!(!m.match_one(&query(None, Some(-73.0), Some("1 Main St"))).is_match());
        assert!(!m.match_one(&query(Some(40.0), None, Some("1 Main St"))).is_match());
        assert!(!m.match_one(&query(Some(40.0), Some(-73.0), None)).is_match());

        let empty = matcher(Vec::new());
        assert_eq!(
            empty.match_one(&query(Some(40.0), Some(-73.0), Some("1 Main St"))),
            MatchResult::no_match()
        );
    }

    #[test]
    fn test_listing_without_address_is_never_selected() {
        let m = matcher(vec![
            listing(0, 40.0, -73.0, None),
            listing(1, 40.0002, -73.0002, Some("55 Elm St")),
        ]);
        let result = m.match_point(40.0001, -73.0001, "1 Main St");
        assert_eq!(result.reference_row_index, 1);

        let only_null = matcher(vec![listing(0, 40.0, -73.0, None)]);
        assert!(!only_null.match_point(40.0, -73.0, "1 Main St").is_match());
    }

    #[test]
    fn test_adding_listings_never_lowers_confidence() {
        let base = vec![listing(0, 40.0, -73.0, Some("12 Oak Ave, Troy, NY"))];
        let before = matcher(base.clone()).match_point(40.0002, -73.0002, "12 OAK AVE, TROY, NY");
        let mut more = base;
        more.push(listing(1, 40.0001, -73.0001, Some("14 Oak Ave, Troy, NY")));
        more.push(listing(2, 41.0, -74.0, Some("12 Oak Ave, Troy, NY")));
        let after = matcher(more).match_point(40.0002, -73.0002, "12 OAK AVE, TROY, NY");
        assert!(after.confidence >= before.confidence);
    }

    fn sample_queries(n: usize) -> Vec<GeocodedAddress> {
        (0..n)
            .map(|i| {
                if i % 3 == 0 {
                    query(None, None, None)
                } else {
                    query(Some(40.0), Some(-73.0), Some("1 Main St"))
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_match_all_preserves_input_order() {
        let m = Arc::new(matcher(vec![listing(4, 40.0, -73.0, Some("1 Main St"))]));
        let queries = Arc::new(sample_queries(25));
        let config = MatchConfig {
            batch_size: 4,
            workers: 3,
            ..MatchConfig::default()
        };
        let results = match_all(
            m,
            queries.clone(),
            &config,
            &ProgressConfig::disabled(),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 25);
        for (i, result) in results.iter().enumerate() {
            if i % 3 == 0 {
                assert!(!result.is_match(), "query {}", i);
            } else {
                assert_eq!(result.reference_row_index, 4, "query {}", i);
            }
        }
    }

    #[tokio::test]
    async fn test_cancelled_matching_fails() {
        let m = Arc::new(matcher(vec![listing(0, 40.0, -73.0, Some("1 Main St"))]));
        let err = match_all(
            m,
            Arc::new(sample_queries(10)),
            &MatchConfig::default(),
            &ProgressConfig::disabled(),
            Arc::new(AtomicBool::new(true)),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("cancelled after 0 of 10"));
    }
}
