//! Top-N similarity: the `limit` best hits, by coefficient then ascending id
//!
//! Runs the similarity search at thresholds 0.9, 0.8, ... down to the caller's floor and stops at
//! the first threshold that yields at least `limit` hits. With partitioning, each partition
//! returns its own best `limit`.

use super::{Hit, Partition, Progress, SimilaritySearch};
use crate::coef::SimCoef;
use crate::error::{Error, Result};
use crate::index::Index;
use log::debug;
use std::cmp::Ordering;

pub struct TopNSearch {
    search: SimilaritySearch,
    limit: usize,
    floor: f64,
    results: Vec<(u32, f64)>,
    pos: usize,
    collected: bool,
}

/// Descending tenths above `floor`, then `floor` itself.
fn thresholds(floor: f64) -> Vec<f64> {
    let mut steps: Vec<f64> = (1..=9).rev()
        .map(|k| k as f64 / 10.0)
        .take_while(|t| *t > floor)
        .collect();
    steps.push(floor);
    return steps;
}

impl TopNSearch {

    pub fn new(index: &Index, fp: Vec<u8>, coef: SimCoef, limit: usize, floor: f64) -> Result<Self> {

        if limit == 0 {
            return Err(Error::InvalidParameter("top-n limit must be positive".to_string()));
        }

        let search = SimilaritySearch::new(index, fp, coef, floor, 1.0)?;

        return Ok(Self { search, limit, floor, results: Vec::new(), pos: 0, collected: false });
    }

    pub fn inner(&self) -> &SimilaritySearch {
        return &self.search;
    }

    /// Hits not yet returned; zero until the first `next`.
    pub fn remaining(&self) -> usize {
        return self.results.len() - self.pos;
    }

    fn collect(&mut self, index: &Index, partition: &Partition) -> Result<()> {

        for threshold in thresholds(self.floor) {
            self.search.reset_threshold(index, threshold)?;

            let mut progress = Progress::new(self.search.total_units());
            let mut found: Vec<(u32, f64)> = Vec::new();
            while let Some(hit) = self.search.next(index, partition, &mut progress)? {
                found.push((hit.id, hit.similarity.unwrap_or(0.0)));
            }

            debug!("top-n threshold {}: {} hits", threshold, found.len());

            if found.len() >= self.limit || threshold <= self.floor {
                found.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
                found.truncate(self.limit);
                self.results = found;
                break;
            }
        }

        return Ok(());
    }

    pub fn next(&mut self, index: &Index, partition: &Partition) -> Result<Option<Hit>> {

        if !self.collected {
            self.collect(index, partition)?;
            self.collected = true;
        }

        if self.pos >= self.results.len() {
            return Ok(None);
        }

        let (id, value) = self.results[self.pos];
        self.pos += 1;

        return Ok(Some(Hit { id, similarity: Some(value) }));
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use super::super::tests::random_database;
    use crate::fingerprint;
    use crate::matcher::QueryData;

    #[test]
    fn quick_threshold_ladder() {
        assert_eq!(thresholds(0.75), vec![0.9, 0.8, 0.75]);
        assert_eq!(thresholds(0.9), vec![0.9]);
        assert_eq!(thresholds(0.95), vec![0.95]);
        assert_eq!(thresholds(0.0).len(), 10);
    }

    #[test]
    fn top_hits_are_best_by_coefficient() {

        let dir = tempfile::tempdir().unwrap();
        let removed = [12];
        let (db, objects) = random_database(dir.path(), 120, 81, 0, &removed);
        let fp = objects[12].sim_fp.clone();

        let mut matcher = db.create_matcher("topn", QueryData::TopN { fp: fp.clone(), limit: 5, min: 0.0 }, "").unwrap();
        let mut hits = Vec::new();
        while matcher.next().unwrap() {
            hits.push((matcher.current_id().unwrap(), matcher.current_similarity_value().unwrap()));
        }
        assert_eq!(hits.len(), 5);

        let popcount = fingerprint::popcount(&fp);
        let mut all: Vec<(u32, f64)> = (0..objects.len() as u32)
            .filter(|id| !removed.contains(id))
            .map(|id| {
                let target = &objects[id as usize].sim_fp;
                (id, SimCoef::Tanimoto.coef(popcount, fingerprint::popcount(target), fingerprint::common_bits(&fp, target)))
            })
            .collect();
        all.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
        all.truncate(5);

        assert_eq!(hits, all);
        assert!(hits.iter().all(|(id, _)| *id != 12));
    }

    #[test]
    fn quick_floor_caps_results() {

        let dir = tempfile::tempdir().unwrap();
        let (db, objects) = random_database(dir.path(), 40, 82, 0, &[]);

        let query = QueryData::TopN { fp: objects[0].sim_fp.clone(), limit: 100, min: 0.99 };
        let mut matcher = db.create_matcher("topn", query, "").unwrap();

        assert!(matcher.next().unwrap());
        assert_eq!(matcher.current_id().unwrap(), 0);
        let rest = matcher.estimate_remaining_results_count().value as usize;
        assert!(rest < 40);

        assert!(db.create_matcher("topn", QueryData::TopN { fp: vec![0; 8], limit: 0, min: 0.5 }, "").is_err());
    }
}
