//! Query matchers: resumable iterators over the hits of one query
//!
//! A [`Matcher`] is created from a kind name, a [`QueryData`] and an option string. The kind is
//! resolved once into a closed set of search engines. Every call to [`Matcher::next`] takes the
//! database read lock for its duration only, so writers can interleave between calls.
//!
//! Option grammar (`;`-separated):
//! - `part:<id>/<count>`: only visit the share of the search space whose index modulo `count`
//!   is `id - 1`. Running all `count` partitions covers every hit exactly once.
//! - bare value (similarity and top-n only): the metric, `tanimoto`, `euclid-sub` or
//!   `tversky [<alpha> <beta>]`.

mod candidates;
mod enumerate;
mod similarity;
mod substructure;
mod topn;

pub use candidates::CandidateSearch;
pub use enumerate::EnumerateSearch;
pub use similarity::SimilaritySearch;
pub use substructure::SubstructureSearch;
pub use topn::TopNSearch;

use crate::coef::SimCoef;
use crate::error::{Error, Result};
use crate::estimate::{Estimate, MeanEstimator};
use crate::index::Database;
use crate::object::Confirm;
use crate::properties;
use log::info;
use std::str::FromStr;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Substructure,
    Similarity,
    TopN,
    Exact,
    Formula,
    Enumerate,
}

impl MatcherKind {

    pub fn name(&self) -> &'static str {
        match self {
            MatcherKind::Substructure => "sub",
            MatcherKind::Similarity => "sim",
            MatcherKind::TopN => "topn",
            MatcherKind::Exact => "exact",
            MatcherKind::Formula => "formula",
            MatcherKind::Enumerate => "enum",
        }
    }

    fn allowed_options(&self) -> &'static [&'static str] {
        match self {
            MatcherKind::Similarity | MatcherKind::TopN => &["", "part"],
            _ => &["part"],
        }
    }
}

impl FromStr for MatcherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sub" => Ok(MatcherKind::Substructure),
            "sim" => Ok(MatcherKind::Similarity),
            "topn" => Ok(MatcherKind::TopN),
            "exact" => Ok(MatcherKind::Exact),
            "formula" => Ok(MatcherKind::Formula),
            "enum" => Ok(MatcherKind::Enumerate),
            _ => Err(Error::UnknownMatcherKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    Substructure { fp: Vec<u8> },
    /// Hits with coefficient in `[min, max]`.
    Similarity { fp: Vec<u8>, min: f64, max: f64 },
    /// The `limit` most similar objects with coefficient at least `min`.
    TopN { fp: Vec<u8>, limit: usize, min: f64 },
    Exact { hash: u32 },
    Formula { formula: String },
    Enumerate,
}

/// Engines report storage positions in `id`; [`Matcher`] hands out external object ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub id: u32,
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub id: usize,
    pub count: usize,
}

impl Partition {

    pub fn whole() -> Self {
        return Self { id: 1, count: 1 };
    }

    pub fn new(id: usize, count: usize) -> Result<Self> {
        if count == 0 || id == 0 || id > count {
            return Err(Error::InvalidPartition { part_id: id, part_count: count });
        }
        return Ok(Self { id, count });
    }

    pub fn accepts(&self, index: usize) -> bool {
        return index % self.count == self.id - 1;
    }
}

impl Default for Partition {
    fn default() -> Self {
        Self::whole()
    }
}

/// Hit-rate and time-per-unit estimators of one search.
///
/// A unit is whatever the engine advances by (an object id, a similarity portion, a candidate).
/// Units skipped by partitioning count as processed, so the mean already carries this
/// partition's share.
#[derive(Debug, Clone)]
pub struct Progress {
    matches: MeanEstimator,
    time: MeanEstimator,
    processed: usize,
    total: usize,
    last: Instant,
}

impl Progress {

    pub fn new(total: usize) -> Self {
        return Self {
            matches: MeanEstimator::new(),
            time: MeanEstimator::new(),
            processed: 0,
            total,
            last: Instant::now(),
        };
    }

    /// Records the hits of one unit; call it before the `advance` that covers the unit.
    pub fn add_matches(&mut self, count: usize) {
        self.matches.add_value(count as f64);
    }

    /// Raises the processed unit count and charges the time since the previous call.
    pub fn advance(&mut self, processed: usize) {

        let now = Instant::now();
        self.time.add_value(now.duration_since(self.last).as_secs_f64());
        self.last = now;

        self.processed = std::cmp::max(self.processed, processed);
        self.matches.set_count(self.processed);
        self.time.set_count(self.processed);
    }

    pub fn processed(&self) -> usize {
        return self.processed;
    }

    pub fn total(&self) -> usize {
        return self.total;
    }

    pub fn left(&self) -> usize {
        return self.total.saturating_sub(self.processed);
    }

    pub fn remaining_results(&self) -> Estimate {
        return self.matches.estimate_remaining(self.left());
    }

    /// Seconds.
    pub fn remaining_time(&self) -> Estimate {
        return self.time.estimate_remaining(self.left());
    }
}

enum Engine {
    Substructure(SubstructureSearch),
    Similarity(SimilaritySearch),
    TopN(TopNSearch),
    Exact(CandidateSearch),
    Formula(CandidateSearch),
    Enumerate(EnumerateSearch),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherState {
    Iterating,
    Exhausted,
    Failed,
}

pub struct Matcher {
    db: Database,
    kind: MatcherKind,
    engine: Engine,
    partition: Partition,
    progress: Progress,
    confirm: Box<dyn Confirm>,
    state: MatcherState,
    current: Option<Hit>,
    position: Option<u32>,
}

fn parse_matcher_options(kind: MatcherKind, options: &str) -> Result<(Partition, SimCoef)> {

    let map = properties::parse_options(options, kind.allowed_options())?;

    let partition = match map.get("part") {
        Some(value) => {
            let (id, count) = properties::parse_partition(value)?;
            Partition::new(id, count)?
        },
        None => Partition::whole(),
    };

    let coef = match map.get("") {
        Some(metric) => SimCoef::parse(metric)?,
        None => SimCoef::Tanimoto,
    };

    return Ok((partition, coef));
}

impl Matcher {

    pub fn create(db: Database, kind: MatcherKind, query: QueryData, options: &str, confirm: Box<dyn Confirm>) -> Result<Self> {

        let (partition, coef) = parse_matcher_options(kind, options)?;

        let engine = {
            let index = db.read();
            match (kind, query) {
                (MatcherKind::Substructure, QueryData::Substructure { fp }) => {
                    Engine::Substructure(SubstructureSearch::new(&index, fp)?)
                },
                (MatcherKind::Similarity, QueryData::Similarity { fp, min, max }) => {
                    Engine::Similarity(SimilaritySearch::new(&index, fp, coef, min, max)?)
                },
                (MatcherKind::TopN, QueryData::TopN { fp, limit, min }) => {
                    Engine::TopN(TopNSearch::new(&index, fp, coef, limit, min)?)
                },
                (MatcherKind::Exact, QueryData::Exact { hash }) => {
                    Engine::Exact(CandidateSearch::new(index.exact_storage().candidates(hash).to_vec()))
                },
                (MatcherKind::Formula, QueryData::Formula { formula }) => {
                    Engine::Formula(CandidateSearch::new(index.gross_storage().candidates(&formula).to_vec()))
                },
                (MatcherKind::Enumerate, QueryData::Enumerate) => {
                    Engine::Enumerate(EnumerateSearch::new(index.object_count()))
                },
                (kind, _) => return Err(Error::QueryKindMismatch(kind.name())),
            }
        };

        let total = match &engine {
            Engine::Substructure(search) => search.total_units(),
            Engine::Similarity(search) => search.total_units(),
            Engine::TopN(_) => 0,
            Engine::Exact(search) | Engine::Formula(search) => search.total_units(),
            Engine::Enumerate(search) => search.total_units(),
        };

        info!("created {} matcher, partition {}/{}, {} units", kind.name(), partition.id, partition.count, total);

        return Ok(Self {
            db,
            kind,
            engine,
            partition,
            progress: Progress::new(total),
            confirm,
            state: MatcherState::Iterating,
            current: None,
            position: None,
        });
    }

    pub fn kind(&self) -> MatcherKind {
        return self.kind;
    }

    pub fn state(&self) -> MatcherState {
        return self.state;
    }

    pub fn partition(&self) -> Partition {
        return self.partition;
    }

    /// Advances to the next hit. Returns `false` once the search is exhausted. After an error the
    /// matcher may only be closed.
    pub fn next(&mut self) -> Result<bool> {

        match self.state {
            MatcherState::Exhausted => return Ok(false),
            MatcherState::Failed => return Err(Error::InvalidState("matcher failed earlier")),
            MatcherState::Iterating => {},
        }

        let index = self.db.read();
        self.current = None;
        self.position = None;

        loop {
            let found = match &mut self.engine {
                Engine::Substructure(search) => search.next(&index, &self.partition, &mut self.progress, self.confirm.as_mut()),
                Engine::Similarity(search) => search.next(&index, &self.partition, &mut self.progress),
                Engine::TopN(search) => search.next(&index, &self.partition),
                Engine::Exact(search) | Engine::Formula(search) => {
                    search.next(&index, &self.partition, &mut self.progress, self.confirm.as_mut())
                },
                Engine::Enumerate(search) => search.next(&index, &self.partition, &mut self.progress),
            };

            match found {
                Ok(Some(hit)) => {
                    // buffered hits of objects removed since they were found have no id any more
                    if let Some(id) = index.external_id(hit.id) {
                        self.current = Some(Hit { id, similarity: hit.similarity });
                        self.position = Some(hit.id);
                        return Ok(true);
                    }
                },
                Ok(None) => {
                    self.progress.advance(self.progress.total());
                    self.state = MatcherState::Exhausted;
                    return Ok(false);
                },
                Err(e) => {
                    self.state = MatcherState::Failed;
                    return Err(e);
                },
            }
        }
    }

    fn current(&self) -> Result<Hit> {
        return self.current.ok_or(Error::InvalidState("no current hit; call next() first"));
    }

    pub fn current_id(&self) -> Result<u32> {
        return Ok(self.current()?.id);
    }

    /// Compressed record of the current hit.
    pub fn current_cf(&self) -> Result<Vec<u8>> {
        let id = self.current()?.id;
        let position = self.position.ok_or(Error::InvalidState("no current hit; call next() first"))?;
        let index = self.db.read();
        return index.record(position).map(|cf| cf.to_vec()).ok_or(Error::NoSuchObject(id));
    }

    pub fn current_similarity_value(&self) -> Result<f64> {
        return self.current()?.similarity.ok_or(Error::QueryKindMismatch(self.kind.name()));
    }

    pub fn estimate_remaining_results_count(&self) -> Estimate {
        match &self.engine {
            Engine::TopN(search) => Estimate { value: search.remaining() as f64, error: 0.0 },
            _ => self.progress.remaining_results(),
        }
    }

    /// Seconds.
    pub fn estimate_remaining_time(&self) -> Estimate {
        match &self.engine {
            Engine::TopN(_) => Estimate { value: 0.0, error: 0.0 },
            _ => self.progress.remaining_time(),
        }
    }

    fn similarity(&self) -> Result<&SimilaritySearch> {
        match &self.engine {
            Engine::Similarity(search) => Ok(search),
            Engine::TopN(search) => Ok(search.inner()),
            _ => Err(Error::QueryKindMismatch(self.kind.name())),
        }
    }

    /// Containers over all cells of the table.
    pub fn containers_count(&self) -> Result<usize> {
        let search = self.similarity()?;
        let index = self.db.read();
        return search.containers_count(&index);
    }

    pub fn cells_count(&self) -> Result<usize> {
        self.similarity()?;
        return Ok(self.db.read().sim_table().cell_count());
    }

    pub fn current_cell(&self) -> Result<Option<usize>> {
        return Ok(self.similarity()?.current_cell());
    }

    pub fn min_cell(&self) -> Result<Option<usize>> {
        return Ok(self.similarity()?.interval().map(|(first, _)| first));
    }

    pub fn max_cell(&self) -> Result<Option<usize>> {
        return Ok(self.similarity()?.interval().map(|(_, last)| last));
    }

    /// Fingerprints compared so far in `cell`.
    pub fn examined_in_cell(&self, cell: usize) -> Result<usize> {
        return Ok(self.similarity()?.examined(cell));
    }

    /// Restarts a similarity search with a new lower threshold.
    pub fn reset_threshold_limit(&mut self, min: f64) -> Result<()> {

        let index = self.db.read();
        let search = match &mut self.engine {
            Engine::Similarity(search) => search,
            _ => return Err(Error::QueryKindMismatch(self.kind.name())),
        };

        search.reset_threshold(&index, min)?;
        self.progress = Progress::new(search.total_units());
        self.state = MatcherState::Iterating;
        self.current = None;
        self.position = None;

        return Ok(());
    }

    /// Ends the search and releases its buffers.
    pub fn close(self) {}
}

impl Iterator for Matcher {
    type Item = Result<Hit>;

    fn next(&mut self) -> Option<Result<Hit>> {
        match Matcher::next(self) {
            Ok(true) => self.current.map(Ok),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {

    use super::*;
    use crate::config::IndexConfig;
    use crate::fingerprint::{self, FingerprintParams};
    use crate::object::{AcceptAll, PrecomputedObject};
    use rand::prelude::*;
    use rand::rngs::StdRng;
    use std::collections::BTreeSet;
    use std::path::Path;

    pub fn test_config(small_base_size: usize) -> IndexConfig {
        let mut config = IndexConfig::default();
        config.sub_block_size = 2;
        config.sim_block_size = 64;
        config.cf_block_size = 4096;
        config.segment_size = 1 << 20;
        config.mt_size = 20;
        config.small_base_size = small_base_size;
        config.sim_cells = Some(vec![0, 8, 16, 24, 32, 48]);
        return config;
    }

    /// Database of `n` random objects with 8-byte fingerprints; ids in `removed` are tombstoned.
    pub fn random_database(dir: &Path, n: usize, seed: u64, small_base_size: usize, removed: &[u32]) -> (Database, Vec<PrecomputedObject>) {

        let params = FingerprintParams::new(8, 8);
        let db = Database::create(dir, params, "molecule", test_config(small_base_size)).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);

        let mut objects = Vec::new();
        for i in 0..n {
            let density = rng.gen_range(0.1..0.5);
            let obj = PrecomputedObject {
                sub_fp: fingerprint::random_with(&mut rng, 8, density),
                sim_fp: fingerprint::random_with(&mut rng, 8, density),
                cf: format!("record-{}", i).into_bytes(),
                hash: (i % 7) as u32,
                formula: format!("C{}H{}", i % 4, i % 3),
            };
            db.add(&obj).unwrap();
            objects.push(obj);
        }

        for id in removed {
            db.remove(*id).unwrap();
        }

        return (db, objects);
    }

    pub fn collect_ids(db: &Database, kind: &str, query: QueryData, options: &str) -> Vec<u32> {
        let matcher = db.create_matcher(kind, query, options).unwrap();
        return matcher.map(|hit| hit.unwrap().id).collect();
    }

    #[test]
    fn quick_kind_names() {
        for kind in ["sub", "sim", "topn", "exact", "formula", "enum"] {
            assert_eq!(kind.parse::<MatcherKind>().unwrap().name(), kind);
        }
        assert!(matches!("similarity".parse::<MatcherKind>(), Err(Error::UnknownMatcherKind(_))));
    }

    #[test]
    fn quick_partition_accepts_residue_class() {

        let parts: Vec<Partition> = (1..=3).map(|id| Partition::new(id, 3).unwrap()).collect();
        for i in 0..30 {
            assert_eq!(parts.iter().filter(|p| p.accepts(i)).count(), 1);
        }
        assert!(parts[1].accepts(4));
        assert!(Partition::whole().accepts(17));
        assert!(Partition::new(0, 3).is_err());
        assert!(Partition::new(4, 3).is_err());
    }

    #[test]
    fn quick_create_rejects_bad_requests() {

        let dir = tempfile::tempdir().unwrap();
        let (db, _) = random_database(dir.path(), 5, 1, 0, &[]);

        let fp = vec![0u8; 8];
        assert!(matches!(db.create_matcher("sub", QueryData::Exact { hash: 1 }, ""), Err(Error::QueryKindMismatch("sub"))));
        assert!(matches!(db.create_matcher("nope", QueryData::Enumerate, ""), Err(Error::UnknownMatcherKind(_))));
        assert!(matches!(db.create_matcher("enum", QueryData::Enumerate, "part:4/3"), Err(Error::InvalidPartition { .. })));
        assert!(matches!(db.create_matcher("sub", QueryData::Substructure { fp: fp.clone() }, "tanimoto"), Err(Error::InvalidOptions { .. })));
        assert!(matches!(db.create_matcher("sub", QueryData::Substructure { fp: vec![0; 3] }, ""), Err(Error::FingerprintSize { .. })));
        assert!(db.create_matcher("sim", QueryData::Similarity { fp: fp.clone(), min: 0.5, max: 1.0 }, "tversky 0.3 0.7;part:1/2").is_ok());
        assert!(db.create_matcher("sim", QueryData::Similarity { fp, min: 0.5, max: 1.0 }, "tversky 0.3").is_err());
    }

    #[test]
    fn quick_current_requires_next() {

        let dir = tempfile::tempdir().unwrap();
        let (db, _) = random_database(dir.path(), 3, 2, 0, &[]);

        let mut matcher = db.create_matcher("enum", QueryData::Enumerate, "").unwrap();
        assert!(matches!(matcher.current_id(), Err(Error::InvalidState(_))));

        assert!(matcher.next().unwrap());
        assert_eq!(matcher.current_id().unwrap(), 0);
        assert_eq!(matcher.current_cf().unwrap(), b"record-0".to_vec());
        assert!(matches!(matcher.current_similarity_value(), Err(Error::QueryKindMismatch("enum"))));
        assert!(matches!(matcher.cells_count(), Err(Error::QueryKindMismatch("enum"))));

        assert!(matcher.next().unwrap());
        assert!(matcher.next().unwrap());
        assert!(!matcher.next().unwrap());
        assert!(!matcher.next().unwrap());
        assert_eq!(matcher.state(), MatcherState::Exhausted);
        assert!(matcher.current_id().is_err());
        matcher.close();
    }

    #[test]
    fn partitions_cover_every_kind_without_overlap() {

        let dir = tempfile::tempdir().unwrap();
        let (db, objects) = random_database(dir.path(), 150, 3, 0, &[5, 40, 77]);

        let queries: Vec<(&str, QueryData)> = vec![
            ("sub", QueryData::Substructure { fp: fingerprint::random(8, 0.05) }),
            ("sim", QueryData::Similarity { fp: objects[9].sim_fp.clone(), min: 0.3, max: 1.0 }),
            ("exact", QueryData::Exact { hash: 3 }),
            ("formula", QueryData::Formula { formula: "C1H2".to_string() }),
            ("enum", QueryData::Enumerate),
        ];

        for (kind, query) in queries {
            let whole = collect_ids(&db, kind, query.clone(), "");
            let whole_set: BTreeSet<u32> = whole.iter().cloned().collect();
            assert_eq!(whole_set.len(), whole.len(), "{} yields duplicates", kind);

            for count in 1..=4 {
                let mut union: Vec<u32> = Vec::new();
                for id in 1..=count {
                    union.extend(collect_ids(&db, kind, query.clone(), &format!("part:{}/{}", id, count)));
                }
                let union_set: BTreeSet<u32> = union.iter().cloned().collect();
                assert_eq!(union.len(), union_set.len(), "{} partitions overlap", kind);
                assert_eq!(union_set, whole_set, "{} partitions of {}", kind, count);
            }

            for removed in [5, 40, 77] {
                assert!(!whole_set.contains(&removed), "{} returned tombstoned id", kind);
            }
        }
    }

    #[test]
    fn quick_estimates_shrink_to_zero() {

        let dir = tempfile::tempdir().unwrap();
        let (db, _) = random_database(dir.path(), 60, 4, 0, &[]);

        let mut matcher = db.create_matcher_with("enum", QueryData::Enumerate, "", Box::new(AcceptAll)).unwrap();
        let initial = matcher.estimate_remaining_results_count();
        assert_eq!(initial.value, 0.0);

        for _ in 0..30 {
            assert!(matcher.next().unwrap());
        }
        let halfway = matcher.estimate_remaining_results_count();
        assert!((halfway.value - 30.0).abs() < 1e-9);
        assert!(matcher.estimate_remaining_time().value >= 0.0);

        while matcher.next().unwrap() {}
        assert_eq!(matcher.estimate_remaining_results_count().value, 0.0);
    }
}
