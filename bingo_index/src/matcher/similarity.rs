//! Similarity search over the popcount cells of the fingerprint table
//!
//! Cells in the interval whose bound can reach the threshold are walked one portion at a time
//! (each frozen container, then the increment). Portions are numbered in visiting order and that
//! number is what partitioning splits on. Portion counts and the id limit are fixed when the
//! search starts, so objects added later are never visited. Small databases skip the table and scan the row storage
//! block by block, partitioned by id.

use super::{Hit, Partition, Progress};
use crate::coef::SimCoef;
use crate::error::{Error, Result};
use crate::fingerprint;
use crate::index::Index;
use crate::multibit::SimQuery;
use log::debug;
use std::collections::VecDeque;

pub struct SimilaritySearch {
    fp: Vec<u8>,
    coef: SimCoef,
    min: f64,
    max: f64,
    small: bool,
    object_limit: usize,
    next_id: usize,
    interval: Option<(usize, usize)>,
    cell: usize,
    portion: usize,
    sequence: usize,
    total: usize,
    portions: Vec<usize>,
    examined: Vec<usize>,
    hits: VecDeque<(u32, f64)>,
    rows: Vec<u8>,
}

impl SimilaritySearch {

    pub fn new(index: &Index, fp: Vec<u8>, coef: SimCoef, min: f64, max: f64) -> Result<Self> {

        fingerprint::check_size(&fp, index.fp_params().sim_size)?;

        let mut search = Self {
            fp,
            coef,
            min,
            max,
            small: index.is_small_base(),
            object_limit: index.object_count(),
            next_id: 0,
            interval: None,
            cell: 0,
            portion: 0,
            sequence: 0,
            total: 0,
            portions: vec![0; index.sim_table().cell_count()],
            examined: vec![0; index.sim_table().cell_count()],
            hits: VecDeque::new(),
            rows: Vec::new(),
        };
        search.reset_threshold(index, min)?;

        return Ok(search);
    }

    fn query(&self) -> SimQuery<'_> {
        return SimQuery::new(&self.fp, self.coef, self.min, self.max);
    }

    /// Sets a new lower threshold and rewinds to the start.
    pub fn reset_threshold(&mut self, index: &Index, min: f64) -> Result<()> {

        if !(0.0..=1.0).contains(&min) || min > self.max {
            return Err(Error::InvalidParameter(format!("similarity range [{}, {}] is invalid", min, self.max)));
        }

        self.min = min;
        self.next_id = 0;
        self.sequence = 0;
        self.portion = 0;
        self.hits.clear();
        self.examined.iter_mut().for_each(|e| *e = 0);
        self.portions.iter_mut().for_each(|p| *p = 0);

        if self.small {
            self.total = self.object_limit;
            self.interval = None;
            return Ok(());
        }

        let table = index.sim_table();
        let query = SimQuery::new(&self.fp, self.coef, self.min, self.max);
        let interval = table.cells_interval(&query)?;

        let mut total = 0;
        if let Some((first, last)) = interval {
            for cell in first..=last {
                if table.cell_bound(cell, query.popcount, &query.coef)? >= query.min {
                    self.portions[cell] = table.portion_count(cell)?;
                    total += self.portions[cell];
                }
            }
        }

        debug!("similarity query popcount {} min {}: cells {:?}, {} portions", query.popcount, min, interval, total);

        self.interval = interval;
        self.cell = interval.map(|(first, _)| first).unwrap_or(0);
        self.total = total;

        return Ok(());
    }

    pub fn total_units(&self) -> usize {
        return self.total;
    }

    pub fn interval(&self) -> Option<(usize, usize)> {
        return self.interval;
    }

    pub fn current_cell(&self) -> Option<usize> {
        match self.interval {
            Some((_, last)) if self.cell <= last => Some(self.cell),
            _ => None,
        }
    }

    pub fn examined(&self, cell: usize) -> usize {
        return self.examined.get(cell).cloned().unwrap_or(0);
    }

    pub fn containers_count(&self, index: &Index) -> Result<usize> {
        let table = index.sim_table();
        let mut total = 0;
        for cell in 0..table.cell_count() {
            total += table.container_count(cell)?;
        }
        return Ok(total);
    }

    pub fn next(&mut self, index: &Index, partition: &Partition, progress: &mut Progress) -> Result<Option<Hit>> {
        loop {
            if let Some((id, value)) = self.hits.pop_front() {
                return Ok(Some(Hit { id, similarity: Some(value) }));
            }

            let more = match self.small {
                true => self.scan_block(index, partition, progress)?,
                false => self.search_portion(index, partition, progress)?,
            };

            if !more {
                return Ok(None);
            }
        }
    }

    /// Scores every accepted id of the row block holding `next_id`.
    fn scan_block(&mut self, index: &Index, partition: &Partition, progress: &mut Progress) -> Result<bool> {

        if self.next_id >= self.object_limit {
            return Ok(false);
        }

        let storage = index.sim_storage();
        let fp_size = storage.fp_size();
        let per_block = storage.fps_per_block();
        let block = self.next_id / per_block;
        let first_id = block * per_block;
        let end = std::cmp::min(self.object_limit, first_id + per_block);

        let packed = block < storage.block_count();
        if packed {
            self.rows.resize(storage.block_size(), 0);
            storage.get_block(block, &mut self.rows)?;
        }

        let query = SimQuery::new(&self.fp, self.coef, self.min, self.max);
        let mut found = 0;

        for id in self.next_id..end {
            if !partition.accepts(id) {
                continue;
            }

            let row = match packed {
                true => &self.rows[(id - first_id) * fp_size..(id - first_id + 1) * fp_size],
                false => {
                    let increment = storage.get_increment();
                    let row = id - first_id;
                    if (row + 1) * fp_size > increment.len() {
                        return Err(Error::NoSuchObject(id as u32));
                    }
                    &increment[row * fp_size..(row + 1) * fp_size]
                },
            };

            if let Some(value) = query.score(row) {
                if !index.cf_storage().is_removed(id) {
                    self.hits.push_back((id as u32, value));
                    found += 1;
                }
            }
        }

        self.next_id = end;
        progress.add_matches(found);
        progress.advance(end);

        return Ok(true);
    }

    /// Searches the next portion of the current cell, moving on to the next reachable cell when
    /// the current one is done.
    fn search_portion(&mut self, index: &Index, partition: &Partition, progress: &mut Progress) -> Result<bool> {

        let last = match self.interval {
            Some((_, last)) => last,
            None => return Ok(false),
        };

        let table = index.sim_table();
        let query = SimQuery::new(&self.fp, self.coef, self.min, self.max);

        while self.cell <= last {
            if self.portion >= self.portions[self.cell] {
                self.cell += 1;
                self.portion = 0;
                continue;
            }

            let portion = self.portion;
            let sequence = self.sequence;
            self.portion += 1;
            self.sequence += 1;

            let mut found = 0;
            if partition.accepts(sequence) {
                let mut results = Vec::new();
                let compared = table.search_portion(self.cell, portion, &query, &mut results)?;
                self.examined[self.cell] += compared;

                for (id, value) in results {
                    if id as usize >= self.object_limit || index.cf_storage().is_removed(id as usize) {
                        continue;
                    }
                    self.hits.push_back((id, value));
                    found += 1;
                }

                debug!("cell {} portion {}: {} compared, {} hits", self.cell, portion, compared, found);
            }

            progress.add_matches(found);
            progress.advance(self.sequence);

            return Ok(true);
        }

        return Ok(false);
    }
}
