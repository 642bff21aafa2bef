//! Exact and formula search: a bucket lookup followed by confirmation of each candidate

use super::{Hit, Partition, Progress};
use crate::error::Result;
use crate::index::Index;
use crate::object::Confirm;

pub struct CandidateSearch {
    candidates: Vec<u32>,
    pos: usize,
}

impl CandidateSearch {

    pub fn new(candidates: Vec<u32>) -> Self {
        return Self { candidates, pos: 0 };
    }

    pub fn total_units(&self) -> usize {
        return self.candidates.len();
    }

    pub fn next(&mut self, index: &Index, partition: &Partition, progress: &mut Progress, confirm: &mut dyn Confirm) -> Result<Option<Hit>> {

        while self.pos < self.candidates.len() {
            let id = self.candidates[self.pos];
            self.pos += 1;

            let matched = match (partition.accepts(id as usize), index.external_id(id), index.record(id)) {
                (true, Some(external), Some(record)) => confirm.confirm(external, record)?,
                _ => false,
            };

            if matched {
                progress.add_matches(1);
            }
            progress.advance(self.pos);

            if matched {
                return Ok(Some(Hit { id, similarity: None }));
            }
        }

        return Ok(None);
    }
}
