//! Substructure screening over the transposed fingerprint storage
//!
//! Each full pack is screened by intersecting the bit columns of the query's rarest bits (by
//! global bit usage), at most `SUB_MAX_SCREEN_BITS` of them. The intersection stops early once no
//! candidate is left. Screened candidates and the unpacked tail, which gets a full containment
//! test, are handed to the confirm step. Packs are partitioned by pack number, tail ids by id.

use super::{Hit, Partition, Progress};
use crate::error::Result;
use crate::fingerprint;
use crate::index::Index;
use crate::layout;
use crate::object::Confirm;
use log::debug;

pub struct SubstructureSearch {
    query: Vec<u8>,
    screen_bits: Vec<usize>,
    unmatchable: bool,
    pack_size: usize,
    pack_limit: usize,
    object_limit: usize,
    pack: usize,
    candidates: Vec<u32>,
    candidate_pos: usize,
    tail_id: usize,
    column: Vec<u8>,
    block: Vec<u8>,
}

impl SubstructureSearch {

    pub fn new(index: &Index, fp: Vec<u8>) -> Result<Self> {

        let storage = index.sub_storage();
        fingerprint::check_size(&fp, storage.fp_size())?;

        let usage = storage.bit_usage();
        let mut bits = fingerprint::set_bits(&fp);
        bits.sort_by_key(|bit| (usage[*bit], *bit));

        let unmatchable = bits.first().map(|bit| usage[*bit] == 0).unwrap_or(false);
        bits.truncate(layout::SUB_MAX_SCREEN_BITS);

        let pack_limit = storage.pack_count();

        return Ok(Self {
            query: fp,
            screen_bits: bits,
            unmatchable,
            pack_size: storage.pack_size(),
            pack_limit,
            object_limit: index.object_count(),
            pack: 0,
            candidates: Vec::new(),
            candidate_pos: 0,
            tail_id: pack_limit * storage.pack_size(),
            column: vec![0; storage.block_size()],
            block: vec![0; storage.block_size()],
        });
    }

    /// Object ids are the estimation units.
    pub fn total_units(&self) -> usize {
        return self.object_limit;
    }

    /// Intersects the screening columns of `pack` and keeps the surviving ids.
    fn screen(&mut self, index: &Index, pack: usize) -> Result<()> {

        let storage = index.sub_storage();
        self.column.fill(0xFF);

        for bit in self.screen_bits.iter() {
            storage.get_block(pack, *bit, &mut self.block)?;
            let mut any = false;
            for (c, b) in self.column.iter_mut().zip(self.block.iter()) {
                *c &= *b;
                any |= *c != 0;
            }
            if !any {
                break;
            }
        }

        let first_id = pack * self.pack_size;
        self.candidates = fingerprint::set_bits(&self.column)
            .into_iter()
            .map(|k| (first_id + k) as u32)
            .collect();
        self.candidate_pos = 0;

        debug!("pack {}: {} candidates after screening {} bits", pack, self.candidates.len(), self.screen_bits.len());

        return Ok(());
    }

    fn confirm(&self, index: &Index, position: u32, confirm: &mut dyn Confirm) -> Result<bool> {
        match (index.external_id(position), index.record(position)) {
            (Some(id), Some(record)) => confirm.confirm(id, record),
            _ => Ok(false),
        }
    }

    pub fn next(&mut self, index: &Index, partition: &Partition, progress: &mut Progress, confirm: &mut dyn Confirm) -> Result<Option<Hit>> {

        if self.unmatchable {
            return Ok(None);
        }

        loop {
            if self.candidate_pos < self.candidates.len() {
                let id = self.candidates[self.candidate_pos];
                self.candidate_pos += 1;

                let matched = self.confirm(index, id, confirm)?;
                if matched {
                    progress.add_matches(1);
                }
                progress.advance(id as usize + 1);

                if matched {
                    return Ok(Some(Hit { id, similarity: None }));
                }
                continue;
            }

            if self.pack < self.pack_limit {
                let pack = self.pack;
                self.pack += 1;

                match partition.accepts(pack) {
                    true => self.screen(index, pack)?,
                    false => self.candidates.clear(),
                }
                progress.advance(pack * self.pack_size);
                continue;
            }

            if self.tail_id < self.object_limit {
                let id = self.tail_id;
                self.tail_id += 1;

                let mut matched = false;
                if partition.accepts(id) {
                    let target = index.sub_storage().get(id)?;
                    matched = fingerprint::is_subset(&self.query, &target)
                        && self.confirm(index, id as u32, confirm)?;
                }

                if matched {
                    progress.add_matches(1);
                }
                progress.advance(id + 1);

                if matched {
                    return Ok(Some(Hit { id: id as u32, similarity: None }));
                }
                continue;
            }

            return Ok(None);
        }
    }
}

#[cfg(test)]
mod tests {

    use super::super::tests::{collect_ids, random_database};
    use crate::error::{Error, Result};
    use crate::fingerprint;
    use crate::matcher::QueryData;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    #[test]
    fn screened_hits_contain_the_query() {

        let dir = tempfile::tempdir().unwrap();
        let removed = [2, 33, 64];
        let (db, objects) = random_database(dir.path(), 150, 51, 0, &removed);

        {
            let index = db.read();
            assert!(index.sub_storage().pack_count() > 0);
            assert!(index.sub_storage().increment_count() > 0);
        }

        let mut rng = StdRng::seed_from_u64(52);
        for _ in 0..10 {
            let source = &objects[rng.gen_range(0..objects.len())].sub_fp;
            let mut query = vec![0u8; 8];
            for bit in fingerprint::set_bits(source).into_iter().take(4) {
                fingerprint::set_bit(&mut query, bit, true);
            }

            let got = collect_ids(&db, "sub", QueryData::Substructure { fp: query.clone() }, "");
            let expected: Vec<u32> = (0..objects.len() as u32)
                .filter(|id| !removed.contains(id))
                .filter(|id| fingerprint::is_subset(&query, &objects[*id as usize].sub_fp))
                .collect();

            assert_eq!(got, expected);
        }
    }

    #[test]
    fn quick_confirm_filters_and_sees_records() {

        let dir = tempfile::tempdir().unwrap();
        let (db, _) = random_database(dir.path(), 40, 53, 0, &[]);

        let confirm = |id: u32, record: &[u8]| -> Result<bool> {
            assert_eq!(record, format!("record-{}", id).as_bytes());
            Ok(id % 3 == 0)
        };

        let matcher = db.create_matcher_with("sub", QueryData::Substructure { fp: vec![0; 8] }, "", Box::new(confirm)).unwrap();
        let ids: Vec<u32> = matcher.map(|hit| hit.unwrap().id).collect();
        assert_eq!(ids, (0..40).filter(|id| id % 3 == 0).collect::<Vec<u32>>());

        let failing = |_id: u32, _record: &[u8]| -> Result<bool> { Err(Error::InvalidParameter("boom".to_string())) };
        let mut matcher = db.create_matcher_with("sub", QueryData::Substructure { fp: vec![0; 8] }, "", Box::new(failing)).unwrap();
        assert!(matcher.next().is_err());
        assert!(matches!(matcher.next(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn quick_unused_bit_short_circuits() {

        let dir = tempfile::tempdir().unwrap();
        let (db, objects) = random_database(dir.path(), 30, 54, 0, &[]);

        let mut union = vec![0u8; 8];
        for obj in objects.iter() {
            for (u, b) in union.iter_mut().zip(obj.sub_fp.iter()) {
                *u |= *b;
            }
        }

        match fingerprint::set_bits(&union).len() {
            64 => {},
            _ => {
                let unused = (0..64).find(|bit| !fingerprint::get_bit(&union, *bit)).unwrap();
                let mut query = vec![0u8; 8];
                fingerprint::set_bit(&mut query, unused, true);
                assert!(collect_ids(&db, "sub", QueryData::Substructure { fp: query }, "").is_empty());
            },
        }
    }
}
