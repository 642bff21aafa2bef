//! Iterates every live id that existed when the matcher was created

use super::{Hit, Partition, Progress};
use crate::error::Result;
use crate::index::Index;

pub struct EnumerateSearch {
    next_id: usize,
    object_limit: usize,
}

impl EnumerateSearch {

    pub fn new(object_count: usize) -> Self {
        return Self { next_id: 0, object_limit: object_count };
    }

    pub fn total_units(&self) -> usize {
        return self.object_limit;
    }

    pub fn next(&mut self, index: &Index, partition: &Partition, progress: &mut Progress) -> Result<Option<Hit>> {

        while self.next_id < self.object_limit {
            let id = self.next_id;
            self.next_id += 1;

            let live = partition.accepts(id) && !index.cf_storage().is_removed(id);
            if live {
                progress.add_matches(1);
            }
            progress.advance(self.next_id);

            if live {
                return Ok(Some(Hit { id: id as u32, similarity: None }));
            }
        }

        return Ok(None);
    }
}

#[cfg(test)]
mod tests {

    use super::super::tests::{collect_ids, random_database};
    use crate::matcher::QueryData;
    use crate::object::PrecomputedObject;

    #[test]
    fn quick_enumerate_skips_tombstones_and_late_objects() {

        let dir = tempfile::tempdir().unwrap();
        let (db, objects) = random_database(dir.path(), 10, 71, 0, &[0, 4, 9]);

        let mut matcher = db.create_matcher("enum", QueryData::Enumerate, "").unwrap();
        db.add(&PrecomputedObject { cf: b"late".to_vec(), ..objects[1].clone() }).unwrap();

        let mut ids = Vec::new();
        while matcher.next().unwrap() {
            ids.push(matcher.current_id().unwrap());
        }

        assert_eq!(ids, vec![1, 2, 3, 5, 6, 7, 8]);
        assert_eq!(collect_ids(&db, "enum", QueryData::Enumerate, "part:1/2"), vec![2, 6, 8, 10]);
    }
}
