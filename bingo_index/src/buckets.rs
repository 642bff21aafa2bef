//! Candidate lookup for exact and formula queries
//!
//! Both stores persist one value per id and keep an in-memory value → ids map that is rebuilt on
//! load. Ids within a bucket are ascending.

use crate::error::{Error, Result};
use crate::layout;
use crate::record_store::RecordStore;
use byteorder::{BigEndian, ByteOrder};
use log::info;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const EXACT_FILE: &str = "exact_hash";
const FORMULA_NAME: &str = "gross";

/// Structural hash per id, stored as fixed-width `u32` entries.
#[derive(Debug)]
pub struct ExactStorage {
    file: File,
    hashes: Vec<u32>,
    buckets: HashMap<u32, Vec<u32>>,
    read_only: bool,
}

impl ExactStorage {

    pub fn create(dir: &Path) -> Result<Self> {

        let file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(true)
                    .open(dir.join(EXACT_FILE))?;

        return Ok(Self { file, hashes: Vec::new(), buckets: HashMap::new(), read_only: false });
    }

    pub fn load(dir: &Path, read_only: bool) -> Result<Self> {

        let mut file = OpenOptions::new()
                    .read(true)
                    .write(!read_only)
                    .open(dir.join(EXACT_FILE))?;

        let mut raw: Vec<u8> = Vec::new();
        file.read_to_end(&mut raw)?;

        if raw.len() % layout::EXACT_HASH_SIZE != 0 {
            return Err(Error::Corruption("exact hash file has a truncated entry".to_string()));
        }

        let mut storage = Self { file, hashes: Vec::new(), buckets: HashMap::new(), read_only };
        for entry in raw.chunks(layout::EXACT_HASH_SIZE) {
            storage.insert(BigEndian::read_u32(entry));
        }

        info!("loaded exact storage: {} hashes in {} buckets", storage.hashes.len(), storage.buckets.len());

        return Ok(storage);
    }

    fn insert(&mut self, hash: u32) {
        let id = self.hashes.len() as u32;
        self.hashes.push(hash);
        self.buckets.entry(hash).or_insert_with(Vec::new).push(id);
    }

    pub fn count(&self) -> usize {
        return self.hashes.len();
    }

    /// Records the hash of the next id, which must be `id`.
    pub fn add(&mut self, id: usize, hash: u32) -> Result<()> {

        if self.read_only {
            return Err(Error::ReadOnly);
        }

        if id != self.hashes.len() {
            return Err(Error::InvalidParameter(format!("exact storage expects id {}, got {}", self.hashes.len(), id)));
        }

        let mut arr = [0u8; layout::EXACT_HASH_SIZE];
        BigEndian::write_u32(&mut arr, hash);
        self.file.seek(SeekFrom::Start((id * layout::EXACT_HASH_SIZE) as u64))?;
        self.file.write_all(&arr)?;

        self.insert(hash);

        return Ok(());
    }

    pub fn hash(&self, id: usize) -> Option<u32> {
        return self.hashes.get(id).cloned();
    }

    pub fn candidates(&self, hash: u32) -> &[u32] {
        return match self.buckets.get(&hash) {
            Some(ids) => ids.as_slice(),
            None => &[],
        };
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.read_only {
            self.file.sync_data()?;
        }
        return Ok(());
    }
}

/// Canonical gross formula per id, stored in its own record store.
#[derive(Debug)]
pub struct FormulaStorage {
    store: RecordStore,
    buckets: HashMap<String, Vec<u32>>,
}

impl FormulaStorage {

    pub fn create(dir: &Path, block_size: usize) -> Result<Self> {
        let store = RecordStore::create(dir, FORMULA_NAME, block_size)?;
        return Ok(Self { store, buckets: HashMap::new() });
    }

    pub fn load(dir: &Path, block_size: usize, read_only: bool) -> Result<Self> {

        let store = RecordStore::load(dir, FORMULA_NAME, block_size, read_only)?;
        let mut buckets: HashMap<String, Vec<u32>> = HashMap::new();

        for id in 0..store.count() {
            if let Some(bytes) = store.get(id) {
                let formula = String::from_utf8_lossy(bytes).into_owned();
                buckets.entry(formula).or_insert_with(Vec::new).push(id as u32);
            }
        }

        return Ok(Self { store, buckets });
    }

    pub fn count(&self) -> usize {
        return self.store.count();
    }

    pub fn check_fits(&self, formula: &str) -> Result<()> {
        return self.store.check_fits(formula.len());
    }

    pub fn add(&mut self, id: usize, formula: &str) -> Result<()> {
        self.store.add(id, formula.as_bytes())?;
        self.buckets.entry(formula.to_string()).or_insert_with(Vec::new).push(id as u32);
        return Ok(());
    }

    pub fn formula(&self, id: usize) -> Option<&str> {
        return self.store.get(id).and_then(|bytes| std::str::from_utf8(bytes).ok());
    }

    pub fn candidates(&self, formula: &str) -> &[u32] {
        return match self.buckets.get(formula) {
            Some(ids) => ids.as_slice(),
            None => &[],
        };
    }

    pub fn flush(&mut self) -> Result<()> {
        return self.store.flush();
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn quick_exact_buckets_rebuilt_on_load() {

        let dir = tempfile::tempdir().unwrap();
        {
            let mut exact = ExactStorage::create(dir.path()).unwrap();
            for (id, hash) in [7u32, 3, 7, 9, 7].iter().enumerate() {
                exact.add(id, *hash).unwrap();
            }
            assert!(exact.add(9, 1).is_err());
            exact.flush().unwrap();
        }

        let exact = ExactStorage::load(dir.path(), true).unwrap();
        assert_eq!(exact.count(), 5);
        assert_eq!(exact.candidates(7), &[0, 2, 4]);
        assert_eq!(exact.candidates(3), &[1]);
        assert!(exact.candidates(100).is_empty());
        assert_eq!(exact.hash(3), Some(9));
    }

    #[test]
    fn quick_formula_buckets() {

        let dir = tempfile::tempdir().unwrap();
        {
            let mut gross = FormulaStorage::create(dir.path(), 4096).unwrap();
            gross.add(0, "C6 H6").unwrap();
            gross.add(1, "C7 H8").unwrap();
            gross.add(2, "C6 H6").unwrap();
            gross.flush().unwrap();
        }

        let gross = FormulaStorage::load(dir.path(), 4096, false).unwrap();
        assert_eq!(gross.candidates("C6 H6"), &[0, 2]);
        assert_eq!(gross.formula(1), Some("C7 H8"));
        assert!(gross.candidates("H2 O").is_empty());
        assert!(gross.check_fits("C6 H6").is_ok());
        assert!(matches!(gross.check_fits(&"C".repeat(5000)), Err(Error::RecordTooLarge(5000))));
    }
}
