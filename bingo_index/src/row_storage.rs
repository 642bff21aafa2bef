//! Row-major fingerprint storage
//!
//! Fingerprints are batched into an in-memory increment of `block_size / fp_size` rows. A full
//! increment is written as one block; until then its rows live in the meta side file.

use crate::error::{Error, Result};
use crate::fingerprint;
use crate::io::{BlockStorage, MetaFile, MetaHeader, MirroredBlockPager};
use log::debug;
use std::path::Path;

pub struct RowFpStorage {
    fp_size: usize,
    block_size: usize,
    storage: Box<dyn BlockStorage>,
    meta: MetaFile,
    increment: Vec<u8>,
    increment_count: usize,
    read_only: bool,
}

fn data_path(dir: &Path, name: &str) -> std::path::PathBuf {
    return dir.join(name);
}

fn meta_path(dir: &Path, name: &str) -> std::path::PathBuf {
    return dir.join(format!("{}_meta", name));
}

impl RowFpStorage {

    pub fn create(dir: &Path, name: &str, fp_size: usize, block_size: usize) -> Result<Self> {

        if fp_size == 0 || block_size < fp_size {
            return Err(Error::InvalidParameter(format!(
                "block size {} cannot hold a {} byte fingerprint", block_size, fp_size)));
        }

        let storage = MirroredBlockPager::create(&data_path(dir, name), block_size)?;
        let header = MetaHeader { fp_size, block_size, block_count: 0, increment_count: 0 };
        let meta = MetaFile::create(&meta_path(dir, name), &header)?;

        return Ok(Self {
            fp_size,
            block_size,
            storage: Box::new(storage),
            meta,
            increment: Vec::with_capacity(block_size),
            increment_count: 0,
            read_only: false,
        });
    }

    pub fn load(dir: &Path, name: &str, read_only: bool) -> Result<Self> {

        let mut meta = MetaFile::open(&meta_path(dir, name), read_only)?;
        let header = meta.read_header()?;

        if header.fp_size == 0 || header.block_size < header.fp_size {
            return Err(Error::Corruption(format!("bad row storage header {:?}", header)));
        }

        let storage = MirroredBlockPager::load(&data_path(dir, name), header.block_size, header.block_count, read_only)?;
        let increment = meta.read_rows(header.increment_count, header.fp_size)?;

        debug!("loaded row storage {}: {} blocks, {} in increment", name, header.block_count, header.increment_count);

        return Ok(Self {
            fp_size: header.fp_size,
            block_size: header.block_size,
            storage: Box::new(storage),
            meta,
            increment,
            increment_count: header.increment_count,
            read_only,
        });
    }

    fn header(&self) -> MetaHeader {
        return MetaHeader {
            fp_size: self.fp_size,
            block_size: self.block_size,
            block_count: self.storage.block_count(),
            increment_count: self.increment_count,
        };
    }

    pub fn fp_size(&self) -> usize {
        return self.fp_size;
    }

    pub fn block_size(&self) -> usize {
        return self.block_size;
    }

    pub fn fps_per_block(&self) -> usize {
        return self.block_size / self.fp_size;
    }

    pub fn block_count(&self) -> usize {
        return self.storage.block_count();
    }

    pub fn increment_count(&self) -> usize {
        return self.increment_count;
    }

    pub fn count(&self) -> usize {
        return self.block_count() * self.fps_per_block() + self.increment_count;
    }

    pub fn add(&mut self, fp: &[u8]) -> Result<()> {

        if self.read_only {
            return Err(Error::ReadOnly);
        }

        fingerprint::check_size(fp, self.fp_size)?;

        self.increment.extend_from_slice(fp);
        self.increment_count += 1;

        if self.increment_count == self.fps_per_block() {
            let mut block = std::mem::take(&mut self.increment);
            block.resize(self.block_size, 0);

            let id = self.storage.block_count();
            self.storage.write_block(id, &block)?;
            self.increment_count = 0;
            self.increment = Vec::with_capacity(self.block_size);
        } else {
            self.meta.write_row(self.increment_count - 1, fp)?;
        }

        let header = self.header();
        self.meta.write_header(&header)?;

        return Ok(());
    }

    /// Reads block `id` into `buf` (one block long); rows past `fps_per_block()` are padding.
    pub fn get_block(&self, id: usize, buf: &mut [u8]) -> Result<()> {
        return self.storage.read_block(id, buf);
    }

    /// Rows added since the last full block, concatenated.
    pub fn get_increment(&self) -> &[u8] {
        return &self.increment;
    }

    /// Copies fingerprint `index` into `buf`.
    pub fn get(&self, index: usize, buf: &mut [u8]) -> Result<()> {

        fingerprint::check_size(buf, self.fp_size)?;

        let per_block = self.fps_per_block();
        let block = index / per_block;

        if block < self.block_count() {
            let mut data = vec![0u8; self.block_size];
            self.storage.read_block(block, &mut data)?;
            let start = (index % per_block) * self.fp_size;
            buf.copy_from_slice(&data[start..start + self.fp_size]);
            return Ok(());
        }

        let row = index - self.block_count() * per_block;
        if row >= self.increment_count {
            return Err(Error::NoSuchObject(index as u32));
        }

        buf.copy_from_slice(&self.increment[row * self.fp_size..(row + 1) * self.fp_size]);
        return Ok(());
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.storage.flush()?;
        self.meta.flush()?;
        return Ok(());
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    #[test]
    fn quick_row_storage_flushes_full_increments() {

        let dir = tempfile::tempdir().unwrap();
        let mut storage = RowFpStorage::create(dir.path(), "sim", 8, 64).unwrap();
        assert_eq!(storage.fps_per_block(), 8);

        for i in 0..20u8 {
            storage.add(&[i; 8]).unwrap();
        }

        assert_eq!(storage.block_count(), 2);
        assert_eq!(storage.increment_count(), 4);
        assert_eq!(storage.count(), 20);

        let mut block = vec![0u8; 64];
        storage.get_block(1, &mut block).unwrap();
        assert_eq!(&block[0..8], &[8u8; 8]);
        assert_eq!(&storage.get_increment()[0..8], &[16u8; 8]);

        assert!(storage.add(&[0u8; 4]).is_err());
    }

    #[test]
    fn fingerprint_roundtrip_after_reload() {

        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let fps: Vec<Vec<u8>> = (0..53).map(|_| fingerprint::random_with(&mut rng, 16, 0.3)).collect();

        {
            let mut storage = RowFpStorage::create(dir.path(), "sim", 16, 128).unwrap();
            for fp in fps.iter() {
                storage.add(fp).unwrap();
            }
            storage.flush().unwrap();
        }

        let storage = RowFpStorage::load(dir.path(), "sim", true).unwrap();
        assert_eq!(storage.count(), fps.len());

        let mut buf = vec![0u8; 16];
        for (i, fp) in fps.iter().enumerate() {
            storage.get(i, &mut buf).unwrap();
            assert_eq!(&buf, fp);
        }

        assert!(storage.get(fps.len(), &mut buf).is_err());
    }

    #[test]
    fn quick_read_only_rejects_add() {

        let dir = tempfile::tempdir().unwrap();
        RowFpStorage::create(dir.path(), "sim", 8, 64).unwrap();

        let mut storage = RowFpStorage::load(dir.path(), "sim", true).unwrap();
        match storage.add(&[1u8; 8]) {
            Err(Error::ReadOnly) => {},
            other => panic!("unexpected {:?}", other),
        }
    }
}
