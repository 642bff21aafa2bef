//! Bit-column-major fingerprint storage for substructure screening
//!
//! Fingerprints are grouped into packs of `8 * block_size`. A full pack is written as one block
//! per fingerprint bit: block `pack * fp_bits + j` holds bit `j` of every fingerprint of the pack,
//! 8 fingerprints per byte, in insertion order. Screening a pack for bit `j` therefore reads one
//! block whatever the pack size. The partial pack stays row-major in the increment.

use crate::error::{Error, Result};
use crate::fingerprint;
use crate::io::{BlockStorage, FileBlockPager, MetaFile, MetaHeader};
use log::{debug, info};
use std::path::Path;

pub struct TransposedFpStorage {
    fp_size: usize,
    block_size: usize,
    storage: Box<dyn BlockStorage>,
    meta: MetaFile,
    increment: Vec<u8>,
    increment_count: usize,
    bit_usage: Vec<u32>,
    read_only: bool,
}

impl TransposedFpStorage {

    pub fn create(dir: &Path, name: &str, fp_size: usize, block_size: usize) -> Result<Self> {

        if fp_size == 0 || block_size == 0 {
            return Err(Error::InvalidParameter("transposed storage needs positive sizes".to_string()));
        }

        let storage = FileBlockPager::create(&dir.join(name), block_size)?;
        let header = MetaHeader { fp_size, block_size, block_count: 0, increment_count: 0 };
        let meta = MetaFile::create(&dir.join(format!("{}_meta", name)), &header)?;

        return Ok(Self {
            fp_size,
            block_size,
            storage: Box::new(storage),
            meta,
            increment: Vec::new(),
            increment_count: 0,
            bit_usage: vec![0; fp_size * 8],
            read_only: false,
        });
    }

    /// Reopens the storage and recomputes bit usage from the stored blocks and increment.
    pub fn load(dir: &Path, name: &str, read_only: bool) -> Result<Self> {

        let mut meta = MetaFile::open(&dir.join(format!("{}_meta", name)), read_only)?;
        let header = meta.read_header()?;
        let fp_bits = header.fp_size * 8;

        if fp_bits == 0 || header.block_size == 0 || header.block_count % fp_bits != 0 {
            return Err(Error::Corruption(format!("bad transposed storage header {:?}", header)));
        }

        let storage = FileBlockPager::load(&dir.join(name), header.block_size, header.block_count, read_only)?;
        let increment = meta.read_rows(header.increment_count, header.fp_size)?;

        let mut bit_usage = vec![0u32; fp_bits];
        let mut block = vec![0u8; header.block_size];
        for id in 0..header.block_count {
            storage.read_block(id, &mut block)?;
            bit_usage[id % fp_bits] += fingerprint::popcount(&block);
        }
        for row in increment.chunks(header.fp_size) {
            for bit in fingerprint::set_bits(row) {
                bit_usage[bit] += 1;
            }
        }

        info!("loaded transposed storage {}: {} packs, {} in increment",
              name, header.block_count / fp_bits, header.increment_count);

        return Ok(Self {
            fp_size: header.fp_size,
            block_size: header.block_size,
            storage: Box::new(storage),
            meta,
            increment,
            increment_count: header.increment_count,
            bit_usage,
            read_only,
        });
    }

    pub fn fp_size(&self) -> usize {
        return self.fp_size;
    }

    pub fn fp_bits(&self) -> usize {
        return self.fp_size * 8;
    }

    pub fn block_size(&self) -> usize {
        return self.block_size;
    }

    /// Fingerprints per full pack.
    pub fn pack_size(&self) -> usize {
        return self.block_size * 8;
    }

    pub fn pack_count(&self) -> usize {
        return self.storage.block_count() / self.fp_bits();
    }

    pub fn increment_count(&self) -> usize {
        return self.increment_count;
    }

    pub fn count(&self) -> usize {
        return self.pack_count() * self.pack_size() + self.increment_count;
    }

    /// How many stored fingerprints have each bit set.
    pub fn bit_usage(&self) -> &[u32] {
        return &self.bit_usage;
    }

    pub fn add(&mut self, fp: &[u8]) -> Result<()> {

        if self.read_only {
            return Err(Error::ReadOnly);
        }

        fingerprint::check_size(fp, self.fp_size)?;

        for bit in fingerprint::set_bits(fp) {
            self.bit_usage[bit] += 1;
        }

        self.increment.extend_from_slice(fp);
        self.increment_count += 1;

        match self.increment_count == self.pack_size() {
            true => self.write_pack()?,
            false => self.meta.write_row(self.increment_count - 1, fp)?,
        }

        let header = MetaHeader {
            fp_size: self.fp_size,
            block_size: self.block_size,
            block_count: self.storage.block_count(),
            increment_count: self.increment_count,
        };
        self.meta.write_header(&header)?;

        return Ok(());
    }

    fn write_pack(&mut self) -> Result<()> {

        let pack = self.pack_count();
        let mut block = vec![0u8; self.block_size];

        for bit in 0..self.fp_bits() {
            block.fill(0);
            for (k, row) in self.increment.chunks(self.fp_size).enumerate() {
                if fingerprint::get_bit(row, bit) {
                    fingerprint::set_bit(&mut block, k, true);
                }
            }
            self.storage.write_block(pack * self.fp_bits() + bit, &block)?;
        }

        debug!("wrote transposed pack {}", pack);

        self.increment.clear();
        self.increment_count = 0;

        return Ok(());
    }

    /// Reads the column of bit `bit` for pack `pack` into `buf` (one block long).
    pub fn get_block(&self, pack: usize, bit: usize, buf: &mut [u8]) -> Result<()> {

        if pack >= self.pack_count() || bit >= self.fp_bits() {
            return Err(Error::Corruption(format!("no block for pack {} bit {}", pack, bit)));
        }

        return self.storage.read_block(pack * self.fp_bits() + bit, buf);
    }

    /// Rows of the partial pack, concatenated in insertion order.
    pub fn get_increment(&self) -> &[u8] {
        return &self.increment;
    }

    /// Rebuilds fingerprint `index` from its pack columns or the increment.
    pub fn get(&self, index: usize) -> Result<Vec<u8>> {

        let pack = index / self.pack_size();

        if pack < self.pack_count() {
            let k = index % self.pack_size();
            let mut fp = vec![0u8; self.fp_size];
            let mut block = vec![0u8; self.block_size];
            for bit in 0..self.fp_bits() {
                self.get_block(pack, bit, &mut block)?;
                if fingerprint::get_bit(&block, k) {
                    fingerprint::set_bit(&mut fp, bit, true);
                }
            }
            return Ok(fp);
        }

        let row = index - self.pack_count() * self.pack_size();
        if row >= self.increment_count {
            return Err(Error::NoSuchObject(index as u32));
        }

        return Ok(self.increment[row * self.fp_size..(row + 1) * self.fp_size].to_vec());
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
