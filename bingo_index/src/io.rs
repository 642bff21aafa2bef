//! Handles read and write for whole fixed-size blocks on disk
//!
//! Two pagers share the [`BlockStorage`] trait: [`FileBlockPager`] seeks into the data file for
//! every access, [`MirroredBlockPager`] keeps every block in memory and writes through to the file.
//! [`MetaFile`] is the small side file a fingerprint storage keeps next to its blocks.

use crate::error::{Error, Result};
use crate::layout;
use byteorder::{BigEndian, ByteOrder};
use log::debug;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub trait BlockStorage: Send + Sync {

    fn block_size(&self) -> usize;

    fn block_count(&self) -> usize;

    /// Fills `buf` with block `id`. `buf` must be exactly one block long.
    fn read_block(&self, id: usize, buf: &mut [u8]) -> Result<()>;

    /// Writes block `id`; writing at `block_count()` appends.
    fn write_block(&mut self, id: usize, buf: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

fn open_block_file(path: &Path, create: bool, read_only: bool) -> Result<File> {

    let fd = OpenOptions::new()
                .create(create)
                .read(true)
                .write(create || !read_only)
                .truncate(create)
                .open(path)?;

    return Ok(fd);
}

fn check_block(id: usize, count: usize, buf_len: usize, block_size: usize, write: bool) -> Result<()> {

    if buf_len != block_size {
        return Err(Error::InvalidParameter(format!("buffer of {} bytes for block size {}", buf_len, block_size)));
    }

    let limit = match write {
        true => count + 1,
        false => count,
    };

    if id >= limit {
        return Err(Error::Corruption(format!("block {} out of {}", id, count)));
    }

    return Ok(());
}

#[derive(Debug)]
pub struct FileBlockPager {
    file: Mutex<File>,
    block_size: usize,
    block_count: usize,
}

impl FileBlockPager {

    pub fn create(path: &Path, block_size: usize) -> Result<Self> {
        let file = open_block_file(path, true, false)?;
        return Ok(Self { file: Mutex::new(file), block_size, block_count: 0 });
    }

    /// Reopens a data file holding `block_count` blocks.
    pub fn load(path: &Path, block_size: usize, block_count: usize, read_only: bool) -> Result<Self> {

        let file = open_block_file(path, false, read_only)?;

        let len = file.metadata()?.len() as usize;
        if len < block_size * block_count {
            return Err(Error::Corruption(format!(
                "{} holds {} bytes, expected {} blocks of {}", path.display(), len, block_count, block_size)));
        }

        return Ok(Self { file: Mutex::new(file), block_size, block_count });
    }
}

impl BlockStorage for FileBlockPager {

    fn block_size(&self) -> usize {
        return self.block_size;
    }

    fn block_count(&self) -> usize {
        return self.block_count;
    }

    fn read_block(&self, id: usize, buf: &mut [u8]) -> Result<()> {

        check_block(id, self.block_count, buf.len(), self.block_size, false)?;

        let mut fd = self.file.lock();
        fd.seek(SeekFrom::Start((id * self.block_size) as u64))?;
        fd.read_exact(buf)?;

        return Ok(());
    }

    fn write_block(&mut self, id: usize, buf: &[u8]) -> Result<()> {

        check_block(id, self.block_count, buf.len(), self.block_size, true)?;

        let fd = self.file.get_mut();
        fd.seek(SeekFrom::Start((id * self.block_size) as u64))?;
        fd.write_all(buf)?;

        if id == self.block_count {
            self.block_count += 1;
        }

        return Ok(());
    }

    fn flush(&mut self) -> Result<()> {
        self.file.get_mut().sync_data()?;
        return Ok(());
    }
}

/// In-memory copy of every block, written through to the data file.
#[derive(Debug)]
pub struct MirroredBlockPager {
    file: File,
    block_size: usize,
    store: Vec<Vec<u8>>,
}

impl MirroredBlockPager {

    pub fn create(path: &Path, block_size: usize) -> Result<Self> {
        let file = open_block_file(path, true, false)?;
        return Ok(Self { file, block_size, store: Vec::new() });
    }

    pub fn load(path: &Path, block_size: usize, block_count: usize, read_only: bool) -> Result<Self> {

        let mut file = open_block_file(path, false, read_only)?;
        let mut store: Vec<Vec<u8>> = Vec::with_capacity(block_count);

        file.seek(SeekFrom::Start(0))?;
        for _ in 0..block_count {
            let mut block = vec![0u8; block_size];
            file.read_exact(&mut block)?;
            store.push(block);
        }

        debug!("mirrored {} blocks from {}", block_count, path.display());

        return Ok(Self { file, block_size, store });
    }
}

impl BlockStorage for MirroredBlockPager {

    fn block_size(&self) -> usize {
        return self.block_size;
    }

    fn block_count(&self) -> usize {
        return self.store.len();
    }

    fn read_block(&self, id: usize, buf: &mut [u8]) -> Result<()> {
        check_block(id, self.store.len(), buf.len(), self.block_size, false)?;
        buf.copy_from_slice(&self.store[id]);
        return Ok(());
    }

    fn write_block(&mut self, id: usize, buf: &[u8]) -> Result<()> {

        check_block(id, self.store.len(), buf.len(), self.block_size, true)?;

        self.file.seek(SeekFrom::Start((id * self.block_size) as u64))?;
        self.file.write_all(buf)?;

        match id == self.store.len() {
            true => self.store.push(buf.to_vec()),
            false => self.store[id].copy_from_slice(buf),
        }

        return Ok(());
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        return Ok(());
    }
}

/// Counters of a fingerprint storage, stored at the start of its side file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaHeader {
    pub fp_size: usize,
    pub block_size: usize,
    pub block_count: usize,
    pub increment_count: usize,
}

impl MetaHeader {

    pub fn to_arr(&self) -> [u8; layout::META_HEADER_SIZE] {

        let mut arr = [0u8; layout::META_HEADER_SIZE];
        BigEndian::write_u32(&mut arr[layout::META_FP_SIZE_START..], self.fp_size as u32);
        BigEndian::write_u32(&mut arr[layout::META_BLOCK_SIZE_START..], self.block_size as u32);
        BigEndian::write_u64(&mut arr[layout::META_BLOCK_COUNT_START..], self.block_count as u64);
        BigEndian::write_u32(&mut arr[layout::META_INCREMENT_COUNT_START..], self.increment_count as u32);

        return arr;
    }

    pub fn from_slice(slice: &[u8]) -> Self {
        return Self {
            fp_size: BigEndian::read_u32(&slice[layout::META_FP_SIZE_START..]) as usize,
            block_size: BigEndian::read_u32(&slice[layout::META_BLOCK_SIZE_START..]) as usize,
            block_count: BigEndian::read_u64(&slice[layout::META_BLOCK_COUNT_START..]) as usize,
            increment_count: BigEndian::read_u32(&slice[layout::META_INCREMENT_COUNT_START..]) as usize,
        };
    }
}

/// Side file holding a [`MetaHeader`] followed by the unflushed increment rows.
///
/// Rows are written in place as they are appended and the header is rewritten after each one, so
/// a crash loses at most the row being appended.
#[derive(Debug)]
pub struct MetaFile {
    file: File,
}

impl MetaFile {

    pub fn create(path: &Path, header: &MetaHeader) -> Result<Self> {
        let mut meta = Self { file: open_block_file(path, true, false)? };
        meta.write_header(header)?;
        return Ok(meta);
    }

    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        return Ok(Self { file: open_block_file(path, false, read_only)? });
    }

    pub fn read_header(&mut self) -> Result<MetaHeader> {

        let mut arr = [0u8; layout::META_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut arr)?;

        return Ok(MetaHeader::from_slice(&arr));
    }

    pub fn write_header(&mut self, header: &MetaHeader) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_arr())?;
        return Ok(());
    }

    pub fn write_row(&mut self, index: usize, row: &[u8]) -> Result<()> {
        let start = layout::META_HEADER_SIZE + index * row.len();
        self.file.seek(SeekFrom::Start(start as u64))?;
        self.file.write_all(row)?;
        return Ok(());
    }

    /// Reads `count` rows of `row_size` bytes, concatenated.
    pub fn read_rows(&mut self, count: usize, row_size: usize) -> Result<Vec<u8>> {
        let mut rows = vec![0u8; count * row_size];
        self.file.seek(SeekFrom::Start(layout::META_HEADER_SIZE as u64))?;
        self.file.read_exact(&mut rows)?;
        return Ok(rows);
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        return Ok(());
    }
}
