//! Append-only store of compressed structure records keyed by sequential id
//!
//! Bytes go to the `{name}_data` file, and `{name}_offset` holds one fixed-width
//! `{offset: i32, length: i16}` entry per id. A record never straddles a `block_size` boundary of
//! the data file. Removal writes the tombstone length -1; space is never reclaimed. Every record is
//! mirrored in memory and the mirror is rebuilt on load by replaying the offset file.

use crate::error::{Error, Result};
use crate::layout;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordAddr {
    pub offset: i32,
    pub length: i16,
}

impl RecordAddr {

    pub fn tombstone() -> Self {
        return Self { offset: 0, length: layout::CF_TOMBSTONE };
    }

    pub fn is_tombstone(&self) -> bool {
        return self.length == layout::CF_TOMBSTONE;
    }

    pub fn to_arr(&self) -> [u8; layout::CF_ENTRY_SIZE] {
        let mut arr = [0u8; layout::CF_ENTRY_SIZE];
        BigEndian::write_i32(&mut arr[layout::CF_OFFSET_START..], self.offset);
        BigEndian::write_i16(&mut arr[layout::CF_LENGTH_START..], self.length);
        return arr;
    }

    pub fn from_slice(slice: &[u8]) -> Self {
        return Self {
            offset: BigEndian::read_i32(&slice[layout::CF_OFFSET_START..]),
            length: BigEndian::read_i16(&slice[layout::CF_LENGTH_START..]),
        };
    }
}

#[derive(Debug)]
pub struct RecordStore {
    data: File,
    offsets: File,
    data_len: u64,
    block_size: usize,
    records: Vec<Option<Vec<u8>>>,
    read_only: bool,
}

fn open(path: &Path, create: bool, read_only: bool) -> Result<File> {
    let fd = OpenOptions::new()
                .create(create)
                .read(true)
                .write(create || !read_only)
                .truncate(create)
                .open(path)?;
    return Ok(fd);
}

impl RecordStore {

    pub fn create(dir: &Path, name: &str, block_size: usize) -> Result<Self> {

        if block_size == 0 || block_size > i32::MAX as usize {
            return Err(Error::InvalidParameter(format!("bad record block size {}", block_size)));
        }

        let data = open(&dir.join(format!("{}_data", name)), true, false)?;
        let offsets = open(&dir.join(format!("{}_offset", name)), true, false)?;

        return Ok(Self { data, offsets, data_len: 0, block_size, records: Vec::new(), read_only: false });
    }

    pub fn load(dir: &Path, name: &str, block_size: usize, read_only: bool) -> Result<Self> {

        let mut data = open(&dir.join(format!("{}_data", name)), false, read_only)?;
        let mut offsets = open(&dir.join(format!("{}_offset", name)), false, read_only)?;

        let data_len = data.metadata()?.len();

        let mut table: Vec<u8> = Vec::new();
        offsets.seek(SeekFrom::Start(0))?;
        offsets.read_to_end(&mut table)?;

        if table.len() % layout::CF_ENTRY_SIZE != 0 {
            return Err(Error::Corruption(format!("{} offset file has a truncated entry", name)));
        }

        let mut records: Vec<Option<Vec<u8>>> = Vec::with_capacity(table.len() / layout::CF_ENTRY_SIZE);

        for entry in table.chunks(layout::CF_ENTRY_SIZE) {
            let addr = RecordAddr::from_slice(entry);

            if addr.is_tombstone() {
                records.push(None);
                continue;
            }

            if addr.offset < 0 || addr.length < 0 || addr.offset as u64 + addr.length as u64 > data_len {
                return Err(Error::Corruption(format!("record entry {:?} outside {} data bytes", addr, data_len)));
            }

            let mut buf = vec![0u8; addr.length as usize];
            data.seek(SeekFrom::Start(addr.offset as u64))?;
            data.read_exact(&mut buf)?;
            records.push(Some(buf));
        }

        info!("loaded record store {}: {} records", name, records.len());

        return Ok(Self { data, offsets, data_len, block_size, records, read_only });
    }

    pub fn count(&self) -> usize {
        return self.records.len();
    }

    fn write_entry(&mut self, id: usize, addr: &RecordAddr) -> Result<()> {
        self.offsets.seek(SeekFrom::Start((id * layout::CF_ENTRY_SIZE) as u64))?;
        self.offsets.write_all(&addr.to_arr())?;
        return Ok(());
    }

    /// Data file offset the next record of `len` bytes would be written at.
    fn next_offset(&self, len: usize) -> u64 {
        let block_left = self.block_size as u64 - self.data_len % self.block_size as u64;
        return match (len as u64) > block_left {
            true => self.data_len + block_left,
            false => self.data_len,
        };
    }

    /// Fails the way `add` would for a record of `len` bytes, without touching the store.
    pub fn check_fits(&self, len: usize) -> Result<()> {

        if len > i16::MAX as usize || len > self.block_size {
            return Err(Error::RecordTooLarge(len));
        }

        if self.next_offset(len) + len as u64 > i32::MAX as u64 {
            return Err(Error::RecordTooLarge(len));
        }

        return Ok(());
    }

    /// Stores `bytes` under `id`. Ids skipped over are recorded as removed.
    pub fn add(&mut self, id: usize, bytes: &[u8]) -> Result<()> {

        if self.read_only {
            return Err(Error::ReadOnly);
        }

        self.check_fits(bytes.len())?;

        if id < self.records.len() {
            return Err(Error::InvalidParameter(format!("record {} already stored", id)));
        }

        while self.records.len() < id {
            let gap = self.records.len();
            self.write_entry(gap, &RecordAddr::tombstone())?;
            self.records.push(None);
        }

        let offset = self.next_offset(bytes.len());

        self.data.seek(SeekFrom::Start(offset))?;
        self.data.write_all(bytes)?;

        let addr = RecordAddr { offset: offset as i32, length: bytes.len() as i16 };
        self.write_entry(id, &addr)?;

        self.data_len = offset + bytes.len() as u64;
        self.records.push(Some(bytes.to_vec()));

        return Ok(());
    }

    /// Record bytes, or `None` if the id was removed or never stored.
    pub fn get(&self, id: usize) -> Option<&[u8]> {
        return match self.records.get(id) {
            Some(Some(bytes)) => Some(bytes.as_slice()),
            _ => None,
        };
    }

    pub fn is_removed(&self, id: usize) -> bool {
        return self.get(id).is_none();
    }

    /// Tombstones `id`. Removing an already removed id is a no-op.
    pub fn remove(&mut self, id: usize) -> Result<()> {

        if self.read_only {
            return Err(Error::ReadOnly);
        }

        match self.records.get(id) {
            None => return Err(Error::NoSuchObject(id as u32)),
            Some(None) => {
                warn!("record {} is already removed", id);
                return Ok(());
            },
            Some(Some(_)) => {},
        }

        self.write_entry(id, &RecordAddr::tombstone())?;
        self.records[id] = None;

        debug!("removed record {}", id);

        return Ok(());
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.data.sync_data()?;
        self.offsets.sync_data()?;
        return Ok(());
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn quick_add_get_remove() {

        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::create(dir.path(), "cf", 1024).unwrap();

        store.add(0, b"benzene").unwrap();
        store.add(1, b"toluene").unwrap();
        store.add(2, b"phenol").unwrap();

        assert_eq!(store.get(1), Some(&b"toluene"[..]));

        store.remove(1).unwrap();
        assert_eq!(store.get(1), None);

        store.remove(1).unwrap();
        assert_eq!(store.get(1), None);
        assert_eq!(store.get(0), Some(&b"benzene"[..]));
        assert_eq!(store.get(2), Some(&b"phenol"[..]));

        assert!(store.remove(3).is_err());
        assert!(store.add(2, b"x").is_err());
    }

    #[test]
    fn tombstones_survive_reload() {

        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = RecordStore::create(dir.path(), "cf", 16).unwrap();
            for i in 0..10usize {
                store.add(i, format!("record-{}", i).as_bytes()).unwrap();
            }
            store.remove(4).unwrap();
            store.remove(4).unwrap();
            store.add(12, b"late").unwrap();
            store.flush().unwrap();
        }

        let store = RecordStore::load(dir.path(), "cf", 16, true).unwrap();
        assert_eq!(store.count(), 13);

        for i in 0..10usize {
            match i {
                4 => assert!(store.is_removed(4)),
                _ => assert_eq!(store.get(i).unwrap(), format!("record-{}", i).as_bytes()),
            }
        }

        assert!(store.is_removed(10));
        assert!(store.is_removed(11));
        assert_eq!(store.get(12), Some(&b"late"[..]));
    }

    #[test]
    fn quick_oversized_record() {

        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::create(dir.path(), "cf", 1 << 20).unwrap();

        let big = vec![0u8; i16::MAX as usize + 1];
        match store.add(0, &big) {
            Err(Error::RecordTooLarge(_)) => {},
            other => panic!("unexpected {:?}", other),
        }
        assert!(store.check_fits(big.len()).is_err());
        assert!(store.check_fits(100).is_ok());
        assert_eq!(store.count(), 0);

        let mut small = RecordStore::create(dir.path(), "small", 8).unwrap();
        assert!(small.add(0, b"123456789").is_err());
        small.add(0, b"12345").unwrap();
        small.add(1, b"12345").unwrap();
        assert_eq!(small.get(1), Some(&b"12345"[..]));
    }
}
