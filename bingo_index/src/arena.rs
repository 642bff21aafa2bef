//! Bump-pointer allocator over a growable set of fixed-size memory-mapped segment files
//!
//! The arena is one flat address space of `u64` offsets. Segment `i` is the file `{name}{i}` and
//! covers offsets `[i * segment_size, (i + 1) * segment_size)`. Segment 0 starts with a type
//! string, the allocator state (segment size and free watermark) and a caller-sized header region.
//!
//! There is no free list: a request that does not fit in the remainder of the current segment
//! moves the watermark to the start of a brand new segment, and the tail of the old segment is
//! never reused.

use crate::error::{Error, Result};
use crate::handle::{ArenaRecord, Handle};
use crate::layout;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, info};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Arena {
    dir: PathBuf,
    name: String,
    segment_size: u64,
    free_off: u64,
    header_size: usize,
    read_only: bool,
    segments: Vec<MmapMut>,
}

pub(crate) fn align(value: u64) -> u64 {
    return (value + layout::ARENA_ALIGN - 1) / layout::ARENA_ALIGN * layout::ARENA_ALIGN;
}

impl Arena {

    /// Creates segment 0 and initializes the allocator state. Existing segment files are
    /// truncated.
    pub fn create(dir: &Path, name: &str, type_name: &str, segment_size: u64, header_size: usize) -> Result<Self> {

        let data_start = align((layout::ARENA_HEADER_START + header_size) as u64);

        if segment_size % layout::ARENA_ALIGN != 0 || segment_size <= data_start {
            return Err(Error::InvalidParameter(format!(
                "segment size {} cannot hold a {} byte header", segment_size, header_size)));
        }

        if type_name.len() > layout::ARENA_TYPE_SIZE {
            return Err(Error::InvalidParameter(format!("arena type '{}' is too long", type_name)));
        }

        let mut arena = Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            segment_size,
            free_off: data_start,
            header_size,
            read_only: false,
            segments: Vec::new(),
        };

        arena.add_segment()?;

        let seg = &mut arena.segments[0];
        seg[layout::ARENA_TYPE_START..layout::ARENA_TYPE_START + type_name.len()].copy_from_slice(type_name.as_bytes());
        BigEndian::write_u64(&mut seg[layout::ARENA_SEGMENT_SIZE_START..], segment_size);
        arena.store_free_off();

        info!("created arena {} with segment size {}", arena.segment_path(0).display(), segment_size);

        return Ok(arena);
    }

    /// Reopens an arena, opening as many segments as the stored free watermark covers.
    pub fn load(dir: &Path, name: &str, type_name: &str, header_size: usize, read_only: bool) -> Result<Self> {

        let mut arena = Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            segment_size: 0,
            free_off: 0,
            header_size,
            read_only,
            segments: Vec::new(),
        };

        let first = arena.open_segment(0)?;

        let stored_type = &first[layout::ARENA_TYPE_START..layout::ARENA_TYPE_START + layout::ARENA_TYPE_SIZE];
        let stored_type: Vec<u8> = stored_type.iter().cloned().take_while(|b| *b != 0).collect();
        if stored_type != type_name.as_bytes() {
            return Err(Error::IncompatibleDatabase(format!(
                "arena type is '{}', expected '{}'", String::from_utf8_lossy(&stored_type), type_name)));
        }

        arena.segment_size = BigEndian::read_u64(&first[layout::ARENA_SEGMENT_SIZE_START..]);
        arena.free_off = BigEndian::read_u64(&first[layout::ARENA_FREE_OFF_START..]);

        if arena.segment_size == 0 || first.len() as u64 != arena.segment_size {
            return Err(Error::Corruption(format!(
                "segment 0 of {} has {} bytes, header says {}", name, first.len(), arena.segment_size)));
        }

        arena.segments.push(first);

        let count = std::cmp::max(1, (arena.free_off + arena.segment_size - 1) / arena.segment_size) as usize;
        for i in 1..count {
            let seg = arena.open_segment(i)?;
            if seg.len() as u64 != arena.segment_size {
                return Err(Error::Corruption(format!(
                    "segment {} of {} has {} bytes, expected {}", i, name, seg.len(), arena.segment_size)));
            }
            arena.segments.push(seg);
        }

        info!("loaded arena {} with {} segments", name, arena.segments.len());

        return Ok(arena);
    }

    fn segment_path(&self, index: usize) -> PathBuf {
        return self.dir.join(format!("{}{}", self.name, index));
    }

    fn open_segment(&self, index: usize) -> Result<MmapMut> {

        let path = self.segment_path(index);

        let file = OpenOptions::new()
                    .read(true)
                    .write(!self.read_only)
                    .open(&path)?;

        let mmap = match self.read_only {
            true => unsafe { MmapOptions::new().map_copy(&file)? },
            false => unsafe { MmapOptions::new().map_mut(&file)? },
        };

        return Ok(mmap);
    }

    fn add_segment(&mut self) -> Result<()> {

        let path = self.segment_path(self.segments.len());

        let file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(true)
                    .open(&path)?;

        file.set_len(self.segment_size)?;

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        self.segments.push(mmap);

        debug!("opened arena segment {}", path.display());

        return Ok(());
    }

    fn store_free_off(&mut self) {
        let free_off = self.free_off;
        BigEndian::write_u64(&mut self.segments[0][layout::ARENA_FREE_OFF_START..], free_off);
    }

    /// Reserves `len` zeroed bytes and returns their offset.
    pub fn allocate_bytes(&mut self, len: usize) -> Result<u64> {

        if self.read_only {
            return Err(Error::ReadOnly);
        }

        let len = align(std::cmp::max(len, 1) as u64);

        if len > self.segment_size {
            return Err(Error::AllocationTooLarge { requested: len, segment_size: self.segment_size });
        }

        let mut start = self.free_off;
        let segment = start / self.segment_size;

        if start + len > (segment + 1) * self.segment_size {
            start = (segment + 1) * self.segment_size;
        }

        let needed = ((start + len + self.segment_size - 1) / self.segment_size) as usize;
        while self.segments.len() < needed {
            self.add_segment()?;
        }

        self.free_off = start + len;
        self.store_free_off();

        self.bytes_mut(start, len as usize)?.fill(0);

        return Ok(start);
    }

    /// Reserves room for `count` records of type `T`.
    pub fn allocate<T: ArenaRecord>(&mut self, count: usize) -> Result<Handle<T>> {
        let offset = self.allocate_bytes(count * T::SIZE)?;
        return Ok(Handle::from_offset(offset));
    }

    fn locate(&self, offset: u64, len: usize) -> Result<(usize, usize)> {

        if offset == layout::NULL_OFFSET {
            return Err(Error::Corruption("null handle dereference".to_string()));
        }

        match offset.checked_add(len as u64) {
            Some(end) if end <= self.free_off => {},
            _ => return Err(Error::OffsetOutOfBounds { offset, free_off: self.free_off }),
        }

        let segment = (offset / self.segment_size) as usize;
        let start = (offset % self.segment_size) as usize;

        if start + len > self.segment_size as usize || segment >= self.segments.len() {
            return Err(Error::Corruption(format!("range {}+{} crosses a segment boundary", offset, len)));
        }

        return Ok((segment, start));
    }

    pub fn bytes(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let (segment, start) = self.locate(offset, len)?;
        return Ok(&self.segments[segment][start..start + len]);
    }

    pub fn bytes_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        let (segment, start) = self.locate(offset, len)?;
        return Ok(&mut self.segments[segment][start..start + len]);
    }

    /// Handle to the caller-owned header region in segment 0.
    pub fn header_handle<T: ArenaRecord>(&self) -> Handle<T> {
        return Handle::from_offset(layout::ARENA_HEADER_START as u64);
    }

    pub fn header_size(&self) -> usize {
        return self.header_size;
    }

    pub fn segment_size(&self) -> u64 {
        return self.segment_size;
    }

    pub fn segment_count(&self) -> usize {
        return self.segments.len();
    }

    pub fn free_off(&self) -> u64 {
        return self.free_off;
    }

    pub fn flush(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        for seg in self.segments.iter() {
            seg.flush()?;
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn quick_allocation_spans_new_segment() {

        let dir = tempfile::tempdir().unwrap();
        let mut arena = Arena::create(dir.path(), "arena", "test", 4096, 64).unwrap();
        assert_eq!(arena.segment_count(), 1);

        let mut handles: Vec<Handle<u32>> = Vec::new();
        for i in 0..50u32 {
            let h = arena.allocate::<u32>(64).unwrap();
            for j in 0..64 {
                h.at(j).set(&mut arena, &(i * 1000 + j as u32)).unwrap();
            }
            handles.push(h);
        }

        assert!(arena.segment_count() > 1);

        for (i, h) in handles.iter().enumerate() {
            for j in 0..64 {
                assert_eq!(h.at(j).get(&arena).unwrap(), i as u32 * 1000 + j as u32);
            }
        }
    }

    #[test]
    fn quick_waste_is_skipped_not_split() {

        let dir = tempfile::tempdir().unwrap();
        let mut arena = Arena::create(dir.path(), "arena", "test", 4096, 0).unwrap();

        let first = arena.allocate_bytes(3000).unwrap();
        let second = arena.allocate_bytes(3000).unwrap();

        assert!(first < 4096);
        assert_eq!(second, 4096);
        assert_eq!(arena.segment_count(), 2);
    }

    #[test]
    fn quick_reload_restores_segments() {

        let dir = tempfile::tempdir().unwrap();
        let h = {
            let mut arena = Arena::create(dir.path(), "arena", "test", 4096, 16).unwrap();
            for _ in 0..5 {
                arena.allocate_bytes(2048).unwrap();
            }
            let h = arena.allocate::<u64>(1).unwrap();
            h.set(&mut arena, &0xdead_beef).unwrap();
            arena.flush().unwrap();
            h
        };

        let arena = Arena::load(dir.path(), "arena", "test", 16, false).unwrap();
        assert!(arena.segment_count() >= 3);
        assert_eq!(h.get(&arena).unwrap(), 0xdead_beef);
    }

    #[test]
    fn quick_oversized_and_out_of_bounds() {

        let dir = tempfile::tempdir().unwrap();
        let mut arena = Arena::create(dir.path(), "arena", "test", 4096, 0).unwrap();

        match arena.allocate_bytes(8192) {
            Err(Error::AllocationTooLarge { .. }) => {},
            other => panic!("unexpected {:?}", other),
        }

        let past = arena.free_off() + 16;
        match arena.bytes(past, 4) {
            Err(Error::OffsetOutOfBounds { .. }) => {},
            other => panic!("unexpected {:?}", other),
        }

        let null: Handle<u32> = Handle::null();
        assert!(null.get(&arena).is_err());
    }

    #[test]
    fn quick_type_mismatch_rejected() {

        let dir = tempfile::tempdir().unwrap();
        Arena::create(dir.path(), "arena", "one", 4096, 0).unwrap().flush().unwrap();

        match Arena::load(dir.path(), "arena", "two", 0, false) {
            Err(Error::IncompatibleDatabase(_)) => {},
            other => panic!("unexpected {:?}", other),
        }
    }
}
