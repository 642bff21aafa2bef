//! Typed offsets into an [`Arena`] and the records that can live behind them
//!
//! A `Handle<T>` is a plain `u64` offset and is only meaningful together with the arena it was
//! allocated from, which every dereference takes explicitly. Records are stored as fixed-size
//! BigEndian byte strings via [`ArenaRecord`], so nothing is constructed in place over raw memory.

use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::layout;
use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use std::marker::PhantomData;

/// A fixed-size value that can be written to and read from arena bytes.
pub trait ArenaRecord: Sized {
    const SIZE: usize;

    fn write_to(&self, slice: &mut [u8]);

    fn read_from(slice: &[u8]) -> Self;
}

impl ArenaRecord for u8 {
    const SIZE: usize = 1;

    fn write_to(&self, slice: &mut [u8]) {
        slice[0] = *self;
    }

    fn read_from(slice: &[u8]) -> Self {
        return slice[0];
    }
}

impl ArenaRecord for u32 {
    const SIZE: usize = layout::U32_SIZE;

    fn write_to(&self, slice: &mut [u8]) {
        BigEndian::write_u32(slice, *self);
    }

    fn read_from(slice: &[u8]) -> Self {
        return BigEndian::read_u32(slice);
    }
}

impl ArenaRecord for u64 {
    const SIZE: usize = layout::U64_SIZE;

    fn write_to(&self, slice: &mut [u8]) {
        BigEndian::write_u64(slice, *self);
    }

    fn read_from(slice: &[u8]) -> Self {
        return BigEndian::read_u64(slice);
    }
}

pub struct Handle<T> {
    offset: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.is_null() {
            true => write!(f, "Handle(null)"),
            false => write!(f, "Handle({})", self.offset),
        }
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Handle<T> {

    pub const fn null() -> Self {
        return Self { offset: layout::NULL_OFFSET, _marker: PhantomData };
    }

    pub const fn from_offset(offset: u64) -> Self {
        return Self { offset, _marker: PhantomData };
    }

    pub fn offset(&self) -> u64 {
        return self.offset;
    }

    pub fn is_null(&self) -> bool {
        return self.offset == layout::NULL_OFFSET;
    }

    pub fn cast<U>(self) -> Handle<U> {
        return Handle::from_offset(self.offset);
    }
}

impl<T: ArenaRecord> Handle<T> {

    /// Handle to the `index`-th record of an array starting at this handle.
    pub fn at(self, index: usize) -> Self {
        return Self::from_offset(self.offset + (index * T::SIZE) as u64);
    }

    pub fn get(self, arena: &Arena) -> Result<T> {
        let slice = arena.bytes(self.offset, T::SIZE)?;
        return Ok(T::read_from(slice));
    }

    pub fn set(self, arena: &mut Arena, value: &T) -> Result<()> {
        let slice = arena.bytes_mut(self.offset, T::SIZE)?;
        value.write_to(slice);
        return Ok(());
    }

    /// Raw bytes of `count` consecutive records.
    pub fn slice(self, arena: &Arena, count: usize) -> Result<&[u8]> {
        return arena.bytes(self.offset, count * T::SIZE);
    }

    pub fn slice_mut(self, arena: &mut Arena, count: usize) -> Result<&mut [u8]> {
        return arena.bytes_mut(self.offset, count * T::SIZE);
    }
}

impl<T> ArenaRecord for Handle<T> {
    const SIZE: usize = layout::HANDLE_SIZE;

    fn write_to(&self, slice: &mut [u8]) {
        BigEndian::write_u64(slice, self.offset);
    }

    fn read_from(slice: &[u8]) -> Self {
        return Self::from_offset(BigEndian::read_u64(slice));
    }
}

/// Growable persistent array: a header `{len, directory}` where the directory holds handles to
/// fixed-length blocks of records. Blocks never move once allocated, so handles to elements stay
/// valid while the array grows.
pub struct ArenaVec<T> {
    header: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ArenaVec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaVec<T> {}

impl<T> fmt::Debug for ArenaVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ArenaVec({})", self.header)
    }
}

impl<T> ArenaRecord for ArenaVec<T> {
    const SIZE: usize = layout::HANDLE_SIZE;

    fn write_to(&self, slice: &mut [u8]) {
        BigEndian::write_u64(slice, self.header);
    }

    fn read_from(slice: &[u8]) -> Self {
        return Self { header: BigEndian::read_u64(slice), _marker: PhantomData };
    }
}

impl<T: ArenaRecord> ArenaVec<T> {

    pub fn create(arena: &mut Arena) -> Result<Self> {

        let header = arena.allocate_bytes(layout::ARENA_VEC_HEADER_SIZE)?;

        let slice = arena.bytes_mut(header, layout::ARENA_VEC_HEADER_SIZE)?;
        BigEndian::write_u64(&mut slice[layout::ARENA_VEC_LEN_START..], 0);
        BigEndian::write_u64(&mut slice[layout::ARENA_VEC_DIR_START..], layout::NULL_OFFSET);

        return Ok(Self { header, _marker: PhantomData });
    }

    pub fn len(&self, arena: &Arena) -> Result<usize> {
        let slice = arena.bytes(self.header, layout::ARENA_VEC_HEADER_SIZE)?;
        return Ok(BigEndian::read_u64(&slice[layout::ARENA_VEC_LEN_START..]) as usize);
    }

    fn directory(&self, arena: &Arena) -> Result<Handle<Handle<T>>> {
        let slice = arena.bytes(self.header, layout::ARENA_VEC_HEADER_SIZE)?;
        return Ok(Handle::from_offset(BigEndian::read_u64(&slice[layout::ARENA_VEC_DIR_START..])));
    }

    fn element(&self, arena: &Arena, index: usize) -> Result<Handle<T>> {

        let len = self.len(arena)?;
        if index >= len {
            return Err(Error::Corruption(format!("array index {} out of {}", index, len)));
        }

        let block = self.directory(arena)?.at(index / layout::ARENA_VEC_BLOCK_LEN).get(arena)?;
        return Ok(block.at(index % layout::ARENA_VEC_BLOCK_LEN));
    }

    pub fn get(&self, arena: &Arena, index: usize) -> Result<T> {
        return self.element(arena, index)?.get(arena);
    }

    pub fn set(&self, arena: &mut Arena, index: usize, value: &T) -> Result<()> {
        let element = self.element(arena, index)?;
        return element.set(arena, value);
    }

    /// Appends a record and returns its index.
    pub fn push(&self, arena: &mut Arena, value: &T) -> Result<usize> {

        let len = self.len(arena)?;
        let block_index = len / layout::ARENA_VEC_BLOCK_LEN;

        if block_index >= layout::ARENA_VEC_MAX_BLOCKS {
            return Err(Error::InvalidParameter(format!("persistent array is full at {} records", len)));
        }

        let mut directory = self.directory(arena)?;
        if directory.is_null() {
            directory = arena.allocate::<Handle<T>>(layout::ARENA_VEC_MAX_BLOCKS)?;
            let slice = arena.bytes_mut(self.header, layout::ARENA_VEC_HEADER_SIZE)?;
            BigEndian::write_u64(&mut slice[layout::ARENA_VEC_DIR_START..], directory.offset());
        }

        if len % layout::ARENA_VEC_BLOCK_LEN == 0 {
            let block = arena.allocate::<T>(layout::ARENA_VEC_BLOCK_LEN)?;
            directory.at(block_index).set(arena, &block)?;
        }

        let block = directory.at(block_index).get(arena)?;
        block.at(len % layout::ARENA_VEC_BLOCK_LEN).set(arena, value)?;

        let slice = arena.bytes_mut(self.header, layout::ARENA_VEC_HEADER_SIZE)?;
        BigEndian::write_u64(&mut slice[layout::ARENA_VEC_LEN_START..], (len + 1) as u64);

        return Ok(len);
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[derive(Debug, PartialEq, Clone)]
    struct Pair {
        a: u32,
        b: u64,
    }

    impl ArenaRecord for Pair {
        const SIZE: usize = 12;

        fn write_to(&self, slice: &mut [u8]) {
            BigEndian::write_u32(&mut slice[0..4], self.a);
            BigEndian::write_u64(&mut slice[4..12], self.b);
        }

        fn read_from(slice: &[u8]) -> Self {
            return Self { a: BigEndian::read_u32(&slice[0..4]), b: BigEndian::read_u64(&slice[4..12]) };
        }
    }

    #[test]
    fn quick_null_handle() {
        let h: Handle<u32> = Handle::default();
        assert!(h.is_null());
        assert_eq!(h.offset(), u64::MAX);
        assert_eq!(format!("{:?}", h), "Handle(null)");
    }

    #[test]
    fn quick_handle_survives_as_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut arena = Arena::create(dir.path(), "h", "test", 1 << 16, 0).unwrap();

        let target = arena.allocate::<Pair>(1).unwrap();
        target.set(&mut arena, &Pair { a: 7, b: 9 }).unwrap();

        let slot = arena.allocate::<Handle<Pair>>(1).unwrap();
        slot.set(&mut arena, &target).unwrap();

        let resolved = slot.get(&arena).unwrap();
        assert_eq!(resolved, target);
        assert_eq!(resolved.get(&arena).unwrap(), Pair { a: 7, b: 9 });
    }

    #[test]
    fn quick_arena_vec_grows_across_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut arena = Arena::create(dir.path(), "v", "test", 1 << 16, 0).unwrap();

        let vec: ArenaVec<Pair> = ArenaVec::create(&mut arena).unwrap();
        let n = layout::ARENA_VEC_BLOCK_LEN * 3 + 5;

        for i in 0..n {
            let idx = vec.push(&mut arena, &Pair { a: i as u32, b: (i * 2) as u64 }).unwrap();
            assert_eq!(idx, i);
        }

        assert_eq!(vec.len(&arena).unwrap(), n);
        for i in 0..n {
            assert_eq!(vec.get(&arena, i).unwrap(), Pair { a: i as u32, b: (i * 2) as u64 });
        }

        vec.set(&mut arena, 3, &Pair { a: 0, b: 0 }).unwrap();
        assert_eq!(vec.get(&arena, 3).unwrap().b, 0);
        assert!(vec.get(&arena, n).is_err());
    }
}
