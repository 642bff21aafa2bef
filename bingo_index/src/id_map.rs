//! Object ids as callers see them
//!
//! Storages address objects by position, the order they were added in. Callers may pick their own
//! id for an object instead; the `id_mapping` file holds the external id of every position
//! (`NO_OBJECT_ID` once removed) behind a header with the lowest id automatic assignment may
//! still hand out. The external → position map is rebuilt on load.

use crate::error::{Error, Result};
use crate::layout;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, info};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const ID_MAP_FILE: &str = "id_mapping";

#[derive(Debug)]
pub struct IdMapping {
    file: File,
    external: Vec<u32>,
    positions: HashMap<u32, u32>,
    first_free: u32,
    read_only: bool,
}

impl IdMapping {

    pub fn create(dir: &Path) -> Result<Self> {

        let mut file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(true)
                    .open(dir.join(ID_MAP_FILE))?;

        file.write_all(&[0u8; layout::ID_MAP_HEADER_SIZE])?;

        return Ok(Self { file, external: Vec::new(), positions: HashMap::new(), first_free: 0, read_only: false });
    }

    pub fn load(dir: &Path, read_only: bool) -> Result<Self> {

        let mut file = OpenOptions::new()
                    .read(true)
                    .write(!read_only)
                    .open(dir.join(ID_MAP_FILE))?;

        let mut raw: Vec<u8> = Vec::new();
        file.read_to_end(&mut raw)?;

        if raw.len() < layout::ID_MAP_HEADER_SIZE
            || (raw.len() - layout::ID_MAP_HEADER_SIZE) % layout::ID_MAP_ENTRY_SIZE != 0 {
            return Err(Error::Corruption("id mapping file has a truncated entry".to_string()));
        }

        let first_free = BigEndian::read_u32(&raw[layout::ID_MAP_FIRST_FREE_START..]);

        let mut external: Vec<u32> = Vec::new();
        let mut positions: HashMap<u32, u32> = HashMap::new();

        for (position, entry) in raw[layout::ID_MAP_HEADER_SIZE..].chunks(layout::ID_MAP_ENTRY_SIZE).enumerate() {
            let id = BigEndian::read_u32(entry);
            if id != layout::NO_OBJECT_ID && positions.insert(id, position as u32).is_some() {
                return Err(Error::Corruption(format!("object id {} mapped twice", id)));
            }
            external.push(id);
        }

        info!("loaded id mapping: {} positions, {} live ids", external.len(), positions.len());

        return Ok(Self { file, external, positions, first_free, read_only });
    }

    /// Number of positions, removed ones included.
    pub fn count(&self) -> usize {
        return self.external.len();
    }

    pub fn position(&self, id: u32) -> Option<u32> {
        return self.positions.get(&id).cloned();
    }

    /// External id of a live position.
    pub fn external(&self, position: u32) -> Option<u32> {
        return match self.external.get(position as usize) {
            Some(id) if *id != layout::NO_OBJECT_ID => Some(*id),
            _ => None,
        };
    }

    pub fn contains(&self, id: u32) -> bool {
        return self.positions.contains_key(&id);
    }

    /// Lowest unused id at or above the last automatically assigned one.
    pub fn next_free(&self) -> Result<u32> {
        let mut id = self.first_free;
        while self.positions.contains_key(&id) {
            id = id.checked_add(1).filter(|next| *next != layout::NO_OBJECT_ID)
                .ok_or_else(|| Error::InvalidParameter("object ids exhausted".to_string()))?;
        }
        return Ok(id);
    }

    /// Fails the way `add` would for `id`, without touching the mapping.
    pub fn check_free(&self, id: u32) -> Result<()> {
        if id == layout::NO_OBJECT_ID {
            return Err(Error::InvalidParameter(format!("object id {} is reserved", id)));
        }
        if self.contains(id) {
            return Err(Error::IdInUse(id));
        }
        return Ok(());
    }

    fn write_entry(&mut self, position: usize, id: u32) -> Result<()> {
        let mut arr = [0u8; layout::ID_MAP_ENTRY_SIZE];
        BigEndian::write_u32(&mut arr, id);
        self.file.seek(SeekFrom::Start((layout::ID_MAP_HEADER_SIZE + position * layout::ID_MAP_ENTRY_SIZE) as u64))?;
        self.file.write_all(&arr)?;
        return Ok(());
    }

    /// Maps the next position, which must be `position`, to `id`. `automatic` ids also raise the
    /// point the next automatic search starts from.
    pub fn add(&mut self, position: usize, id: u32, automatic: bool) -> Result<()> {

        if self.read_only {
            return Err(Error::ReadOnly);
        }

        if position != self.external.len() {
            return Err(Error::InvalidParameter(format!("id mapping expects position {}, got {}", self.external.len(), position)));
        }

        self.check_free(id)?;
        self.write_entry(position, id)?;

        if automatic {
            let mut arr = [0u8; layout::U32_SIZE];
            BigEndian::write_u32(&mut arr, id);
            self.file.seek(SeekFrom::Start(layout::ID_MAP_FIRST_FREE_START as u64))?;
            self.file.write_all(&arr)?;
            self.first_free = id;
        }

        self.external.push(id);
        self.positions.insert(id, position as u32);

        return Ok(());
    }

    /// Unmaps `id` and returns the position it had. The id may be used again afterwards.
    pub fn remove(&mut self, id: u32) -> Result<u32> {

        if self.read_only {
            return Err(Error::ReadOnly);
        }

        let position = self.position(id).ok_or(Error::NoSuchObject(id))?;
        self.write_entry(position as usize, layout::NO_OBJECT_ID)?;

        self.external[position as usize] = layout::NO_OBJECT_ID;
        self.positions.remove(&id);

        debug!("unmapped object id {} at position {}", id, position);

        return Ok(position);
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.read_only {
            self.file.sync_data()?;
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn quick_automatic_ids_skip_taken_ones() {

        let dir = tempfile::tempdir().unwrap();
        let mut mapping = IdMapping::create(dir.path()).unwrap();

        mapping.add(0, 1, false).unwrap();
        let id = mapping.next_free().unwrap();
        assert_eq!(id, 0);
        mapping.add(1, id, true).unwrap();

        let id = mapping.next_free().unwrap();
        assert_eq!(id, 2);
        mapping.add(2, id, true).unwrap();

        assert!(matches!(mapping.add(3, 1, false), Err(Error::IdInUse(1))));
        assert!(mapping.add(5, 9, false).is_err());
        assert!(mapping.check_free(layout::NO_OBJECT_ID).is_err());

        assert_eq!(mapping.position(1), Some(0));
        assert_eq!(mapping.external(1), Some(0));
        assert_eq!(mapping.count(), 3);
    }

    #[test]
    fn quick_removal_frees_the_id_and_survives_reload() {

        let dir = tempfile::tempdir().unwrap();
        {
            let mut mapping = IdMapping::create(dir.path()).unwrap();
            for (position, id) in [10u32, 20, 30].iter().enumerate() {
                mapping.add(position, *id, false).unwrap();
            }
            mapping.add(3, 0, true).unwrap();

            assert_eq!(mapping.remove(20).unwrap(), 1);
            assert!(matches!(mapping.remove(20), Err(Error::NoSuchObject(20))));
            assert!(matches!(mapping.remove(99), Err(Error::NoSuchObject(99))));
            mapping.flush().unwrap();
        }

        let mut mapping = IdMapping::load(dir.path(), false).unwrap();
        assert_eq!(mapping.count(), 4);
        assert_eq!(mapping.external(1), None);
        assert_eq!(mapping.position(30), Some(2));
        assert!(!mapping.contains(20));
        assert_eq!(mapping.next_free().unwrap(), 1);

        mapping.add(4, 20, false).unwrap();
        assert_eq!(mapping.position(20), Some(4));
    }
}
