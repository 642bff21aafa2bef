//! One popcount cell of the similarity index: frozen multibit-tree containers plus a mutable
//! increment
//!
//! Everything lives in the arena. The increment is a fixed buffer of `mt_size` fingerprints; when
//! it fills, a tree is built over it and stored as a new container, and the buffer is reused.

use crate::arena::{align, Arena};
use crate::error::{Error, Result};
use crate::handle::{ArenaRecord, ArenaVec, Handle};
use crate::layout;
use crate::multibit::{self, MultibitNode, SimQuery, TreeView};
use byteorder::{BigEndian, ByteOrder};
use log::info;

/// Largest single arena allocation a cell makes for containers of `mt_size` fingerprints.
pub fn largest_allocation(fp_size: usize, mt_size: usize) -> u64 {

    let sizes = [
        mt_size * fp_size,
        mt_size * layout::U32_SIZE,
        // leaves are never empty, so a tree has fewer than 2 * mt_size nodes
        (2 * mt_size).saturating_sub(1) * layout::NODE_SIZE,
        layout::ARENA_VEC_BLOCK_LEN * layout::CONTAINER_SIZE,
        layout::ARENA_VEC_MAX_BLOCKS * layout::HANDLE_SIZE,
    ];

    return sizes.iter().map(|size| align(*size as u64)).max().unwrap_or(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerRecord {
    pub count: u32,
    pub node_count: u32,
    pub fps: Handle<u8>,
    pub ids: Handle<u32>,
    pub nodes: Handle<MultibitNode>,
}

impl ArenaRecord for ContainerRecord {
    const SIZE: usize = layout::CONTAINER_SIZE;

    fn write_to(&self, slice: &mut [u8]) {
        BigEndian::write_u32(&mut slice[layout::CONTAINER_COUNT_START..], self.count);
        BigEndian::write_u32(&mut slice[layout::CONTAINER_NODE_COUNT_START..], self.node_count);
        self.fps.write_to(&mut slice[layout::CONTAINER_FPS_START..]);
        self.ids.write_to(&mut slice[layout::CONTAINER_IDS_START..]);
        self.nodes.write_to(&mut slice[layout::CONTAINER_NODES_START..]);
    }

    fn read_from(slice: &[u8]) -> Self {
        return Self {
            count: BigEndian::read_u32(&slice[layout::CONTAINER_COUNT_START..]),
            node_count: BigEndian::read_u32(&slice[layout::CONTAINER_NODE_COUNT_START..]),
            fps: Handle::read_from(&slice[layout::CONTAINER_FPS_START..]),
            ids: Handle::read_from(&slice[layout::CONTAINER_IDS_START..]),
            nodes: Handle::read_from(&slice[layout::CONTAINER_NODES_START..]),
        };
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CellRecord {
    pub min: u32,
    pub max: u32,
    pub increment_count: u32,
    pub increment_fps: Handle<u8>,
    pub increment_ids: Handle<u32>,
    pub containers: ArenaVec<ContainerRecord>,
}

impl ArenaRecord for CellRecord {
    const SIZE: usize = layout::CELL_SIZE;

    fn write_to(&self, slice: &mut [u8]) {
        BigEndian::write_u32(&mut slice[layout::CELL_MIN_START..], self.min);
        BigEndian::write_u32(&mut slice[layout::CELL_MAX_START..], self.max);
        BigEndian::write_u32(&mut slice[layout::CELL_INCREMENT_COUNT_START..], self.increment_count);
        self.increment_fps.write_to(&mut slice[layout::CELL_INCREMENT_FPS_START..]);
        self.increment_ids.write_to(&mut slice[layout::CELL_INCREMENT_IDS_START..]);
        self.containers.write_to(&mut slice[layout::CELL_CONTAINERS_START..]);
    }

    fn read_from(slice: &[u8]) -> Self {
        return Self {
            min: BigEndian::read_u32(&slice[layout::CELL_MIN_START..]),
            max: BigEndian::read_u32(&slice[layout::CELL_MAX_START..]),
            increment_count: BigEndian::read_u32(&slice[layout::CELL_INCREMENT_COUNT_START..]),
            increment_fps: Handle::read_from(&slice[layout::CELL_INCREMENT_FPS_START..]),
            increment_ids: Handle::read_from(&slice[layout::CELL_INCREMENT_IDS_START..]),
            containers: ArenaVec::read_from(&slice[layout::CELL_CONTAINERS_START..]),
        };
    }
}

fn decode_ids(bytes: &[u8]) -> Vec<u32> {
    return bytes.chunks(layout::U32_SIZE).map(BigEndian::read_u32).collect();
}

/// A cell covering popcounts `[min, max)`.
#[derive(Debug, Clone, Copy)]
pub struct ContainerSet {
    handle: Handle<CellRecord>,
    fp_size: usize,
    mt_size: usize,
}

impl ContainerSet {

    pub fn create(arena: &mut Arena, handle: Handle<CellRecord>, min: u32, max: u32, fp_size: usize, mt_size: usize) -> Result<Self> {

        let containers = ArenaVec::create(arena)?;
        let record = CellRecord {
            min,
            max,
            increment_count: 0,
            increment_fps: Handle::null(),
            increment_ids: Handle::null(),
            containers,
        };
        handle.set(arena, &record)?;

        return Ok(Self { handle, fp_size, mt_size });
    }

    pub fn open(handle: Handle<CellRecord>, fp_size: usize, mt_size: usize) -> Self {
        return Self { handle, fp_size, mt_size };
    }

    pub fn record(&self, arena: &Arena) -> Result<CellRecord> {
        return self.handle.get(arena);
    }

    /// Popcount bounds `[min, max)`.
    pub fn bounds(&self, arena: &Arena) -> Result<(u32, u32)> {
        let record = self.record(arena)?;
        return Ok((record.min, record.max));
    }

    pub fn contains(&self, arena: &Arena, popcount: u32) -> Result<bool> {
        let (min, max) = self.bounds(arena)?;
        return Ok(popcount >= min && popcount < max);
    }

    pub fn container_count(&self, arena: &Arena) -> Result<usize> {
        return self.record(arena)?.containers.len(arena);
    }

    pub fn increment_count(&self, arena: &Arena) -> Result<usize> {
        return Ok(self.record(arena)?.increment_count as usize);
    }

    /// Total fingerprints in containers and increment.
    pub fn count(&self, arena: &Arena) -> Result<usize> {
        let record = self.record(arena)?;
        let mut total = record.increment_count as usize;
        for i in 0..record.containers.len(arena)? {
            total += record.containers.get(arena, i)?.count as usize;
        }
        return Ok(total);
    }

    pub fn add(&self, arena: &mut Arena, fp: &[u8], id: u32) -> Result<()> {

        let mut record = self.record(arena)?;

        if record.increment_fps.is_null() {
            record.increment_fps = arena.allocate::<u8>(self.mt_size * self.fp_size)?;
            record.increment_ids = arena.allocate::<u32>(self.mt_size)?;
        }

        let slot = record.increment_count as usize;
        record.increment_fps.at(slot * self.fp_size).slice_mut(arena, self.fp_size)?.copy_from_slice(fp);
        record.increment_ids.at(slot).set(arena, &id)?;
        record.increment_count += 1;

        self.handle.set(arena, &record)?;

        if record.increment_count as usize == self.mt_size {
            self.build_container(arena)?;
        }

        return Ok(());
    }

    /// Freezes a non-empty increment into a new container.
    pub fn build_container(&self, arena: &mut Arena) -> Result<()> {

        let mut record = self.record(arena)?;
        let count = record.increment_count as usize;

        if count == 0 {
            return Ok(());
        }

        let fps = record.increment_fps.slice(arena, count * self.fp_size)?.to_vec();
        let ids = decode_ids(record.increment_ids.slice(arena, count)?);

        let tree = multibit::build(&fps, &ids, self.fp_size)?;

        let fps_handle = arena.allocate::<u8>(tree.fps.len())?;
        fps_handle.slice_mut(arena, tree.fps.len())?.copy_from_slice(&tree.fps);

        let ids_handle = arena.allocate::<u32>(tree.ids.len())?;
        for (i, id) in tree.ids.iter().enumerate() {
            ids_handle.at(i).set(arena, id)?;
        }

        let nodes_handle = arena.allocate::<MultibitNode>(tree.nodes.len())?;
        for (i, node) in tree.nodes.iter().enumerate() {
            nodes_handle.at(i).set(arena, node)?;
        }

        let container = ContainerRecord {
            count: count as u32,
            node_count: tree.nodes.len() as u32,
            fps: fps_handle,
            ids: ids_handle,
            nodes: nodes_handle,
        };
        let index = record.containers.push(arena, &container)?;

        record.increment_count = 0;
        self.handle.set(arena, &record)?;

        info!("cell [{}, {}): built container {} over {} fingerprints ({} nodes)",
              record.min, record.max, index, count, tree.nodes.len());

        return Ok(());
    }

    fn view<'a>(&self, arena: &'a Arena, container: &ContainerRecord) -> Result<TreeView<'a>> {
        return Ok(TreeView {
            nodes: container.nodes.slice(arena, container.node_count as usize)?,
            fps: container.fps.slice(arena, container.count as usize * self.fp_size)?,
            ids: container.ids.slice(arena, container.count as usize)?,
            fp_size: self.fp_size,
        });
    }

    /// Tree search of container `index`; returns the number of fingerprints compared.
    pub fn search_container(&self, arena: &Arena, index: usize, query: &SimQuery, results: &mut Vec<(u32, f64)>) -> Result<usize> {

        let record = self.record(arena)?;
        if index >= record.containers.len(arena)? {
            return Err(Error::Corruption(format!("container {} out of range", index)));
        }

        let container = record.containers.get(arena, index)?;
        let view = self.view(arena, &container)?;
        let b_max = record.max.saturating_sub(1);

        return view.search(query, record.min, b_max, results);
    }

    /// Linear scan of the increment; returns the number of fingerprints compared.
    pub fn search_increment(&self, arena: &Arena, query: &SimQuery, results: &mut Vec<(u32, f64)>) -> Result<usize> {

        let record = self.record(arena)?;
        let count = record.increment_count as usize;

        if count == 0 {
            return Ok(0);
        }

        let fps = record.increment_fps.slice(arena, count * self.fp_size)?;
        let ids = record.increment_ids.slice(arena, count)?;

        for i in 0..count {
            if let Some(value) = query.score(&fps[i * self.fp_size..(i + 1) * self.fp_size]) {
                results.push((BigEndian::read_u32(&ids[i * layout::U32_SIZE..]), value));
            }
        }

        return Ok(count);
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::coef::SimCoef;
    use crate::fingerprint;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    #[test]
    fn quick_increment_freezes_into_containers() {

        let dir = tempfile::tempdir().unwrap();
        let mut arena = Arena::create(dir.path(), "sim", "test", 1 << 20, 0).unwrap();
        let handle = arena.allocate::<CellRecord>(1).unwrap();

        let set = ContainerSet::create(&mut arena, handle, 0, 65, 8, 30).unwrap();
        let mut rng = StdRng::seed_from_u64(31);
        let fps: Vec<Vec<u8>> = (0..70).map(|_| fingerprint::random_with(&mut rng, 8, 0.4)).collect();

        for (i, fp) in fps.iter().enumerate() {
            set.add(&mut arena, fp, i as u32).unwrap();
        }

        assert_eq!(set.container_count(&arena).unwrap(), 2);
        assert_eq!(set.increment_count(&arena).unwrap(), 10);
        assert_eq!(set.count(&arena).unwrap(), 70);

        set.build_container(&mut arena).unwrap();
        assert_eq!(set.container_count(&arena).unwrap(), 3);
        assert_eq!(set.increment_count(&arena).unwrap(), 0);

        let query = SimQuery::new(&fps[45], SimCoef::Tanimoto, 1.0, 1.0);
        let mut results = Vec::new();
        for c in 0..3 {
            set.search_container(&arena, c, &query, &mut results).unwrap();
        }
        assert!(results.iter().any(|(id, value)| *id == 45 && *value == 1.0));
    }

    #[test]
    fn quick_cell_survives_reload() {

        let dir = tempfile::tempdir().unwrap();
        let fp = vec![0x0Fu8; 4];
        let handle = {
            let mut arena = Arena::create(dir.path(), "sim", "test", 1 << 16, 0).unwrap();
            let handle = arena.allocate::<CellRecord>(1).unwrap();
            let set = ContainerSet::create(&mut arena, handle, 10, 20, 4, 8).unwrap();
            set.add(&mut arena, &fp, 77).unwrap();
            arena.flush().unwrap();
            handle
        };

        let arena = Arena::load(dir.path(), "sim", "test", 0, true).unwrap();
        let set = ContainerSet::open(handle, 4, 8);
        assert_eq!(set.bounds(&arena).unwrap(), (10, 20));
        assert!(set.contains(&arena, 16).unwrap());
        assert!(!set.contains(&arena, 20).unwrap());

        let query = SimQuery::new(&fp, SimCoef::Tanimoto, 0.5, 1.0);
        let mut results = Vec::new();
        assert_eq!(set.search_increment(&arena, &query, &mut results).unwrap(), 1);
        assert_eq!(results, vec![(77, 1.0)]);
    }
}
