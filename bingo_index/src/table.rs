//! Similarity index: fingerprints bucketed into popcount cells, each cell a [`ContainerSet`]
//!
//! The table owns its arena. The arena header region holds a [`TableHeader`] pointing at the
//! contiguous array of cell records, so the whole index is reopened from the arena alone.

use crate::arena::Arena;
use crate::coef::SimCoef;
use crate::container::{self, CellRecord, ContainerSet};
use crate::error::{Error, Result};
use crate::fingerprint;
use crate::handle::{ArenaRecord, Handle};
use crate::layout;
use crate::multibit::SimQuery;
use byteorder::{BigEndian, ByteOrder};
use log::info;
use std::path::Path;

const ARENA_NAME: &str = "sim_index_";
const ARENA_TYPE: &str = "bingo-sim-table";

/// Number of cells used when no boundaries are configured.
const DEFAULT_CELL_COUNT: u32 = 16;

#[derive(Debug, Clone, Copy)]
pub struct TableHeader {
    pub fp_size: u32,
    pub mt_size: u32,
    pub cell_count: u32,
    pub cells: Handle<CellRecord>,
}

impl ArenaRecord for TableHeader {
    const SIZE: usize = layout::TABLE_HEADER_SIZE;

    fn write_to(&self, slice: &mut [u8]) {
        BigEndian::write_u32(&mut slice[layout::TABLE_FP_SIZE_START..], self.fp_size);
        BigEndian::write_u32(&mut slice[layout::TABLE_MT_SIZE_START..], self.mt_size);
        BigEndian::write_u32(&mut slice[layout::TABLE_CELL_COUNT_START..], self.cell_count);
        self.cells.write_to(&mut slice[layout::TABLE_CELLS_START..]);
    }

    fn read_from(slice: &[u8]) -> Self {
        return Self {
            fp_size: BigEndian::read_u32(&slice[layout::TABLE_FP_SIZE_START..]),
            mt_size: BigEndian::read_u32(&slice[layout::TABLE_MT_SIZE_START..]),
            cell_count: BigEndian::read_u32(&slice[layout::TABLE_CELL_COUNT_START..]),
            cells: Handle::read_from(&slice[layout::TABLE_CELLS_START..]),
        };
    }
}

/// Equal-width boundaries covering every possible popcount.
pub fn default_bounds(fp_size: usize) -> Vec<u32> {
    let popcounts = (fp_size * 8 + 1) as u32;
    let width = std::cmp::max(1, (popcounts + DEFAULT_CELL_COUNT - 1) / DEFAULT_CELL_COUNT);
    return (0..popcounts).step_by(width as usize).collect();
}

/// Fails unless every allocation of a table with these sizes fits in one arena segment.
pub fn check_capacity(fp_size: usize, mt_size: usize, segment_size: u64) -> Result<()> {

    let largest = container::largest_allocation(fp_size, mt_size);
    if largest > segment_size {
        return Err(Error::InvalidParameter(format!(
            "mt_size {} with {} byte fingerprints needs {} byte allocations, segment size is {}",
            mt_size, fp_size, largest, segment_size)));
    }

    return Ok(());
}

/// Turns ascending cell start points into disjoint `[min, max)` cells covering `0..=fp_bits`.
/// A leading `[0, first)` and a trailing catch-all cell are added when the boundaries leave gaps.
pub fn cells_from_bounds(bounds: &[u32], fp_size: usize) -> Result<Vec<(u32, u32)>> {

    let end = (fp_size * 8 + 1) as u32;

    if bounds.is_empty() {
        return Err(Error::InvalidParameter("no cell boundaries".to_string()));
    }

    if bounds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::InvalidParameter(format!("cell boundaries must be strictly increasing: {:?}", bounds)));
    }

    let mut points: Vec<u32> = bounds.iter().cloned().filter(|b| *b < end).collect();
    if points.first() != Some(&0) {
        points.insert(0, 0);
    }
    points.push(end);

    return Ok(points.windows(2).map(|w| (w[0], w[1])).collect());
}

pub struct FingerprintTable {
    arena: Arena,
    fp_size: usize,
    mt_size: usize,
    cells: Vec<ContainerSet>,
}

impl FingerprintTable {

    pub fn create(dir: &Path, fp_size: usize, mt_size: usize, bounds: &[u32], segment_size: u64) -> Result<Self> {

        if mt_size == 0 {
            return Err(Error::InvalidParameter("container size must be positive".to_string()));
        }
        check_capacity(fp_size, mt_size, segment_size)?;

        let ranges = cells_from_bounds(bounds, fp_size)?;
        let mut arena = Arena::create(dir, ARENA_NAME, ARENA_TYPE, segment_size, layout::TABLE_HEADER_SIZE)?;

        let cells_handle = arena.allocate::<CellRecord>(ranges.len())?;
        let mut cells: Vec<ContainerSet> = Vec::with_capacity(ranges.len());
        for (i, (min, max)) in ranges.iter().enumerate() {
            cells.push(ContainerSet::create(&mut arena, cells_handle.at(i), *min, *max, fp_size, mt_size)?);
        }

        let header = TableHeader {
            fp_size: fp_size as u32,
            mt_size: mt_size as u32,
            cell_count: ranges.len() as u32,
            cells: cells_handle,
        };
        arena.header_handle::<TableHeader>().set(&mut arena, &header)?;

        info!("created similarity table with cells {:?}", ranges);

        return Ok(Self { arena, fp_size, mt_size, cells });
    }

    pub fn load(dir: &Path, read_only: bool) -> Result<Self> {

        let arena = Arena::load(dir, ARENA_NAME, ARENA_TYPE, layout::TABLE_HEADER_SIZE, read_only)?;
        let header = arena.header_handle::<TableHeader>().get(&arena)?;

        let fp_size = header.fp_size as usize;
        let mt_size = header.mt_size as usize;

        if fp_size == 0 || mt_size == 0 || header.cell_count == 0 {
            return Err(Error::Corruption(format!("bad similarity table header {:?}", header)));
        }

        let cells: Vec<ContainerSet> = (0..header.cell_count as usize)
            .map(|i| ContainerSet::open(header.cells.at(i), fp_size, mt_size))
            .collect();

        info!("loaded similarity table: {} cells, {} segments", cells.len(), arena.segment_count());

        return Ok(Self { arena, fp_size, mt_size, cells });
    }

    pub fn arena(&self) -> &Arena {
        return &self.arena;
    }

    pub fn fp_size(&self) -> usize {
        return self.fp_size;
    }

    pub fn mt_size(&self) -> usize {
        return self.mt_size;
    }

    pub fn cell_count(&self) -> usize {
        return self.cells.len();
    }

    pub fn cell_bounds(&self, cell: usize) -> Result<(u32, u32)> {
        return self.cells[cell].bounds(&self.arena);
    }

    pub fn container_count(&self, cell: usize) -> Result<usize> {
        return self.cells[cell].container_count(&self.arena);
    }

    /// Containers plus the increment.
    pub fn portion_count(&self, cell: usize) -> Result<usize> {
        return Ok(self.container_count(cell)? + 1);
    }

    pub fn count(&self) -> Result<usize> {
        let mut total = 0;
        for cell in self.cells.iter() {
            total += cell.count(&self.arena)?;
        }
        return Ok(total);
    }

    /// Adds `fp` to every cell whose bounds contain its popcount.
    pub fn add(&mut self, fp: &[u8], id: u32) -> Result<()> {

        fingerprint::check_size(fp, self.fp_size)?;
        let popcount = fingerprint::popcount(fp);

        for cell in self.cells.iter() {
            if cell.contains(&self.arena, popcount)? {
                cell.add(&mut self.arena, fp, id)?;
            }
        }

        return Ok(());
    }

    /// Builds trees over every non-empty increment.
    pub fn optimize(&mut self) -> Result<()> {
        for cell in self.cells.iter() {
            cell.build_container(&mut self.arena)?;
        }
        return Ok(());
    }

    /// Best coefficient any fingerprint of `cell` could reach against a query with popcount `a`.
    pub fn cell_bound(&self, cell: usize, a: u32, coef: &SimCoef) -> Result<f64> {
        let (min, max) = self.cell_bounds(cell)?;
        return Ok(coef.range_bound(a, min, max.saturating_sub(1)));
    }

    /// First and last cell whose bound reaches `min`, if any.
    pub fn cells_interval(&self, query: &SimQuery) -> Result<Option<(usize, usize)>> {

        let mut first: Option<usize> = None;
        let mut last: Option<usize> = None;

        for cell in 0..self.cells.len() {
            if self.cell_bound(cell, query.popcount, &query.coef)? >= query.min {
                first.get_or_insert(cell);
                last = Some(cell);
            }
        }

        return Ok(first.zip(last));
    }

    /// Searches one portion of a cell: a container for `portion < container_count`, the increment
    /// for `portion == container_count`. Returns the number of fingerprints compared.
    pub fn search_portion(&self, cell: usize, portion: usize, query: &SimQuery, results: &mut Vec<(u32, f64)>) -> Result<usize> {

        let set = &self.cells[cell];
        let containers = set.container_count(&self.arena)?;

        return match portion.cmp(&containers) {
            std::cmp::Ordering::Less => set.search_container(&self.arena, portion, query, results),
            std::cmp::Ordering::Equal => set.search_increment(&self.arena, query, results),
            std::cmp::Ordering::Greater => Err(Error::Corruption(format!("portion {} of cell {} out of range", portion, cell))),
        };
    }

    pub fn flush(&self) -> Result<()> {
        return self.arena.flush();
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    #[test]
    fn quick_bounds_are_completed() {

        assert_eq!(cells_from_bounds(&[0, 32, 64, 96], 32).unwrap(),
                   vec![(0, 32), (32, 64), (64, 96), (96, 257)]);
        assert_eq!(cells_from_bounds(&[10, 20], 4).unwrap(), vec![(0, 10), (10, 20), (20, 33)]);
        assert_eq!(cells_from_bounds(&[0, 40], 4).unwrap(), vec![(0, 33)]);
        assert!(cells_from_bounds(&[5, 5], 4).is_err());
        assert!(cells_from_bounds(&[], 4).is_err());

        let cells = cells_from_bounds(&default_bounds(8), 8).unwrap();
        assert_eq!(cells.first().unwrap().0, 0);
        assert_eq!(cells.last().unwrap().1, 65);
    }

    #[test]
    fn pruned_table_search_matches_linear_scan() {

        let dir = tempfile::tempdir().unwrap();
        let fp_size = 8;
        let mut table = FingerprintTable::create(dir.path(), fp_size, 40, &[0, 12, 20, 28, 40], 1 << 20).unwrap();

        let mut rng = StdRng::seed_from_u64(41);
        let fps: Vec<Vec<u8>> = (0..300)
            .map(|_| {
                let density = rng.gen_range(0.1..0.6);
                fingerprint::random_with(&mut rng, fp_size, density)
            })
            .collect();

        for (i, fp) in fps.iter().enumerate() {
            table.add(fp, i as u32).unwrap();
        }
        assert_eq!(table.count().unwrap(), 300);

        for q in 0..15 {
            let query = SimQuery::new(&fps[q * 7], SimCoef::Tanimoto, 0.6, 1.0);

            let mut expected: Vec<u32> = (0..fps.len())
                .filter(|i| query.score(&fps[*i]).is_some())
                .map(|i| i as u32)
                .collect();

            let mut got: Vec<u32> = Vec::new();
            if let Some((first, last)) = table.cells_interval(&query).unwrap() {
                for cell in first..=last {
                    if table.cell_bound(cell, query.popcount, &query.coef).unwrap() < query.min {
                        continue;
                    }
                    for portion in 0..table.portion_count(cell).unwrap() {
                        let mut found = Vec::new();
                        table.search_portion(cell, portion, &query, &mut found).unwrap();
                        got.extend(found.iter().map(|(id, _)| *id));
                    }
                }
            }

            expected.sort();
            got.sort();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn quick_table_reload() {

        let dir = tempfile::tempdir().unwrap();
        {
            let mut table = FingerprintTable::create(dir.path(), 4, 5, &[0, 8, 16], 1 << 16).unwrap();
            for i in 0..12u32 {
                table.add(&[i as u8, 0, 0, 0xFF], i).unwrap();
            }
            table.optimize().unwrap();
            table.flush().unwrap();
        }

        let table = FingerprintTable::load(dir.path(), true).unwrap();
        assert_eq!(table.cell_count(), 3);
        assert_eq!(table.mt_size(), 5);
        assert_eq!(table.count().unwrap(), 12);
        assert_eq!(table.cell_bounds(1).unwrap(), (8, 16));
    }
}
