//! Multibit tree over one frozen chunk of similarity fingerprints
//!
//! An internal node holds up to [`layout::MULTIBIT_MAX_BITS`] distinguishing bit positions. Its
//! right child holds the fingerprints with all of those bits unset, its left child the ones with at
//! least one of them set. Bits used by an ancestor are never reused below it, so the bit sets along
//! any root-to-leaf path are disjoint. Leaves own a contiguous range of the reordered fingerprints.
//!
//! Construction works on an in-memory copy and returns the reordered fingerprints, their ids and
//! the node array; the search runs directly over the serialized node bytes.

use crate::coef::SimCoef;
use crate::error::{Error, Result};
use crate::fingerprint;
use crate::handle::ArenaRecord;
use crate::layout;
use byteorder::{BigEndian, ByteOrder};
use log::debug;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Internal,
    Leaf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultibitNode {
    pub kind: NodeKind,
    pub bits: Vec<u16>,
    pub left: u32,
    pub right: u32,
    pub leaf_start: u32,
    pub leaf_len: u32,
}

impl MultibitNode {

    pub fn leaf(start: usize, len: usize) -> Self {
        return Self {
            kind: NodeKind::Leaf,
            bits: Vec::new(),
            left: 0,
            right: 0,
            leaf_start: start as u32,
            leaf_len: len as u32,
        };
    }

    fn placeholder() -> Self {
        return Self::leaf(0, 0);
    }
}

impl ArenaRecord for MultibitNode {
    const SIZE: usize = layout::NODE_SIZE;

    fn write_to(&self, slice: &mut [u8]) {

        slice[layout::NODE_KIND_START] = match self.kind {
            NodeKind::Internal => 1,
            NodeKind::Leaf => 2,
        };
        slice[layout::NODE_BIT_COUNT_START] = self.bits.len() as u8;

        for i in 0..layout::MULTIBIT_MAX_BITS {
            let bit = self.bits.get(i).cloned().unwrap_or(0);
            let start = layout::NODE_BITS_START + i * layout::U16_SIZE;
            BigEndian::write_u16(&mut slice[start..start + layout::U16_SIZE], bit);
        }

        BigEndian::write_u32(&mut slice[layout::NODE_LEFT_START..], self.left);
        BigEndian::write_u32(&mut slice[layout::NODE_RIGHT_START..], self.right);
        BigEndian::write_u32(&mut slice[layout::NODE_LEAF_START_START..], self.leaf_start);
        BigEndian::write_u32(&mut slice[layout::NODE_LEAF_LEN_START..], self.leaf_len);
    }

    fn read_from(slice: &[u8]) -> Self {

        let kind = match slice[layout::NODE_KIND_START] {
            1 => NodeKind::Internal,
            _ => NodeKind::Leaf,
        };

        let bit_count = std::cmp::min(slice[layout::NODE_BIT_COUNT_START] as usize, layout::MULTIBIT_MAX_BITS);
        let bits = (0..bit_count)
            .map(|i| BigEndian::read_u16(&slice[layout::NODE_BITS_START + i * layout::U16_SIZE..]))
            .collect();

        return Self {
            kind,
            bits,
            left: BigEndian::read_u32(&slice[layout::NODE_LEFT_START..]),
            right: BigEndian::read_u32(&slice[layout::NODE_RIGHT_START..]),
            leaf_start: BigEndian::read_u32(&slice[layout::NODE_LEAF_START_START..]),
            leaf_len: BigEndian::read_u32(&slice[layout::NODE_LEAF_LEN_START..]),
        };
    }
}

/// Output of a tree build: fingerprints and ids in leaf order, plus the nodes (root first).
#[derive(Debug)]
pub struct BuiltTree {
    pub fps: Vec<u8>,
    pub ids: Vec<u32>,
    pub nodes: Vec<MultibitNode>,
}

struct BuildItem {
    node: usize,
    start: usize,
    end: usize,
    depth: usize,
    used: Vec<u16>,
}

/// Picks the least frequently set bits while their joint probability of all being unset stays
/// at least [`layout::MULTIBIT_MIN_ZERO_PROB`]. At least one bit is taken if any bit splits the
/// set at all.
fn select_bits(fps: &[u8], fp_size: usize, members: &[usize], used: &[u16]) -> Vec<u16> {

    let n = members.len();
    let mut counts = vec![0usize; fp_size * 8];

    for m in members.iter() {
        let fp = &fps[m * fp_size..(m + 1) * fp_size];
        for bit in fingerprint::set_bits(fp) {
            counts[bit] += 1;
        }
    }

    let mut candidates: Vec<(usize, u16)> = counts.iter().enumerate()
        .filter(|(bit, count)| **count > 0 && **count < n && !used.contains(&(*bit as u16)))
        .map(|(bit, count)| (*count, bit as u16))
        .collect();
    candidates.sort();

    let mut chosen: Vec<u16> = Vec::new();
    let mut prob = 1.0;

    for (count, bit) in candidates.into_iter() {
        let unset = (n - count) as f64 / n as f64;
        if !chosen.is_empty() && prob * unset < layout::MULTIBIT_MIN_ZERO_PROB {
            break;
        }
        prob *= unset;
        chosen.push(bit);
        if chosen.len() == layout::MULTIBIT_MAX_BITS {
            break;
        }
    }

    return chosen;
}

/// Builds a tree over `fps` (concatenated, `fp_size` bytes each) carrying `ids`.
pub fn build(fps: &[u8], ids: &[u32], fp_size: usize) -> Result<BuiltTree> {

    if fp_size == 0 || fps.len() != ids.len() * fp_size {
        return Err(Error::InvalidParameter(format!(
            "{} fingerprint bytes for {} ids of size {}", fps.len(), ids.len(), fp_size)));
    }

    let n = ids.len();
    let mut order: Vec<usize> = (0..n).collect();
    let mut nodes: Vec<MultibitNode> = vec![MultibitNode::placeholder()];

    let mut stack: VecDeque<BuildItem> = VecDeque::new();
    stack.push_back(BuildItem { node: 0, start: 0, end: n, depth: 0, used: Vec::new() });

    while let Some(item) = stack.pop_back() {

        let len = item.end - item.start;

        if len <= layout::MULTIBIT_LEAF_SIZE || item.depth >= layout::MULTIBIT_MAX_DEPTH {
            nodes[item.node] = MultibitNode::leaf(item.start, len);
            continue;
        }

        let bits = select_bits(fps, fp_size, &order[item.start..item.end], &item.used);

        let mut left: Vec<usize> = Vec::new();
        let mut right: Vec<usize> = Vec::new();
        for m in order[item.start..item.end].iter() {
            let fp = &fps[m * fp_size..(m + 1) * fp_size];
            match bits.iter().any(|b| fingerprint::get_bit(fp, *b as usize)) {
                true => left.push(*m),
                false => right.push(*m),
            }
        }

        if bits.is_empty() || left.is_empty() || right.is_empty() {
            nodes[item.node] = MultibitNode::leaf(item.start, len);
            continue;
        }

        let split = item.start + left.len();
        order[item.start..split].copy_from_slice(&left);
        order[split..item.end].copy_from_slice(&right);

        let left_node = nodes.len();
        let right_node = nodes.len() + 1;
        nodes.push(MultibitNode::placeholder());
        nodes.push(MultibitNode::placeholder());

        let mut used = item.used.clone();
        used.extend_from_slice(&bits);

        nodes[item.node] = MultibitNode {
            kind: NodeKind::Internal,
            bits,
            left: left_node as u32,
            right: right_node as u32,
            leaf_start: 0,
            leaf_len: 0,
        };

        stack.push_back(BuildItem { node: right_node, start: split, end: item.end, depth: item.depth + 1, used: used.clone() });
        stack.push_back(BuildItem { node: left_node, start: item.start, end: split, depth: item.depth + 1, used });
    }

    let mut ordered_fps: Vec<u8> = Vec::with_capacity(fps.len());
    let mut ordered_ids: Vec<u32> = Vec::with_capacity(n);
    for m in order.iter() {
        ordered_fps.extend_from_slice(&fps[m * fp_size..(m + 1) * fp_size]);
        ordered_ids.push(ids[*m]);
    }

    debug!("built multibit tree: {} fingerprints, {} nodes", n, nodes.len());

    return Ok(BuiltTree { fps: ordered_fps, ids: ordered_ids, nodes });
}

/// Borrowed serialized tree: node records, reordered fingerprints and BigEndian `u32` ids.
#[derive(Debug, Clone, Copy)]
pub struct TreeView<'a> {
    pub nodes: &'a [u8],
    pub fps: &'a [u8],
    pub ids: &'a [u8],
    pub fp_size: usize,
}

/// One similarity query against trees: the query, its popcount, the metric and the accepted
/// coefficient range.
#[derive(Debug, Clone)]
pub struct SimQuery<'a> {
    pub fp: &'a [u8],
    pub popcount: u32,
    pub coef: SimCoef,
    pub min: f64,
    pub max: f64,
}

impl<'a> SimQuery<'a> {

    pub fn new(fp: &'a [u8], coef: SimCoef, min: f64, max: f64) -> Self {
        return Self { fp, popcount: fingerprint::popcount(fp), coef, min, max };
    }

    /// Exact coefficient against one target, if it falls in range.
    pub fn score(&self, target: &[u8]) -> Option<f64> {
        let value = self.coef.coef(self.popcount, fingerprint::popcount(target), fingerprint::common_bits(self.fp, target));
        match value >= self.min && value <= self.max {
            true => Some(value),
            false => None,
        }
    }
}

impl<'a> TreeView<'a> {

    pub fn node_count(&self) -> usize {
        return self.nodes.len() / layout::NODE_SIZE;
    }

    pub fn node(&self, index: usize) -> Result<MultibitNode> {
        if index >= self.node_count() {
            return Err(Error::Corruption(format!("multibit node {} out of {}", index, self.node_count())));
        }
        let start = index * layout::NODE_SIZE;
        return Ok(MultibitNode::read_from(&self.nodes[start..start + layout::NODE_SIZE]));
    }

    pub fn fp(&self, index: usize) -> &'a [u8] {
        return &self.fps[index * self.fp_size..(index + 1) * self.fp_size];
    }

    pub fn id(&self, index: usize) -> u32 {
        return BigEndian::read_u32(&self.ids[index * layout::U32_SIZE..]);
    }

    /// Appends `(id, coefficient)` for every in-range fingerprint whose target popcount is in
    /// `[b_min, b_max]`. Returns how many fingerprints were compared exactly.
    pub fn search(&self, query: &SimQuery, b_min: u32, b_max: u32, results: &mut Vec<(u32, f64)>) -> Result<usize> {

        if self.node_count() == 0 {
            return Ok(0);
        }

        let a = query.popcount;
        let mut examined = 0;
        let mut stack: VecDeque<(usize, u32, u32)> = VecDeque::new();
        stack.push_back((0, 0, 0));

        while let Some((index, under, over)) = stack.pop_back() {

            let node = self.node(index)?;

            match node.kind {
                NodeKind::Leaf => {
                    let start = node.leaf_start as usize;
                    let end = start + node.leaf_len as usize;
                    if end * self.fp_size > self.fps.len() {
                        return Err(Error::Corruption(format!("leaf range {}..{} past container end", start, end)));
                    }
                    for i in start..end {
                        examined += 1;
                        if let Some(value) = query.score(self.fp(i)) {
                            results.push((self.id(i), value));
                        }
                    }
                },
                NodeKind::Internal => {
                    let in_query = node.bits.iter()
                        .filter(|b| fingerprint::get_bit(query.fp, **b as usize))
                        .count() as u32;

                    let right_under = under + in_query;
                    if query.coef.upper_bound(a, b_min, b_max, right_under, over) >= query.min {
                        stack.push_back((node.right as usize, right_under, over));
                    }

                    let left_over = match in_query {
                        0 => over + 1,
                        _ => over,
                    };
                    if query.coef.upper_bound(a, b_min, b_max, under, left_over) >= query.min {
                        stack.push_back((node.left as usize, under, left_over));
                    }
                },
            }
        }

        return Ok(examined);
    }
}
