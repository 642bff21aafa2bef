//! Bit-level helpers over fixed-size fingerprints, and the fingerprint size parameters
//!
//! Bit `j` of a fingerprint lives in byte `j / 8` under mask `1 << (j % 8)`.

use crate::error::{Error, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Sizes in bytes of the substructure and similarity fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintParams {
    pub sub_size: usize,
    pub sim_size: usize,
}

impl FingerprintParams {

    pub fn new(sub_size: usize, sim_size: usize) -> Self {
        return Self { sub_size, sim_size };
    }

    pub fn validate(&self) -> Result<()> {
        if self.sub_size == 0 || self.sim_size == 0 {
            return Err(Error::InvalidParameter(format!("fingerprint sizes must be positive: {:?}", self)));
        }
        if self.sim_size * 8 > u16::MAX as usize {
            return Err(Error::InvalidParameter(format!("similarity fingerprint of {} bytes is too wide", self.sim_size)));
        }
        return Ok(());
    }
}

impl Default for FingerprintParams {
    fn default() -> Self {
        return Self { sub_size: 216, sim_size: 8 };
    }
}

pub fn check_size(fp: &[u8], expected: usize) -> Result<()> {
    match fp.len() == expected {
        true => Ok(()),
        false => Err(Error::FingerprintSize { expected, actual: fp.len() }),
    }
}

pub fn get_bit(fp: &[u8], bit: usize) -> bool {
    return fp[bit >> 3] & (1 << (bit & 7)) != 0;
}

pub fn set_bit(fp: &mut [u8], bit: usize, value: bool) {
    match value {
        true => fp[bit >> 3] |= 1 << (bit & 7),
        false => fp[bit >> 3] &= !(1 << (bit & 7)),
    }
}

pub fn popcount(fp: &[u8]) -> u32 {
    return fp.iter().map(|b| b.count_ones()).sum();
}

/// Number of bits set in both fingerprints.
pub fn common_bits(a: &[u8], b: &[u8]) -> u32 {
    return a.iter().zip(b.iter()).map(|(x, y)| (x & y).count_ones()).sum();
}

/// True when every bit of `query` is also set in `target`.
pub fn is_subset(query: &[u8], target: &[u8]) -> bool {
    return query.iter().zip(target.iter()).all(|(q, t)| q & t == *q);
}

pub fn is_empty(fp: &[u8]) -> bool {
    return fp.iter().all(|b| *b == 0);
}

/// Positions of the set bits, ascending.
pub fn set_bits(fp: &[u8]) -> Vec<usize> {

    let mut bits: Vec<usize> = Vec::new();
    for (i, byte) in fp.iter().enumerate() {
        if *byte == 0 {
            continue;
        }
        for j in 0..8 {
            if byte & (1 << j) != 0 {
                bits.push(i * 8 + j);
            }
        }
    }

    return bits;
}

/// Random fingerprint where every bit is set with probability `density`.
pub fn random_with<R: Rng>(rng: &mut R, size: usize, density: f64) -> Vec<u8> {

    let mut fp = vec![0u8; size];
    for bit in 0..size * 8 {
        if rng.gen_bool(density) {
            set_bit(&mut fp, bit, true);
        }
    }

    return fp;
}

pub fn random(size: usize, density: f64) -> Vec<u8> {
    let mut rng = thread_rng();
    return random_with(&mut rng, size, density);
}

/// Fingerprint with exactly `count` bits set, chosen at random.
pub fn random_with_popcount<R: Rng>(rng: &mut R, size: usize, count: usize) -> Vec<u8> {

    let mut positions: Vec<usize> = (0..size * 8).collect();
    positions.shuffle(rng);

    let mut fp = vec![0u8; size];
    for bit in positions.into_iter().take(count) {
        set_bit(&mut fp, bit, true);
    }

    return fp;
}

pub fn to_hex(fp: &[u8]) -> String {
    return fp.iter().map(|b| format!("{:02x}", b)).collect();
}

pub fn from_hex(s: &str) -> Result<Vec<u8>> {

    let s = s.trim();
    if !s.is_ascii() {
        return Err(Error::InvalidParameter(format!("non-ascii hex fingerprint '{}'", s)));
    }
    if s.len() % 2 != 0 {
        return Err(Error::InvalidParameter(format!("odd-length hex fingerprint '{}'", s)));
    }

    let bad = || Error::InvalidParameter(format!("bad hex fingerprint '{}'", s));

    let mut fp = Vec::with_capacity(s.len() / 2);
    for pair in s.as_bytes().chunks(2) {
        let high = (pair[0] as char).to_digit(16).ok_or_else(bad)?;
        let low = (pair[1] as char).to_digit(16).ok_or_else(bad)?;
        fp.push((high << 4 | low) as u8);
    }

    return Ok(fp);
}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::rngs::StdRng;

    #[test]
    fn quick_bit_helpers() {

        let mut fp = vec![0u8; 4];
        set_bit(&mut fp, 0, true);
        set_bit(&mut fp, 9, true);
        set_bit(&mut fp, 31, true);

        assert!(get_bit(&fp, 9));
        assert!(!get_bit(&fp, 8));
        assert_eq!(popcount(&fp), 3);
        assert_eq!(set_bits(&fp), vec![0, 9, 31]);

        set_bit(&mut fp, 9, false);
        assert_eq!(popcount(&fp), 2);
    }

    #[test]
    fn quick_subset_and_common() {

        let target = vec![0b1111_0000, 0b0000_1111];
        let query = vec![0b0011_0000, 0b0000_0001];
        let other = vec![0b0000_1000, 0b0000_0001];

        assert!(is_subset(&query, &target));
        assert!(!is_subset(&other, &target));
        assert_eq!(common_bits(&other, &target), 1);
    }

    #[test]
    fn quick_random_popcount_and_hex() {

        let mut rng = StdRng::seed_from_u64(7);
        let fp = random_with_popcount(&mut rng, 32, 40);
        assert_eq!(popcount(&fp), 40);

        let hex = to_hex(&fp);
        assert_eq!(from_hex(&hex).unwrap(), fp);
        assert!(from_hex("abc").is_err());
        assert!(from_hex("zz").is_err());
        assert!(from_hex("+f").is_err());
        assert_eq!(from_hex(" 0aFf ").unwrap(), vec![0x0a, 0xff]);
    }

    #[test]
    fn quick_non_ascii_hex_is_rejected() {
        assert!(matches!(from_hex("aéb"), Err(Error::InvalidParameter(_))));
        assert!(matches!(from_hex("éé"), Err(Error::InvalidParameter(_))));
    }
}
