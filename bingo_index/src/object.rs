//! Interfaces to the structure codecs and matchers that live outside this crate
//!
//! An [`IndexObject`] supplies everything the index stores for one structure. A [`Confirm`]
//! implementation gets the final say on every candidate that passes fingerprint screening.

use crate::error::{Error, Result};
use crate::fingerprint;
use serde::{Deserialize, Serialize};

pub trait IndexObject {

    fn sub_fingerprint(&self) -> Result<Vec<u8>>;

    fn sim_fingerprint(&self) -> Result<Vec<u8>>;

    /// Serialized structure record.
    fn compressed(&self) -> Result<Vec<u8>>;

    /// Structural hash used by exact search.
    fn exact_hash(&self) -> Result<u32>;

    /// Canonical gross formula used by formula search.
    fn gross_formula(&self) -> Result<String>;
}

/// An object whose encodings were computed elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecomputedObject {
    pub sub_fp: Vec<u8>,
    pub sim_fp: Vec<u8>,
    pub cf: Vec<u8>,
    pub hash: u32,
    pub formula: String,
}

impl PrecomputedObject {

    /// Parses `<sub hex> <sim hex> [<hash> [<formula> [<record>]]]`, whitespace separated. The
    /// record defaults to the similarity fingerprint hex.
    pub fn from_line(line: &str) -> Result<Self> {

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            return Err(Error::InvalidParameter(format!("expected at least two fingerprints in '{}'", line)));
        }

        let hash = match fields.get(2) {
            Some(h) => h.parse::<u32>().map_err(|_| Error::InvalidParameter(format!("bad hash '{}'", h)))?,
            None => 0,
        };

        return Ok(Self {
            sub_fp: fingerprint::from_hex(fields[0])?,
            sim_fp: fingerprint::from_hex(fields[1])?,
            hash,
            formula: fields.get(3).map(|f| f.to_string()).unwrap_or_default(),
            cf: fields.get(4).unwrap_or(&fields[1]).as_bytes().to_vec(),
        });
    }
}

impl IndexObject for PrecomputedObject {

    fn sub_fingerprint(&self) -> Result<Vec<u8>> {
        return Ok(self.sub_fp.clone());
    }

    fn sim_fingerprint(&self) -> Result<Vec<u8>> {
        return Ok(self.sim_fp.clone());
    }

    fn compressed(&self) -> Result<Vec<u8>> {
        return Ok(self.cf.clone());
    }

    fn exact_hash(&self) -> Result<u32> {
        return Ok(self.hash);
    }

    fn gross_formula(&self) -> Result<String> {
        return Ok(self.formula.clone());
    }
}

/// Final structure-specific check of a screened candidate, given its object id and record.
pub trait Confirm: Send {
    fn confirm(&mut self, id: u32, record: &[u8]) -> Result<bool>;
}

impl<F> Confirm for F
where
    F: FnMut(u32, &[u8]) -> Result<bool> + Send,
{
    fn confirm(&mut self, id: u32, record: &[u8]) -> Result<bool> {
        return self(id, record);
    }
}

/// Accepts every candidate, i.e. fingerprint screening only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Confirm for AcceptAll {
    fn confirm(&mut self, _id: u32, _record: &[u8]) -> Result<bool> {
        return Ok(true);
    }
}
