//! Tunables for creating and opening an index, loadable from YAML

use crate::error::{Error, Result};
use crate::layout;
use crate::properties;
use crate::table;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub sub_block_size: usize,
    pub sim_block_size: usize,
    pub cf_block_size: usize,
    pub segment_size: u64,
    /// Fingerprints per similarity container
    pub mt_size: usize,
    /// Below this many objects similarity search scans rows linearly
    pub small_base_size: usize,
    /// Start points of the similarity cells; equal-width cells when absent
    pub sim_cells: Option<Vec<u32>>,
    pub read_only: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        return Self {
            sub_block_size: layout::DEFAULT_SUB_BLOCK_SIZE,
            sim_block_size: layout::DEFAULT_SIM_BLOCK_SIZE,
            cf_block_size: layout::DEFAULT_CF_BLOCK_SIZE,
            segment_size: layout::DEFAULT_SEGMENT_SIZE,
            mt_size: layout::DEFAULT_MT_SIZE,
            small_base_size: layout::DEFAULT_SMALL_BASE_SIZE,
            sim_cells: None,
            read_only: false,
        };
    }
}

impl IndexConfig {

    pub fn from_file(filename: &Path) -> Result<Self> {
        let serialized = std::fs::read_to_string(filename)?;
        let deserialized: Self = serde_yaml::from_str(&serialized)?;
        return Ok(deserialized);
    }

    pub fn to_file(&self, filename: &Path) -> Result<()> {
        let serialized = serde_yaml::to_string(&self)?;
        let mut file = File::create(filename)?;
        file.write_all(serialized.as_bytes())?;
        return Ok(());
    }

    /// Applies `read_only`, `mt_size`, `segment_size` (MiB) and `key` entries of a create
    /// option string.
    pub fn apply_create_options(&mut self, options: &str) -> Result<()> {

        let map = properties::parse_options(options, &["read_only", "mt_size", "segment_size", "key"])?;

        for (key, value) in map.iter() {
            match key.as_str() {
                "read_only" => self.read_only = properties::parse_bool(options, key, value)?,
                "mt_size" => self.mt_size = properties::parse_number(options, key, value)?,
                "segment_size" => {
                    let mib: u64 = properties::parse_number(options, key, value)?;
                    self.segment_size = mib * 1024 * 1024;
                },
                _ => {},
            }
        }

        return Ok(());
    }

    /// Applies `read_only` and `key` entries of a load option string.
    pub fn apply_load_options(&mut self, options: &str) -> Result<()> {

        let map = properties::parse_options(options, &["read_only", "key"])?;

        if let Some(value) = map.get("read_only") {
            self.read_only = properties::parse_bool(options, "read_only", value)?;
        }

        return Ok(());
    }

    pub fn validate(&self) -> Result<()> {

        if self.mt_size == 0 {
            return Err(Error::InvalidParameter("mt_size must be positive".to_string()));
        }

        if self.segment_size == 0 || self.segment_size > layout::MAX_SEGMENT_SIZE {
            return Err(Error::InvalidParameter(format!(
                "segment size {} outside 1..={}", self.segment_size, layout::MAX_SEGMENT_SIZE)));
        }

        if self.sub_block_size == 0 || self.sim_block_size == 0 || self.cf_block_size == 0 {
            return Err(Error::InvalidParameter("block sizes must be positive".to_string()));
        }

        return Ok(());
    }

    /// [`IndexConfig::validate`] plus the checks that depend on the similarity fingerprint size.
    pub fn validate_for(&self, sim_fp_size: usize) -> Result<()> {
        self.validate()?;
        return table::check_capacity(sim_fp_size, self.mt_size, self.segment_size);
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn quick_yaml_roundtrip() {

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = IndexConfig::default();
        config.mt_size = 100;
        config.sim_cells = Some(vec![0, 32, 64, 96]);
        config.to_file(&path).unwrap();

        assert_eq!(IndexConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn quick_partial_yaml_uses_defaults() {
        let config: IndexConfig = serde_yaml::from_str("mt_size: 7\n").unwrap();
        assert_eq!(config.mt_size, 7);
        assert_eq!(config.small_base_size, layout::DEFAULT_SMALL_BASE_SIZE);
    }

    #[test]
    fn quick_create_options() {

        let mut config = IndexConfig::default();
        config.apply_create_options("mt_size:64;segment_size:4;read_only:false").unwrap();
        assert_eq!(config.mt_size, 64);
        assert_eq!(config.segment_size, 4 * 1024 * 1024);
        config.validate().unwrap();

        assert!(config.apply_create_options("mt_size:abc").is_err());
        assert!(config.apply_load_options("mt_size:5").is_err());

        config.apply_load_options("read_only:true").unwrap();
        assert!(config.read_only);
    }

    #[test]
    fn quick_containers_must_fit_a_segment() {

        let mut config = IndexConfig::default();
        config.segment_size = 1 << 20;
        config.mt_size = 200000;
        config.validate().unwrap();

        match config.validate_for(8) {
            Err(Error::InvalidParameter(_)) => {},
            other => panic!("unexpected {:?}", other),
        }

        config.mt_size = 1000;
        config.validate_for(8).unwrap();
        assert!(config.validate_for(2048).is_err());
    }
}
