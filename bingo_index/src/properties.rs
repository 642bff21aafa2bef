//! The per-database `properties` file and the `;`-separated option strings
//!
//! The properties file is line-oriented `key=value` and is rewritten whole on every change.
//! Option strings are `key:value` entries separated by `;`. An entry without a colon is a bare
//! value and is stored under the empty key.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Properties {
    path: PathBuf,
    map: BTreeMap<String, String>,
}

impl Properties {

    pub fn create(path: &Path) -> Result<Self> {
        let props = Self { path: path.to_path_buf(), map: BTreeMap::new() };
        props.save()?;
        return Ok(props);
    }

    pub fn load(path: &Path) -> Result<Self> {

        let content = fs::read_to_string(path)?;
        let mut map = BTreeMap::new();

        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    map.insert(key.trim().to_string(), value.trim().to_string());
                },
                None => {
                    return Err(Error::Corruption(format!("{} line {}: expected key=value", path.display(), n + 1)));
                },
            }
        }

        return Ok(Self { path: path.to_path_buf(), map });
    }

    fn save(&self) -> Result<()> {
        let content: String = self.map.iter().map(|(k, v)| format!("{}={}\n", k, v)).collect();
        fs::write(&self.path, content)?;
        return Ok(());
    }

    pub fn set<V: ToString>(&mut self, key: &str, value: V) -> Result<()> {
        self.map.insert(key.to_string(), value.to_string());
        return self.save();
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        return self.map.get(key).map(|v| v.as_str());
    }

    /// Parses a required property.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<T> {

        let value = self.get(key)
            .ok_or_else(|| Error::IncompatibleDatabase(format!("property '{}' is missing", key)))?;

        return value.parse::<T>()
            .map_err(|_| Error::Corruption(format!("property '{}' has bad value '{}'", key, value)));
    }
}

/// Splits an option string into a map, rejecting keys outside `allowed` (use `""` to allow bare
/// values).
pub fn parse_options(options: &str, allowed: &[&str]) -> Result<HashMap<String, String>> {

    let mut map = HashMap::new();

    for entry in options.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let (key, value) = match entry.split_once(':') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => ("", entry),
        };

        if !allowed.contains(&key) {
            return Err(Error::InvalidOptions {
                options: options.to_string(),
                reason: match key.is_empty() {
                    true => format!("unexpected value '{}'", value),
                    false => format!("unknown option '{}'", key),
                },
            });
        }

        map.insert(key.to_string(), value.to_string());
    }

    return Ok(map);
}

pub fn parse_bool(options: &str, key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::InvalidOptions {
            options: options.to_string(),
            reason: format!("'{}' expects true or false, got '{}'", key, value),
        }),
    }
}

pub fn parse_number<T: FromStr>(options: &str, key: &str, value: &str) -> Result<T> {
    return value.parse::<T>().map_err(|_| Error::InvalidOptions {
        options: options.to_string(),
        reason: format!("'{}' expects a number, got '{}'", key, value),
    });
}

/// Parses `id/count` with `1 <= id <= count`.
pub fn parse_partition(value: &str) -> Result<(usize, usize)> {

    let bad = || Error::InvalidOptions {
        options: value.to_string(),
        reason: "partition must be '<id>/<count>'".to_string(),
    };

    let (id, count) = value.split_once('/').ok_or_else(bad)?;
    let part_id: usize = id.trim().parse().map_err(|_| bad())?;
    let part_count: usize = count.trim().parse().map_err(|_| bad())?;

    if part_count == 0 || part_id == 0 || part_id > part_count {
        return Err(Error::InvalidPartition { part_id, part_count });
    }

    return Ok((part_id, part_count));
}
