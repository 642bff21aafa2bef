//! Index façade: one database directory with its fingerprint storages, similarity table, record
//! stores and properties
//!
//! [`Database`] is the handle callers share. It carries the database's lock and everything behind
//! it, so every operation reaches its own storage without any process-wide selection.
//!
//! Directory layout:
//! - `properties` (key=value) and `lock`
//! - `sub_fp`, `sub_fp_meta`: transposed substructure fingerprints
//! - `sim_fp`, `sim_fp_meta`: row similarity fingerprints
//! - `sim_index_{i}`: similarity table arena segments
//! - `cf_data`, `cf_offset`: compressed records
//! - `exact_hash`, `gross_data`, `gross_offset`: exact and formula lookups
//! - `id_mapping`: external object id of every storage position
//!
//! Storages and matchers work on positions; [`Index::add`], [`Index::remove`] and matcher hits
//! speak external object ids.

use crate::buckets::{ExactStorage, FormulaStorage};
use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{self, FingerprintParams};
use crate::id_map::IdMapping;
use crate::lock::{FairRwLock, ReadGuard, WriteGuard};
use crate::matcher::{Matcher, MatcherKind, QueryData};
use crate::object::{AcceptAll, Confirm, IndexObject};
use crate::properties::Properties;
use crate::record_store::RecordStore;
use crate::row_storage::RowFpStorage;
use crate::table::{self, FingerprintTable};
use crate::transposed::TransposedFpStorage;
use fs2::FileExt;
use log::{info, warn};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const VERSION: &str = "2.0";

const PROPERTIES_FILE: &str = "properties";
const LOCK_FILE: &str = "lock";
const SUB_NAME: &str = "sub_fp";
const SIM_NAME: &str = "sim_fp";
const CF_NAME: &str = "cf";

pub struct Index {
    dir: PathBuf,
    config: IndexConfig,
    fp_params: FingerprintParams,
    base_type: String,
    properties: Properties,
    sub_storage: TransposedFpStorage,
    sim_storage: RowFpStorage,
    sim_table: FingerprintTable,
    cf_storage: RecordStore,
    exact_storage: ExactStorage,
    gross_storage: FormulaStorage,
    id_mapping: IdMapping,
    lock_file: File,
}

fn lock_directory(dir: &Path, read_only: bool) -> Result<File> {

    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;

    let locked = match read_only {
        true => FileExt::try_lock_shared(&file),
        false => FileExt::try_lock_exclusive(&file),
    };

    match locked {
        Ok(()) => Ok(file),
        Err(_) => Err(Error::DatabaseLocked { path: dir.to_path_buf() }),
    }
}

impl Index {

    /// Creates a new database in `dir`, replacing any previous one there.
    pub fn create(dir: &Path, fp_params: FingerprintParams, base_type: &str, config: IndexConfig) -> Result<Self> {

        fp_params.validate()?;
        config.validate_for(fp_params.sim_size)?;

        fs::create_dir_all(dir)?;
        let lock_file = lock_directory(dir, false)?;

        let bounds = match &config.sim_cells {
            Some(bounds) => bounds.clone(),
            None => table::default_bounds(fp_params.sim_size),
        };

        let mut properties = Properties::create(&dir.join(PROPERTIES_FILE))?;
        properties.set("version", VERSION)?;
        properties.set("base_type", base_type)?;
        properties.set("fp_sub_size", fp_params.sub_size)?;
        properties.set("fp_sim_size", fp_params.sim_size)?;
        properties.set("sub_block_size", config.sub_block_size)?;
        properties.set("sim_block_size", config.sim_block_size)?;
        properties.set("cf_block_size", config.cf_block_size)?;
        properties.set("segment_size", config.segment_size)?;
        properties.set("mt_size", config.mt_size)?;
        properties.set("small_base_size", config.small_base_size)?;
        properties.set("sim_cells", serde_json::to_string(&bounds).map_err(|e| Error::InvalidParameter(e.to_string()))?)?;

        let index = Self {
            dir: dir.to_path_buf(),
            sub_storage: TransposedFpStorage::create(dir, SUB_NAME, fp_params.sub_size, config.sub_block_size)?,
            sim_storage: RowFpStorage::create(dir, SIM_NAME, fp_params.sim_size, config.sim_block_size)?,
            sim_table: FingerprintTable::create(dir, fp_params.sim_size, config.mt_size, &bounds, config.segment_size)?,
            cf_storage: RecordStore::create(dir, CF_NAME, config.cf_block_size)?,
            exact_storage: ExactStorage::create(dir)?,
            gross_storage: FormulaStorage::create(dir, config.cf_block_size)?,
            id_mapping: IdMapping::create(dir)?,
            config,
            fp_params,
            base_type: base_type.to_string(),
            properties,
            lock_file,
        };

        info!("created {} database at {}", base_type, dir.display());

        return Ok(index);
    }

    /// Reopens the database in `dir`. Only `read_only` is taken from `config`; every other setting
    /// comes from the stored properties. `base_type`, if given, must match the stored one.
    pub fn load(dir: &Path, base_type: Option<&str>, config: &IndexConfig) -> Result<Self> {

        let read_only = config.read_only;
        let lock_file = lock_directory(dir, read_only)?;

        let properties = Properties::load(&dir.join(PROPERTIES_FILE))?;

        let version: String = properties.get_parsed("version")?;
        if version != VERSION {
            return Err(Error::IncompatibleDatabase(format!("database version {} is not {}", version, VERSION)));
        }

        let stored_type: String = properties.get_parsed("base_type")?;
        if let Some(expected) = base_type {
            if expected != stored_type {
                return Err(Error::IncompatibleDatabase(format!("database holds {}, not {}", stored_type, expected)));
            }
        }

        let fp_params = FingerprintParams::new(properties.get_parsed("fp_sub_size")?, properties.get_parsed("fp_sim_size")?);

        let cells: String = properties.get_parsed("sim_cells")?;
        let bounds: Vec<u32> = serde_json::from_str(&cells)
            .map_err(|e| Error::Corruption(format!("sim_cells property: {}", e)))?;

        let stored = IndexConfig {
            sub_block_size: properties.get_parsed("sub_block_size")?,
            sim_block_size: properties.get_parsed("sim_block_size")?,
            cf_block_size: properties.get_parsed("cf_block_size")?,
            segment_size: properties.get_parsed("segment_size")?,
            mt_size: properties.get_parsed("mt_size")?,
            small_base_size: properties.get_parsed("small_base_size")?,
            sim_cells: Some(bounds.clone()),
            read_only,
        };

        let sub_storage = TransposedFpStorage::load(dir, SUB_NAME, read_only)?;
        let sim_storage = RowFpStorage::load(dir, SIM_NAME, read_only)?;
        let sim_table = FingerprintTable::load(dir, read_only)?;
        let cf_storage = RecordStore::load(dir, CF_NAME, stored.cf_block_size, read_only)?;
        let exact_storage = ExactStorage::load(dir, read_only)?;
        let gross_storage = FormulaStorage::load(dir, stored.cf_block_size, read_only)?;
        let id_mapping = IdMapping::load(dir, read_only)?;

        if sub_storage.fp_size() != fp_params.sub_size || sim_storage.fp_size() != fp_params.sim_size {
            return Err(Error::Corruption("fingerprint storages disagree with properties".to_string()));
        }

        if sim_table.cell_count() != table::cells_from_bounds(&bounds, fp_params.sim_size)?.len() {
            return Err(Error::Corruption("similarity table disagrees with sim_cells property".to_string()));
        }

        let count = cf_storage.count();
        if sub_storage.count() != count || sim_storage.count() != count || exact_storage.count() != count
            || gross_storage.count() != count || id_mapping.count() != count {
            warn!("storage counts differ: sub {}, sim {}, cf {}, exact {}, gross {}, ids {}",
                  sub_storage.count(), sim_storage.count(), count, exact_storage.count(),
                  gross_storage.count(), id_mapping.count());
            return Err(Error::Corruption("storages hold different object counts".to_string()));
        }

        info!("loaded {} database at {} with {} objects", stored_type, dir.display(), count);

        return Ok(Self {
            dir: dir.to_path_buf(),
            config: stored,
            fp_params,
            base_type: stored_type,
            properties,
            sub_storage,
            sim_storage,
            sim_table,
            cf_storage,
            exact_storage,
            gross_storage,
            id_mapping,
            lock_file,
        });
    }

    /// Stores one object under the lowest free id at or above the last automatically assigned
    /// one and returns that id.
    pub fn add(&mut self, obj: &dyn IndexObject) -> Result<u32> {
        return self.insert(None, obj);
    }

    /// Stores one object under the caller's `id`, which must not be in use.
    pub fn add_with_id(&mut self, id: u32, obj: &dyn IndexObject) -> Result<u32> {
        return self.insert(Some(id), obj);
    }

    fn insert(&mut self, id: Option<u32>, obj: &dyn IndexObject) -> Result<u32> {

        if self.config.read_only {
            return Err(Error::ReadOnly);
        }

        let sub_fp = obj.sub_fingerprint()?;
        let sim_fp = obj.sim_fingerprint()?;
        let cf = obj.compressed()?;
        let hash = obj.exact_hash()?;
        let formula = obj.gross_formula()?;

        // every check before the first write, so a failed add leaves all storages in step
        fingerprint::check_size(&sub_fp, self.fp_params.sub_size)?;
        fingerprint::check_size(&sim_fp, self.fp_params.sim_size)?;
        self.cf_storage.check_fits(cf.len())?;
        self.gross_storage.check_fits(&formula)?;

        let external = match id {
            Some(id) => {
                self.id_mapping.check_free(id)?;
                id
            },
            None => self.id_mapping.next_free()?,
        };

        let position = self.cf_storage.count();

        self.sub_storage.add(&sub_fp)?;
        self.sim_storage.add(&sim_fp)?;
        self.sim_table.add(&sim_fp, position as u32)?;
        self.cf_storage.add(position, &cf)?;
        self.exact_storage.add(position, hash)?;
        self.gross_storage.add(position, &formula)?;
        self.id_mapping.add(position, external, id.is_none())?;

        return Ok(external);
    }

    /// Tombstones the object with external `id` and frees the id. Every matcher skips
    /// tombstoned objects.
    pub fn remove(&mut self, id: u32) -> Result<()> {

        if self.config.read_only {
            return Err(Error::ReadOnly);
        }

        let position = self.id_mapping.position(id).ok_or(Error::NoSuchObject(id))?;
        self.cf_storage.remove(position as usize)?;
        self.id_mapping.remove(id)?;

        return Ok(());
    }

    /// Removing fingerprint index entries is not supported; use [`Index::remove`].
    pub fn remove_fingerprints(&mut self, _id: u32) -> Result<()> {
        return Err(Error::NotImplemented("fingerprint-level removal"));
    }

    /// Builds similarity trees over every partially filled increment.
    pub fn optimize(&mut self) -> Result<()> {
        if self.config.read_only {
            return Err(Error::ReadOnly);
        }
        self.sim_table.optimize()?;
        return self.flush();
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sub_storage.flush()?;
        self.sim_storage.flush()?;
        self.sim_table.flush()?;
        self.cf_storage.flush()?;
        self.exact_storage.flush()?;
        self.gross_storage.flush()?;
        self.id_mapping.flush()?;
        return Ok(());
    }

    pub fn dir(&self) -> &Path {
        return &self.dir;
    }

    pub fn config(&self) -> &IndexConfig {
        return &self.config;
    }

    pub fn fp_params(&self) -> FingerprintParams {
        return self.fp_params;
    }

    pub fn base_type(&self) -> &str {
        return &self.base_type;
    }

    pub fn version(&self) -> &str {
        return self.properties.get("version").unwrap_or(VERSION);
    }

    pub fn properties(&self) -> &Properties {
        return &self.properties;
    }

    /// Objects ever added, removed ones included.
    pub fn object_count(&self) -> usize {
        return self.cf_storage.count();
    }

    /// Too few objects to make tree search pay off.
    pub fn is_small_base(&self) -> bool {
        return self.object_count() < self.config.small_base_size;
    }

    pub fn get_object_cf(&self, id: u32) -> Option<&[u8]> {
        return self.id_mapping.position(id).and_then(|position| self.record(position));
    }

    /// Compressed record at a storage position, `None` once removed.
    pub fn record(&self, position: u32) -> Option<&[u8]> {
        return self.cf_storage.get(position as usize);
    }

    /// External id of a live storage position.
    pub fn external_id(&self, position: u32) -> Option<u32> {
        return self.id_mapping.external(position);
    }

    pub fn sub_storage(&self) -> &TransposedFpStorage {
        return &self.sub_storage;
    }

    pub fn sim_storage(&self) -> &RowFpStorage {
        return &self.sim_storage;
    }

    pub fn sim_table(&self) -> &FingerprintTable {
        return &self.sim_table;
    }

    pub fn cf_storage(&self) -> &RecordStore {
        return &self.cf_storage;
    }

    pub fn exact_storage(&self) -> &ExactStorage {
        return &self.exact_storage;
    }

    pub fn gross_storage(&self) -> &FormulaStorage {
        return &self.gross_storage;
    }

    pub fn id_mapping(&self) -> &IdMapping {
        return &self.id_mapping;
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("flush of {} on close failed: {}", self.dir.display(), e);
        }
        let _ = FileExt::unlock(&self.lock_file);
    }
}

/// Shared handle to one open database.
#[derive(Clone)]
pub struct Database {
    inner: Arc<FairRwLock<Index>>,
}

impl Database {

    pub fn create(dir: &Path, fp_params: FingerprintParams, base_type: &str, config: IndexConfig) -> Result<Self> {
        let index = Index::create(dir, fp_params, base_type, config)?;
        return Ok(Self { inner: Arc::new(FairRwLock::new(index)) });
    }

    /// Creates a database configured by a create option string over the defaults.
    pub fn create_with_options(dir: &Path, fp_params: FingerprintParams, base_type: &str, options: &str) -> Result<Self> {
        let mut config = IndexConfig::default();
        config.apply_create_options(options)?;
        return Self::create(dir, fp_params, base_type, config);
    }

    pub fn load(dir: &Path, base_type: Option<&str>, options: &str) -> Result<Self> {
        let mut config = IndexConfig::default();
        config.apply_load_options(options)?;
        let index = Index::load(dir, base_type, &config)?;
        return Ok(Self { inner: Arc::new(FairRwLock::new(index)) });
    }

    pub fn read(&self) -> ReadGuard<'_, Index> {
        return self.inner.read();
    }

    pub fn write(&self) -> WriteGuard<'_, Index> {
        return self.inner.write();
    }

    pub fn add(&self, obj: &dyn IndexObject) -> Result<u32> {
        return self.write().add(obj);
    }

    pub fn add_with_id(&self, id: u32, obj: &dyn IndexObject) -> Result<u32> {
        return self.write().add_with_id(id, obj);
    }

    pub fn remove(&self, id: u32) -> Result<()> {
        return self.write().remove(id);
    }

    pub fn remove_fingerprints(&self, id: u32) -> Result<()> {
        return self.write().remove_fingerprints(id);
    }

    pub fn optimize(&self) -> Result<()> {
        return self.write().optimize();
    }

    pub fn object_count(&self) -> usize {
        return self.read().object_count();
    }

    pub fn get_object_cf(&self, id: u32) -> Option<Vec<u8>> {
        return self.read().get_object_cf(id).map(|cf| cf.to_vec());
    }

    /// Creates a matcher that accepts every candidate passing fingerprint screening.
    pub fn create_matcher(&self, kind: &str, query: QueryData, options: &str) -> Result<Matcher> {
        return self.create_matcher_with(kind, query, options, Box::new(AcceptAll));
    }

    pub fn create_matcher_with(&self, kind: &str, query: QueryData, options: &str, confirm: Box<dyn Confirm>) -> Result<Matcher> {
        let kind: MatcherKind = kind.parse()?;
        return Matcher::create(self.clone(), kind, query, options, confirm);
    }

    /// Flushes all storages. The directory lock is released once the last handle and matcher
    /// are dropped.
    pub fn close(self) -> Result<()> {
        return self.write().flush();
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::object::PrecomputedObject;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    pub fn small_config() -> IndexConfig {
        let mut config = IndexConfig::default();
        config.sub_block_size = 4;
        config.sim_block_size = 64;
        config.cf_block_size = 4096;
        config.segment_size = 1 << 20;
        config.mt_size = 16;
        config.small_base_size = 0;
        return config;
    }

    fn object(rng: &mut StdRng, params: &FingerprintParams, n: usize) -> PrecomputedObject {
        return PrecomputedObject {
            sub_fp: fingerprint::random_with(rng, params.sub_size, 0.3),
            sim_fp: fingerprint::random_with(rng, params.sim_size, 0.3),
            cf: format!("object-{}", n).into_bytes(),
            hash: (n % 5) as u32,
            formula: format!("C{}", n % 3),
        };
    }

    #[test]
    fn quick_add_assigns_sequential_ids() {

        let dir = tempfile::tempdir().unwrap();
        let params = FingerprintParams::new(8, 8);
        let db = Database::create(dir.path(), params, "molecule", small_config()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        for n in 0..40 {
            assert_eq!(db.add(&object(&mut rng, &params, n)).unwrap(), n as u32);
        }

        let index = db.read();
        assert_eq!(index.object_count(), 40);
        assert_eq!(index.sub_storage().count(), 40);
        assert_eq!(index.sim_storage().count(), 40);
        assert_eq!(index.sim_table().count().unwrap(), 40);
        assert_eq!(index.exact_storage().candidates(0).len(), 8);
        assert_eq!(index.get_object_cf(7), Some(&b"object-7"[..]));
    }

    #[test]
    fn quick_wrong_fingerprint_size_changes_nothing() {

        let dir = tempfile::tempdir().unwrap();
        let params = FingerprintParams::new(8, 8);
        let db = Database::create(dir.path(), params, "molecule", small_config()).unwrap();

        let mut bad = PrecomputedObject::from_line("00 00").unwrap();
        match db.add(&bad) {
            Err(Error::FingerprintSize { expected: 8, actual: 1 }) => {},
            other => panic!("unexpected {:?}", other),
        }

        bad.sub_fp = vec![0; 8];
        bad.sim_fp = vec![0; 8];
        assert_eq!(db.add(&bad).unwrap(), 0);
        assert_eq!(db.object_count(), 1);
    }

    #[test]
    fn reload_keeps_objects_and_tombstones() {

        let dir = tempfile::tempdir().unwrap();
        let params = FingerprintParams::new(8, 4);
        let mut rng = StdRng::seed_from_u64(2);

        {
            let db = Database::create(dir.path(), params, "molecule", small_config()).unwrap();
            for n in 0..70 {
                db.add(&object(&mut rng, &params, n)).unwrap();
            }
            db.remove(3).unwrap();
            assert!(matches!(db.remove(3), Err(Error::NoSuchObject(3))));
            db.optimize().unwrap();
            db.close().unwrap();
        }

        let db = Database::load(dir.path(), Some("molecule"), "").unwrap();
        let index = db.read();
        assert_eq!(index.object_count(), 70);
        assert_eq!(index.get_object_cf(3), None);
        assert_eq!(index.get_object_cf(4), Some(&b"object-4"[..]));
        assert_eq!(index.config().mt_size, 16);
        assert_eq!(index.version(), VERSION);
        assert_eq!(index.sim_table().count().unwrap(), 70);
    }

    #[test]
    fn quick_directory_lock_and_type_checks() {

        let dir = tempfile::tempdir().unwrap();
        let params = FingerprintParams::new(8, 8);

        let db = Database::create(dir.path(), params, "molecule", small_config()).unwrap();
        match Database::load(dir.path(), None, "") {
            Err(Error::DatabaseLocked { .. }) => {},
            Err(e) => panic!("unexpected {:?}", e),
            Ok(_) => panic!("second open succeeded"),
        }
        db.close().unwrap();

        match Database::load(dir.path(), Some("reaction"), "") {
            Err(Error::IncompatibleDatabase(_)) => {},
            Err(e) => panic!("unexpected {:?}", e),
            Ok(_) => panic!("type mismatch accepted"),
        }

        let reader = Database::load(dir.path(), None, "read_only:true").unwrap();
        let other_reader = Database::load(dir.path(), None, "read_only:true").unwrap();
        assert!(matches!(reader.add(&PrecomputedObject::from_line("0000000000000000 0000000000000000").unwrap()),
                         Err(Error::ReadOnly)));
        assert!(matches!(other_reader.remove_fingerprints(0), Err(Error::NotImplemented(_))));

        match Database::load(dir.path(), None, "") {
            Err(Error::DatabaseLocked { .. }) => {},
            Err(e) => panic!("unexpected {:?}", e),
            Ok(_) => panic!("writer opened next to readers"),
        }

        drop(reader);
        drop(other_reader);
        Database::load(dir.path(), None, "").unwrap();
    }

    #[test]
    fn quick_other_format_version_is_rejected() {

        let dir = tempfile::tempdir().unwrap();
        let params = FingerprintParams::new(8, 8);
        Database::create(dir.path(), params, "molecule", small_config()).unwrap().close().unwrap();

        let path = dir.path().join(PROPERTIES_FILE);
        let current = format!("version={}", VERSION);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains(&current));
        fs::write(&path, content.replace(&current, "version=1.9")).unwrap();

        match Database::load(dir.path(), None, "") {
            Err(Error::IncompatibleDatabase(reason)) => assert!(reason.contains("1.9")),
            Err(e) => panic!("unexpected {:?}", e),
            Ok(_) => panic!("version 1.9 accepted"),
        }
    }

    #[test]
    fn quick_failed_add_changes_no_storage() {

        let dir = tempfile::tempdir().unwrap();
        let params = FingerprintParams::new(8, 8);
        let mut config = small_config();
        config.cf_block_size = 64;
        let db = Database::create(dir.path(), params, "molecule", config).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        assert_eq!(db.add(&object(&mut rng, &params, 0)).unwrap(), 0);

        let mut long_formula = object(&mut rng, &params, 1);
        long_formula.formula = "C".repeat(100);
        assert!(matches!(db.add(&long_formula), Err(Error::RecordTooLarge(100))));

        let mut long_record = object(&mut rng, &params, 2);
        long_record.cf = vec![7; 65];
        assert!(matches!(db.add(&long_record), Err(Error::RecordTooLarge(65))));

        assert!(matches!(db.add_with_id(0, &object(&mut rng, &params, 3)), Err(Error::IdInUse(0))));

        {
            let index = db.read();
            assert_eq!(index.object_count(), 1);
            assert_eq!(index.sub_storage().count(), 1);
            assert_eq!(index.sim_storage().count(), 1);
            assert_eq!(index.sim_table().count().unwrap(), 1);
            assert_eq!(index.exact_storage().count(), 1);
            assert_eq!(index.gross_storage().count(), 1);
            assert_eq!(index.id_mapping().count(), 1);
        }

        let matcher = db.create_matcher("enum", QueryData::Enumerate, "").unwrap();
        let ids: Vec<u32> = matcher.map(|hit| hit.unwrap().id).collect();
        assert_eq!(ids, vec![0]);

        assert_eq!(db.add(&object(&mut rng, &params, 4)).unwrap(), 1);
        db.close().unwrap();

        let db = Database::load(dir.path(), None, "").unwrap();
        assert_eq!(db.object_count(), 2);
    }

    #[test]
    fn quick_create_rejects_containers_larger_than_a_segment() {

        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config();
        config.mt_size = 200000;

        match Database::create(dir.path(), FingerprintParams::new(8, 8), "molecule", config) {
            Err(Error::InvalidParameter(_)) => {},
            Err(e) => panic!("unexpected {:?}", e),
            Ok(_) => panic!("oversized containers accepted"),
        }
    }

    #[test]
    fn caller_chosen_ids() {

        let dir = tempfile::tempdir().unwrap();
        let params = FingerprintParams::new(8, 8);
        let mut rng = StdRng::seed_from_u64(5);

        {
            let db = Database::create(dir.path(), params, "molecule", small_config()).unwrap();
            assert_eq!(db.add_with_id(1, &object(&mut rng, &params, 0)).unwrap(), 1);
            assert_eq!(db.add(&object(&mut rng, &params, 1)).unwrap(), 0);
            assert_eq!(db.add(&object(&mut rng, &params, 2)).unwrap(), 2);
            assert_eq!(db.add_with_id(100, &object(&mut rng, &params, 3)).unwrap(), 100);
            assert!(matches!(db.add_with_id(2, &object(&mut rng, &params, 4)), Err(Error::IdInUse(2))));

            assert_eq!(db.get_object_cf(100), Some(b"object-3".to_vec()));
            assert_eq!(db.get_object_cf(3), None);

            db.remove(1).unwrap();
            assert!(matches!(db.remove(1), Err(Error::NoSuchObject(1))));
            assert!(matches!(db.remove(55), Err(Error::NoSuchObject(55))));
            db.close().unwrap();
        }

        let db = Database::load(dir.path(), None, "").unwrap();

        let mut matcher = db.create_matcher("enum", QueryData::Enumerate, "").unwrap();
        let mut seen = Vec::new();
        while matcher.next().unwrap() {
            seen.push((matcher.current_id().unwrap(), matcher.current_cf().unwrap()));
        }
        assert_eq!(seen, vec![(0, b"object-1".to_vec()), (2, b"object-2".to_vec()), (100, b"object-3".to_vec())]);

        // objects 0 and 3 share formula C0; object 0 was removed
        let only_100 = |id: u32, _record: &[u8]| -> Result<bool> { Ok(id == 100) };
        let matcher = db.create_matcher_with("formula", QueryData::Formula { formula: "C0".to_string() }, "", Box::new(only_100)).unwrap();
        let ids: Vec<u32> = matcher.map(|hit| hit.unwrap().id).collect();
        assert_eq!(ids, vec![100]);

        assert_eq!(db.add(&object(&mut rng, &params, 5)).unwrap(), 3);
        assert_eq!(db.add_with_id(1, &object(&mut rng, &params, 6)).unwrap(), 1);
        assert_eq!(db.object_count(), 6);
    }
}
