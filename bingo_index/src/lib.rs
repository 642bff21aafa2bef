//! Storage, indexing and search core of a chemical-structure database.
//!
//! A database directory holds fingerprints of every stored structure in two layouts, the
//! compressed structure records, and lookup tables for exact and gross-formula search:
//!
//! - substructure fingerprints are stored bit-column-major in packs, so screening a pack for one
//!   query bit reads one block
//! - similarity fingerprints are stored row-major and also indexed by a table of popcount cells,
//!   each a sequence of multibit trees that live in a segmented memory-mapped arena
//! - compressed records are an append-only blob store with tombstones
//!
//! Queries run through [`matcher::Matcher`], a resumable iterator created from an open
//! [`index::Database`]. Matchers can be split into disjoint partitions and report running
//! estimates of remaining hits and time.
//!
//! The structure codecs and the final graph matchers are external: they plug in through
//! [`object::IndexObject`] and [`object::Confirm`].
//!
//! TODO
//! - [x] arena, transposed and row storages, record store
//! - [x] caller-chosen object ids
//! - [x] similarity table with multibit trees
//! - [x] substructure, similarity, top-n, exact, formula and enumerate matchers
//! - [ ] fingerprint-level removal
//!
pub mod error;
pub mod layout;
pub mod handle;
pub mod arena;
pub mod lock;
pub mod io;
pub mod fingerprint;
pub mod row_storage;
pub mod transposed;
pub mod record_store;
pub mod buckets;
pub mod id_map;
pub mod coef;
pub mod multibit;
pub mod container;
pub mod table;
pub mod estimate;
pub mod properties;
pub mod config;
pub mod object;
pub mod index;
pub mod matcher;
