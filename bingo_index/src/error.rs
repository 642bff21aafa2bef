//! Crate-wide error type.
//!
//! Usage errors are reported at the call that triggered them, corruption and IO errors abort the
//! current operation, and known gaps fail loudly with `NotImplemented`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown matcher kind: {0}")]
    UnknownMatcherKind(String),

    #[error("query data does not fit matcher kind {0}")]
    QueryKindMismatch(&'static str),

    #[error("invalid options '{options}': {reason}")]
    InvalidOptions { options: String, reason: String },

    #[error("invalid partition {part_id}/{part_count}")]
    InvalidPartition { part_id: usize, part_count: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("fingerprint has {actual} bytes, expected {expected}")]
    FingerprintSize { expected: usize, actual: usize },

    #[error("database is opened read-only")]
    ReadOnly,

    #[error("no object with id {0}")]
    NoSuchObject(u32),

    #[error("object id {0} is already used")]
    IdInUse(u32),

    #[error("database at {} is locked by another process", path.display())]
    DatabaseLocked { path: PathBuf },

    #[error("incompatible database: {0}")]
    IncompatibleDatabase(String),

    #[error("invalid matcher state: {0}")]
    InvalidState(&'static str),

    #[error("corrupt storage: {0}")]
    Corruption(String),

    #[error("allocation of {requested} bytes exceeds segment size {segment_size}")]
    AllocationTooLarge { requested: u64, segment_size: u64 },

    #[error("offset {offset} is beyond the free watermark {free_off}")]
    OffsetOutOfBounds { offset: u64, free_off: u64 },

    #[error("record of {0} bytes is too large for the offset table")]
    RecordTooLarge(usize),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
