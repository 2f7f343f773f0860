//! RocksDB persistence for the sequencer.
//!
//! One database is shared by every census and every process state; column
//! families separate the table kinds and byte prefixes separate the
//! namespaces, so disjoint trees never touch each other's keys.

use std::{path::Path, sync::Arc};

use rocksdb::{Options, DB};
use thiserror::Error;

pub mod kvtable;
pub mod nodes;

pub use kvtable::{DBBytes, DBInt, DBSerde, KVTable, PrefixIterator};
pub use nodes::TreeStore;

/// Column family holding Merkle tree nodes, keyed by
/// `namespace ‖ level ‖ index`.
pub const CF_NODES: &str = "nodes";

/// Column family holding per-namespace metadata (leaf counts, flags).
pub const CF_META: &str = "meta";

/// Column family holding key → leaf-index side tables.
pub const CF_KEYS: &str = "keys";

/// Column family holding census head records (uuid / root / address).
pub const CF_HEADS: &str = "heads";

const ALL_CFS: [&str; 4] = [CF_NODES, CF_META, CF_KEYS, CF_HEADS];

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serde error: {0}")]
    Serde(String),

    #[error("not found")]
    NotFound,
}

impl Error {
    pub fn storage(error: impl ToString) -> Self {
        Self::Storage(error.to_string())
    }

    pub fn serde(error: impl ToString) -> Self {
        Self::Serde(error.to_string())
    }
}

/// Open (or create) the shared database with every column family the
/// sequencer uses.
pub fn open(path: impl AsRef<Path>) -> Result<Arc<DB>, Error> {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);

    let db = DB::open_cf(&opts, path, ALL_CFS).map_err(Error::storage)?;
    Ok(Arc::new(db))
}

pub fn destroy(path: impl AsRef<Path>) -> Result<(), Error> {
    DB::destroy(&Options::default(), path).map_err(Error::storage)
}
