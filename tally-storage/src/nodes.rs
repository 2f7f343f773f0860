use std::{collections::HashMap, sync::Arc};

use rocksdb::{WriteBatch, DB};
use tally_crypto::Fe;
use tally_merkle::{Error as MerkleError, NodeStore};

use crate::{DBBytes, DBInt, Error, KVTable, CF_META, CF_NODES};

struct NodesKV;

impl KVTable<DBBytes, DBBytes> for NodesKV {
    const CF_NAME: &'static str = CF_NODES;
}

struct TreeMetaKV;

impl KVTable<DBBytes, DBInt> for TreeMetaKV {
    const CF_NAME: &'static str = CF_META;
}

/// RocksDB-backed Merkle node store for one namespaced tree.
///
/// Writes accumulate in a dirty overlay that reads consult first, so a
/// whole import or state batch can be staged, inspected (root checks,
/// witness generation) and then either committed in a single write or
/// discarded without a trace.
pub struct TreeStore {
    db: Arc<DB>,
    prefix: Vec<u8>,
    dirty: HashMap<(u32, u64), Fe>,
    leaves: u64,
    stored_leaves: u64,
}

impl TreeStore {
    pub fn open(db: Arc<DB>, prefix: Vec<u8>) -> Result<Self, Error> {
        let leaves = TreeMetaKV::get_by_key(&db, DBBytes(prefix.clone()))?
            .map(|v| v.0)
            .unwrap_or(0);

        Ok(Self {
            db,
            prefix,
            dirty: HashMap::new(),
            leaves,
            stored_leaves: leaves,
        })
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn db(&self) -> &Arc<DB> {
        &self.db
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || self.leaves != self.stored_leaves
    }

    fn node_key(&self, level: u32, index: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.prefix.len() + 9);
        key.extend_from_slice(&self.prefix);
        key.push(level as u8);
        key.extend_from_slice(&index.to_be_bytes());
        key
    }

    /// Queue every pending write into `batch` without forgetting it; call
    /// [`mark_clean`](Self::mark_clean) once the batch has been written.
    pub fn stage(&self, batch: &mut WriteBatch) {
        for (&(level, index), value) in &self.dirty {
            NodesKV::stage_upsert(
                &self.db,
                DBBytes(self.node_key(level, index)),
                DBBytes(value.to_bytes_be().to_vec()),
                batch,
            );
        }

        TreeMetaKV::stage_upsert(
            &self.db,
            DBBytes(self.prefix.clone()),
            DBInt(self.leaves),
            batch,
        );
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
        self.stored_leaves = self.leaves;
    }

    /// Write every pending change in one atomic batch.
    pub fn commit(&mut self) -> Result<(), Error> {
        let mut batch = WriteBatch::default();
        self.stage(&mut batch);
        self.db.write(batch).map_err(Error::storage)?;
        self.mark_clean();
        Ok(())
    }

    /// Drop every pending change and fall back to the committed tree.
    pub fn discard(&mut self) {
        self.dirty.clear();
        self.leaves = self.stored_leaves;
    }

    /// Queue the removal of a namespace's nodes and metadata.
    pub fn stage_purge(db: &DB, prefix: &[u8], batch: &mut WriteBatch) -> Result<u64, Error> {
        let count = NodesKV::stage_delete_prefix(db, prefix, batch)?;
        TreeMetaKV::stage_delete(db, DBBytes(prefix.to_vec()), batch);
        Ok(count)
    }

    /// Queue a relocation of a namespace's nodes and metadata under a new
    /// prefix, removing the old one.
    pub fn stage_move(
        db: &DB,
        from: &[u8],
        to: &[u8],
        batch: &mut WriteBatch,
    ) -> Result<u64, Error> {
        let count = NodesKV::stage_copy_prefix(db, from, to, batch)?;
        NodesKV::stage_delete_prefix(db, from, batch)?;

        if let Some(meta) = TreeMetaKV::get_by_key(db, DBBytes(from.to_vec()))? {
            TreeMetaKV::stage_upsert(db, DBBytes(to.to_vec()), meta, batch);
        }
        TreeMetaKV::stage_delete(db, DBBytes(from.to_vec()), batch);

        Ok(count)
    }
}

impl NodeStore for TreeStore {
    fn get(&self, level: u32, index: u64) -> Result<Option<Fe>, MerkleError> {
        if let Some(value) = self.dirty.get(&(level, index)) {
            return Ok(Some(*value));
        }

        let raw = NodesKV::get_by_key(&self.db, DBBytes(self.node_key(level, index)))
            .map_err(MerkleError::store)?;

        match raw {
            Some(DBBytes(bytes)) => {
                let fe = Fe::from_bytes_be(&bytes).map_err(MerkleError::store)?;
                Ok(Some(fe))
            }
            None => Ok(None),
        }
    }

    fn put(&mut self, level: u32, index: u64, value: Fe) -> Result<(), MerkleError> {
        self.dirty.insert((level, index), value);
        Ok(())
    }

    fn leaves(&self) -> u64 {
        self.leaves
    }

    fn set_leaves(&mut self, count: u64) -> Result<(), MerkleError> {
        self.leaves = count;
        Ok(())
    }
}
