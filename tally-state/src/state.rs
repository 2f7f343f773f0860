use std::{collections::HashMap, sync::Arc};

use rocksdb::{WriteBatch, DB};
use serde::{Deserialize, Serialize};
use tally_crypto::{multi_hash, poseidon, Fe};
use tally_merkle::LeanTree;
use tally_primitives::{
    keys::{
        KEY_BALLOT_MODE, KEY_CENSUS_ORIGIN, KEY_ENCRYPTION_KEY, KEY_PROCESS_ID, KEY_RESULTS_ADD,
        KEY_RESULTS_SUB,
    },
    Ballot, ProcessId, StateKey,
};
use tally_storage::{DBBytes, DBSerde, KVTable, TreeStore, CF_KEYS, CF_META};

use crate::{batch::OpenBatch, witness::StateTransition, Error};

/// Poseidon domain tag appended to every reserved and dynamic state leaf.
const LEAF_DOMAIN: u64 = 1;

pub(crate) struct StateKeysKV;

impl KVTable<DBBytes, DBSerde<LeafRecord>> for StateKeysKV {
    const CF_NAME: &'static str = CF_KEYS;
}

struct StateMetaKV;

impl KVTable<DBBytes, DBBytes> for StateMetaKV {
    const CF_NAME: &'static str = CF_META;
}

/// Stored payload of one state leaf: its position in the tree and the raw
/// field values the leaf hash commits to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafRecord {
    pub index: u64,
    pub values: Vec<[u8; 32]>,
}

impl LeafRecord {
    pub(crate) fn new(index: u64, values: &[Fe]) -> Self {
        Self {
            index,
            values: values.iter().map(Fe::to_bytes_be).collect(),
        }
    }

    pub(crate) fn values_fe(&self) -> Result<Vec<Fe>, Error> {
        self.values
            .iter()
            .map(|bytes| Fe::from_bytes_be(bytes).map_err(Error::from))
            .collect()
    }
}

/// Collapse a leaf's values into the single field element its hash
/// commits to. Multi-field values fold through the chunked Poseidon hash,
/// so the two-field encryption key becomes `H(x, y)` and a ballot becomes
/// its 32-coordinate multi-hash.
pub(crate) fn fold_values(values: &[Fe]) -> Result<Fe, Error> {
    match values {
        [single] => Ok(*single),
        many => Ok(multi_hash(many)?),
    }
}

pub(crate) fn leaf_hash(key: StateKey, folded: &Fe) -> Result<Fe, Error> {
    Ok(poseidon::hash(&[
        Fe::from(key),
        *folded,
        Fe::from(LEAF_DOMAIN),
    ])?)
}

/// The mutable state of one voting process.
///
/// All writes go through [`initialize`](Self::initialize) or the batch
/// protocol; both stage into the tree overlay and commit as a single
/// write, so readers of the shared database only ever see committed
/// roots.
pub struct State {
    pub(crate) db: Arc<DB>,
    process_id: ProcessId,
    prefix: Vec<u8>,
    pub(crate) tree: LeanTree<TreeStore>,
    pub(crate) batch: Option<OpenBatch>,
}

impl State {
    /// Open the state of `process_id`, creating its namespace on first
    /// use.
    pub fn open(db: Arc<DB>, process_id: ProcessId) -> Result<Self, Error> {
        let mut prefix = Vec::with_capacity(ProcessId::BYTES + 3);
        prefix.extend_from_slice(b"s/");
        prefix.extend_from_slice(&process_id.to_bytes());
        prefix.push(b'/');

        let store = TreeStore::open(db.clone(), prefix.clone())?;

        Ok(Self {
            db,
            process_id,
            prefix,
            tree: LeanTree::new(store),
            batch: None,
        })
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    pub(crate) fn leaf_key(&self, key: StateKey) -> Vec<u8> {
        let mut out = self.prefix.clone();
        out.extend_from_slice(&key.to_be_bytes());
        out
    }

    fn init_flag_key(&self) -> Vec<u8> {
        let mut out = self.prefix.clone();
        out.extend_from_slice(b"init");
        out
    }

    pub fn is_initialized(&self) -> Result<bool, Error> {
        Ok(StateMetaKV::get_by_key(&self.db, DBBytes(self.init_flag_key()))?.is_some())
    }

    /// Committed record of a state leaf.
    pub(crate) fn record(&self, key: StateKey) -> Result<Option<LeafRecord>, Error> {
        let stored = StateKeysKV::get_by_key(&self.db, DBBytes(self.leaf_key(key)))?;
        Ok(stored.map(|v| v.0))
    }

    /// Record of a state leaf, preferring writes staged earlier in the
    /// same transaction.
    pub(crate) fn record_overlaid(
        &self,
        key: StateKey,
        overlay: &HashMap<StateKey, LeafRecord>,
    ) -> Result<Option<LeafRecord>, Error> {
        if let Some(record) = overlay.get(&key) {
            return Ok(Some(record.clone()));
        }
        self.record(key)
    }

    /// Current state root. `None` before initialization.
    pub fn root(&self) -> Result<Option<Fe>, Error> {
        Ok(self.tree.root()?)
    }

    /// Populate the six reserved leaves. The insertion order is fixed —
    /// process id, results-add, ballot mode, census origin, results-sub,
    /// encryption key — because the tree shape, and with it the initial
    /// root, depends on it.
    pub fn initialize(
        &mut self,
        census_origin: Fe,
        ballot_mode: Fe,
        encryption_key: (Fe, Fe),
    ) -> Result<Fe, Error> {
        if self.is_initialized()? {
            return Err(Error::AlreadyInitialized);
        }

        match self.try_initialize(census_origin, ballot_mode, encryption_key) {
            Ok(root) => Ok(root),
            Err(err) => {
                self.tree.store_mut().discard();
                Err(err)
            }
        }
    }

    fn try_initialize(
        &mut self,
        census_origin: Fe,
        ballot_mode: Fe,
        encryption_key: (Fe, Fe),
    ) -> Result<Fe, Error> {
        let zero_ballot = Ballot::zero().coords();

        let leaves: [(StateKey, Vec<Fe>); 6] = [
            (KEY_PROCESS_ID, vec![self.process_id.to_fe()]),
            (KEY_RESULTS_ADD, zero_ballot.clone()),
            (KEY_BALLOT_MODE, vec![ballot_mode]),
            (KEY_CENSUS_ORIGIN, vec![census_origin]),
            (KEY_RESULTS_SUB, zero_ballot),
            (KEY_ENCRYPTION_KEY, vec![encryption_key.0, encryption_key.1]),
        ];

        let mut batch = WriteBatch::default();

        for (key, values) in &leaves {
            let folded = fold_values(values)?;
            let leaf = leaf_hash(*key, &folded)?;
            let index = self.tree.insert(leaf)?;

            StateKeysKV::stage_upsert(
                &self.db,
                DBBytes(self.leaf_key(*key)),
                DBSerde(LeafRecord::new(index, values)),
                &mut batch,
            );
        }

        let root = self.tree.root()?.ok_or(Error::NotInitialized)?;

        self.tree.store().stage(&mut batch);
        StateMetaKV::stage_upsert(
            &self.db,
            DBBytes(self.init_flag_key()),
            DBBytes(vec![1]),
            &mut batch,
        );

        self.db
            .write(batch)
            .map_err(tally_storage::Error::storage)?;
        self.tree.store_mut().mark_clean();

        tracing::info!(process = %self.process_id, root = %root, "state initialized");
        Ok(root)
    }

    fn leaf_values(&self, key: StateKey) -> Result<Vec<Fe>, Error> {
        let record = self.record(key)?.ok_or(Error::LeafNotFound(key))?;
        record.values_fe()
    }

    /// Running homomorphic sum of every admitted ballot.
    pub fn results_add(&self) -> Result<Ballot, Error> {
        Ok(Ballot::from_coords(&self.leaf_values(KEY_RESULTS_ADD)?)?)
    }

    /// Running homomorphic sum of every superseded ballot.
    pub fn results_sub(&self) -> Result<Ballot, Error> {
        Ok(Ballot::from_coords(&self.leaf_values(KEY_RESULTS_SUB)?)?)
    }

    pub fn ballot_mode(&self) -> Result<Fe, Error> {
        Ok(self.leaf_values(KEY_BALLOT_MODE)?[0])
    }

    pub fn census_origin(&self) -> Result<Fe, Error> {
        Ok(self.leaf_values(KEY_CENSUS_ORIGIN)?[0])
    }

    pub fn encryption_key(&self) -> Result<(Fe, Fe), Error> {
        let values = self.leaf_values(KEY_ENCRYPTION_KEY)?;
        if values.len() != 2 {
            return Err(Error::InvalidInput("malformed encryption key leaf".into()));
        }
        Ok((values[0], values[1]))
    }

    /// Whether a vote id has been admitted before.
    pub fn contains_vote_id(&self, vote_id: StateKey) -> Result<bool, Error> {
        Ok(self.record(vote_id)?.is_some())
    }

    /// The reencrypted ballot currently stored at a ballot-index key.
    pub fn ballot_by_index(&self, key: StateKey) -> Result<Option<Ballot>, Error> {
        match self.record(key)? {
            Some(record) => Ok(Some(Ballot::from_coords(&record.values_fe()?)?)),
            None => Ok(None),
        }
    }

    /// Inclusion witness for an existing leaf at the current root: a NOP
    /// transition carrying the sibling path.
    pub(crate) fn inclusion_witness(
        &self,
        key: StateKey,
        overlay: &HashMap<StateKey, LeafRecord>,
    ) -> Result<StateTransition, Error> {
        let record = self
            .record_overlaid(key, overlay)?
            .ok_or(Error::LeafNotFound(key))?;
        let folded = fold_values(&record.values_fe()?)?;
        let root = self.tree.root()?.ok_or(Error::NotInitialized)?;
        let proof = self.tree.proof(record.index)?;

        Ok(StateTransition {
            old_root: root,
            new_root: root,
            siblings: proof.siblings,
            old_key: Fe::from(key),
            old_value: folded,
            new_key: Fe::from(key),
            new_value: folded,
            is_old0: false,
            fnc0: crate::FNC_NOP.0,
            fnc1: crate::FNC_NOP.1,
        })
    }
}
