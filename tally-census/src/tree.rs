use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use num_bigint::BigUint;
use rocksdb::{WriteBatch, DB};
use serde::{Deserialize, Serialize};
use tally_crypto::{to_field, Fe};
use tally_merkle::{verify_proof, LeanTree};
use tally_primitives::Address;
use tally_storage::{DBBytes, DBInt, KVTable, TreeStore};
use tracing::warn;

use crate::{
    import::{Participant, WeightChange},
    tables::KeysKV,
    Error,
};

/// Census weights must fit below the address in a packed leaf.
pub const MAX_WEIGHT_BITS: u64 = 88;

fn weight_mask() -> BigUint {
    (BigUint::from(1u8) << MAX_WEIGHT_BITS) - 1u8
}

/// Pack a census entry into its field-element leaf:
/// `(address << 88) | weight`.
pub fn pack_census_leaf(address: &Address, weight: &BigUint) -> Result<Fe, Error> {
    if weight.bits() > MAX_WEIGHT_BITS {
        return Err(Error::invalid_input(format!(
            "weight {weight} exceeds {MAX_WEIGHT_BITS} bits"
        )));
    }

    let packed = (address.to_biguint() << MAX_WEIGHT_BITS) | weight;
    Ok(to_field(&packed))
}

/// Inclusion proof for one census entry, verifiable with nothing but the
/// census root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensusProof {
    pub address: Address,
    /// The packed `(address, weight)` leaf.
    pub value: Fe,
    /// Packed left/right path directions, one bit per sibling.
    pub index: u64,
    pub siblings: Vec<Fe>,
    pub root: Fe,
}

/// Check that the leaf commits to the claimed address and that its path
/// recomputes the root.
pub fn verify_census_proof(proof: &CensusProof) -> bool {
    let claimed = proof.value.to_biguint() >> MAX_WEIGHT_BITS;
    if claimed != proof.address.to_biguint() {
        return false;
    }

    verify_proof(&proof.root, &proof.value, proof.index, &proof.siblings)
}

/// One census tree, owning a keyed sub-namespace of the shared database.
///
/// Handles are shared through the store's registry; every mutating call
/// stages against the tree's overlay and commits as a single write batch,
/// so concurrent readers only ever observe committed roots.
pub struct CensusTree {
    db: Arc<DB>,
    prefix: Vec<u8>,
    inner: Mutex<Inner>,
    closed: AtomicBool,
}

struct Inner {
    tree: LeanTree<TreeStore>,
    pending_keys: Vec<(Address, u64)>,
}

impl CensusTree {
    pub(crate) fn open(db: Arc<DB>, prefix: Vec<u8>) -> Result<Self, Error> {
        let store = TreeStore::open(db.clone(), prefix.clone())?;

        Ok(Self {
            db,
            prefix,
            inner: Mutex::new(Inner {
                tree: LeanTree::new(store),
                pending_keys: Vec::new(),
            }),
            closed: AtomicBool::new(false),
        })
    }

    fn guard(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    fn key_for(&self, address: &Address) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(address.as_bytes());
        key
    }

    fn lookup_index(&self, inner: &Inner, address: &Address) -> Result<Option<u64>, Error> {
        if let Some((_, index)) = inner
            .pending_keys
            .iter()
            .rev()
            .find(|(pending, _)| pending == address)
        {
            return Ok(Some(*index));
        }

        let stored = KeysKV::get_by_key(&self.db, DBBytes(self.key_for(address)))?;
        Ok(stored.map(|v| v.0))
    }

    fn stage_append(
        &self,
        inner: &mut Inner,
        address: &Address,
        weight: &BigUint,
    ) -> Result<u64, Error> {
        let leaf = pack_census_leaf(address, weight)?;
        let index = inner.tree.insert(leaf)?;
        inner.pending_keys.push((*address, index));
        Ok(index)
    }

    fn stage_upsert(
        &self,
        inner: &mut Inner,
        address: &Address,
        weight: &BigUint,
    ) -> Result<(), Error> {
        match self.lookup_index(inner, address)? {
            Some(index) => {
                let leaf = pack_census_leaf(address, weight)?;
                inner.tree.update(index, leaf)?;
            }
            None => {
                self.stage_append(inner, address, weight)?;
            }
        }
        Ok(())
    }

    fn commit_locked(&self, inner: &mut Inner) -> Result<(), Error> {
        let mut batch = WriteBatch::default();
        inner.tree.store().stage(&mut batch);

        for (address, index) in &inner.pending_keys {
            KeysKV::stage_upsert(
                &self.db,
                DBBytes(self.key_for(address)),
                DBInt(*index),
                &mut batch,
            );
        }

        if let Err(err) = self.db.write(batch) {
            self.discard_locked(inner);
            return Err(tally_storage::Error::storage(err).into());
        }

        inner.tree.store_mut().mark_clean();
        inner.pending_keys.clear();
        Ok(())
    }

    fn discard_locked(&self, inner: &mut Inner) {
        inner.tree.store_mut().discard();
        inner.pending_keys.clear();
    }

    /// Append one entry.
    pub fn add(&self, address: &Address, weight: &BigUint) -> Result<(), Error> {
        self.guard()?;
        let mut inner = self.lock();

        if let Err(err) = self.stage_append(&mut inner, address, weight) {
            self.discard_locked(&mut inner);
            return Err(err);
        }
        self.commit_locked(&mut inner)
    }

    /// Overwrite the entry for `address`, appending it when absent.
    pub fn update(&self, address: &Address, weight: &BigUint) -> Result<(), Error> {
        self.guard()?;
        let mut inner = self.lock();

        if let Err(err) = self.stage_upsert(&mut inner, address, weight) {
            self.discard_locked(&mut inner);
            return Err(err);
        }
        self.commit_locked(&mut inner)
    }

    /// Append many entries in order, committed as one write.
    pub fn add_bulk(&self, entries: &[(Address, BigUint)]) -> Result<(), Error> {
        self.guard()?;
        let mut inner = self.lock();

        for (address, weight) in entries {
            if let Err(err) = self.stage_append(&mut inner, address, weight) {
                self.discard_locked(&mut inner);
                return Err(err);
            }
        }

        self.commit_locked(&mut inner)
    }

    /// Build the tree from ordered entries, enforcing an expected root
    /// before anything is committed. Nothing is retained on mismatch.
    pub(crate) fn import_entries(
        &self,
        entries: &[(Address, BigUint)],
        expected_root: Option<&Fe>,
    ) -> Result<Fe, Error> {
        self.guard()?;
        let mut inner = self.lock();

        for (address, weight) in entries {
            if let Err(err) = self.stage_append(&mut inner, address, weight) {
                self.discard_locked(&mut inner);
                return Err(err);
            }
        }

        let computed = match inner.tree.root() {
            Ok(Some(root)) => root,
            Ok(None) => {
                self.discard_locked(&mut inner);
                return Err(Error::invalid_input("census has no entries"));
            }
            Err(err) => {
                self.discard_locked(&mut inner);
                return Err(err.into());
            }
        };

        if let Some(expected) = expected_root {
            if computed != *expected {
                self.discard_locked(&mut inner);
                return Err(Error::RootMismatch {
                    expected: *expected,
                    computed,
                });
            }
        }

        self.commit_locked(&mut inner)?;
        Ok(computed)
    }

    /// Weight currently stored for `address`, staged writes included.
    fn lookup_weight(&self, inner: &Inner, address: &Address) -> Result<Option<BigUint>, Error> {
        let Some(index) = self.lookup_index(inner, address)? else {
            return Ok(None);
        };

        let leaf = inner.tree.leaf(index)?.ok_or(Error::NotFound)?;
        Ok(Some(leaf.to_biguint() & weight_mask()))
    }

    /// Apply a run of weight-change events as upserts, committed as one
    /// write. Each event's claimed previous weight is checked against the
    /// stored one so a missed or out-of-order event shows up in the logs;
    /// the new weight wins either way. Returns the resulting root.
    pub(crate) fn apply_changes(&self, events: &[WeightChange]) -> Result<Fe, Error> {
        self.guard()?;
        let mut inner = self.lock();

        for event in events {
            let stored = match self.lookup_weight(&inner, &event.address) {
                Ok(stored) => stored.unwrap_or_default(),
                Err(err) => {
                    self.discard_locked(&mut inner);
                    return Err(err);
                }
            };
            if stored != event.previous_weight {
                warn!(
                    address = %event.address,
                    stored = %stored,
                    claimed = %event.previous_weight,
                    "weight change does not chain from the stored weight"
                );
            }

            if let Err(err) = self.stage_upsert(&mut inner, &event.address, &event.new_weight) {
                self.discard_locked(&mut inner);
                return Err(err);
            }
        }

        let root = match inner.tree.root() {
            Ok(Some(root)) => root,
            Ok(None) => {
                self.discard_locked(&mut inner);
                return Err(Error::invalid_input("census has no entries"));
            }
            Err(err) => {
                self.discard_locked(&mut inner);
                return Err(err.into());
            }
        };

        self.commit_locked(&mut inner)?;
        Ok(root)
    }

    /// Current root; `None` while the census is empty.
    pub fn root(&self) -> Result<Option<Fe>, Error> {
        self.guard()?;
        let inner = self.lock();
        Ok(inner.tree.root()?)
    }

    pub fn size(&self) -> Result<u64, Error> {
        self.guard()?;
        let inner = self.lock();
        Ok(inner.tree.size())
    }

    /// Leaf index of `address`, if enrolled.
    pub fn index_of(&self, address: &Address) -> Result<Option<u64>, Error> {
        self.guard()?;
        let inner = self.lock();
        self.lookup_index(&inner, address)
    }

    /// Inclusion proof for `address` against the current root.
    pub fn gen_proof(&self, address: &Address) -> Result<CensusProof, Error> {
        self.guard()?;
        let inner = self.lock();

        let index = self
            .lookup_index(&inner, address)?
            .ok_or(Error::NotFound)?;

        let proof = inner.tree.proof(index)?;

        Ok(CensusProof {
            address: *address,
            value: proof.leaf,
            index: proof.index,
            siblings: proof.siblings,
            root: proof.root,
        })
    }

    /// Every enrolled entry, ordered by leaf index. Together with the
    /// root this is the snapshot `import_all` can rebuild.
    pub fn participants(&self) -> Result<Vec<Participant>, Error> {
        self.guard()?;
        let inner = self.lock();

        let mask = weight_mask();
        let mut out = Vec::new();

        for entry in KeysKV::iter_prefix(&self.db, &self.prefix) {
            let (key, value) = entry?;
            let address = Address::try_from(&key[self.prefix.len()..])?;
            let index = DBInt::from(value).0;

            let leaf = inner.tree.leaf(index)?.ok_or(Error::NotFound)?;
            out.push(Participant {
                address,
                weight: leaf.to_biguint() & &mask,
                index,
            });
        }

        out.sort_by_key(|p| p.index);
        Ok(out)
    }

    /// Mark the handle unusable; subsequent calls fail with
    /// [`Error::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
