use std::{
    collections::HashMap,
    io::BufRead,
    path::Path,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use num_bigint::BigUint;
use rocksdb::{WriteBatch, DB};
use tally_crypto::Fe;
use tally_primitives::Address;
use tally_storage::{DBBytes, DBSerde, KVTable, TreeStore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    import::{CensusDump, Participant, WeightChange},
    tables::{HeadRecord, HeadsKV, KeysKV},
    tree::{verify_census_proof, CensusProof, CensusTree},
    Error,
};

const TAG_WORKING: u8 = b'w';
const TAG_ROOT: u8 = b'r';
const TAG_CONTRACT: u8 = b'a';

/// How long a deferred teardown waits for outstanding handles before
/// reclaiming the data anyway.
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Identity of a census inside the store: a working uuid, a published
/// root (left-padded to 32 bytes) or a bound contract address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CensusKey {
    Working(Uuid),
    Root([u8; 32]),
    Contract(Address),
}

impl CensusKey {
    fn tag(&self) -> u8 {
        match self {
            Self::Working(_) => TAG_WORKING,
            Self::Root(_) => TAG_ROOT,
            Self::Contract(_) => TAG_CONTRACT,
        }
    }

    /// Tagged key bytes, used for head records.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = vec![self.tag()];
        match self {
            Self::Working(uuid) => out.extend_from_slice(uuid.as_bytes()),
            Self::Root(root) => out.extend_from_slice(root),
            Self::Contract(address) => out.extend_from_slice(address.as_bytes()),
        }
        out
    }

    /// Namespace prefix for the census's tree nodes and key index.
    pub fn prefix(&self) -> Vec<u8> {
        let mut out = self.bytes();
        out.push(b'/');
        out
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Registry of every census on this node, over the shared database.
///
/// The registry serializes creation per key (exactly one winner among
/// concurrent creators) and hands out one stable `Arc` handle per live
/// census, so concurrent loaders all observe the same tree.
pub struct CensusStore {
    db: Arc<DB>,
    registry: Mutex<HashMap<CensusKey, Arc<CensusTree>>>,
}

impl CensusStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::with_db(tally_storage::open(path)?))
    }

    pub fn with_db(db: Arc<DB>) -> Self {
        Self {
            db,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn db(&self) -> Arc<DB> {
        self.db.clone()
    }

    fn head_exists(&self, key: &CensusKey) -> Result<bool, Error> {
        Ok(HeadsKV::get_by_key(&self.db, DBBytes(key.bytes()))?.is_some())
    }

    fn head_record(&self, key: &CensusKey) -> Result<Option<HeadRecord>, Error> {
        Ok(HeadsKV::get_by_key(&self.db, DBBytes(key.bytes()))?.map(|v| v.0))
    }

    fn create(&self, key: CensusKey) -> Result<Arc<CensusTree>, Error> {
        let mut registry = self.registry.lock().unwrap();

        if registry.contains_key(&key) || self.head_exists(&key)? {
            return Err(Error::AlreadyExists);
        }

        HeadsKV::put_by_key(
            &self.db,
            DBBytes(key.bytes()),
            DBSerde(HeadRecord::new(now_ms())),
        )?;

        let tree = Arc::new(CensusTree::open(self.db.clone(), key.prefix())?);
        registry.insert(key, tree.clone());
        Ok(tree)
    }

    fn load_key(&self, key: &CensusKey) -> Result<Arc<CensusTree>, Error> {
        let mut registry = self.registry.lock().unwrap();

        if let Some(tree) = registry.get(key) {
            return Ok(tree.clone());
        }
        if !self.head_exists(key)? {
            return Err(Error::NotFound);
        }

        let tree = Arc::new(CensusTree::open(self.db.clone(), key.prefix())?);
        registry.insert(key.clone(), tree.clone());
        Ok(tree)
    }

    /// Drop the head and registry entry of a census whose data was never
    /// committed (failed imports).
    fn forget(&self, key: &CensusKey) -> Result<(), Error> {
        let mut registry = self.registry.lock().unwrap();
        if let Some(tree) = registry.remove(key) {
            tree.close();
        }
        HeadsKV::delete_by_key(&self.db, DBBytes(key.bytes()))?;
        Ok(())
    }

    fn delete_key(&self, key: &CensusKey) -> Result<(), Error> {
        let handle = {
            let mut registry = self.registry.lock().unwrap();
            let handle = registry.remove(key);
            HeadsKV::delete_by_key(&self.db, DBBytes(key.bytes()))?;
            handle
        };

        let db = self.db.clone();
        let prefix = key.prefix();

        // the head is gone, so the census is unobservable; reclaiming the
        // namespace can wait for outstanding handles
        thread::spawn(move || {
            if let Some(handle) = handle {
                let started = Instant::now();
                while Arc::strong_count(&handle) > 1 && started.elapsed() < TEARDOWN_GRACE {
                    thread::sleep(Duration::from_millis(10));
                }
                handle.close();
            }

            if let Err(err) = purge_namespace(&db, &prefix) {
                warn!(?err, "census teardown failed");
            } else {
                debug!(prefix = %hex::encode(&prefix), "census namespace reclaimed");
            }
        });

        Ok(())
    }

    pub fn new_working(&self, uuid: &Uuid) -> Result<Arc<CensusTree>, Error> {
        self.create(CensusKey::Working(*uuid))
    }

    pub fn new_by_root(&self, root: &Fe) -> Result<Arc<CensusTree>, Error> {
        self.create(CensusKey::Root(root.to_bytes_be()))
    }

    pub fn new_by_address(&self, address: &Address) -> Result<Arc<CensusTree>, Error> {
        self.create(CensusKey::Contract(*address))
    }

    pub fn load_working(&self, uuid: &Uuid) -> Result<Arc<CensusTree>, Error> {
        self.load_key(&CensusKey::Working(*uuid))
    }

    pub fn load_by_root(&self, root: &Fe) -> Result<Arc<CensusTree>, Error> {
        self.load_key(&CensusKey::Root(root.to_bytes_be()))
    }

    pub fn load_by_address(&self, address: &Address) -> Result<Arc<CensusTree>, Error> {
        self.load_key(&CensusKey::Contract(*address))
    }

    pub fn exists_working(&self, uuid: &Uuid) -> Result<bool, Error> {
        self.head_exists(&CensusKey::Working(*uuid))
    }

    pub fn exists_by_root(&self, root: &Fe) -> Result<bool, Error> {
        self.head_exists(&CensusKey::Root(root.to_bytes_be()))
    }

    pub fn exists_by_address(&self, address: &Address) -> Result<bool, Error> {
        self.head_exists(&CensusKey::Contract(*address))
    }

    /// Remove a working census. The head disappears immediately; the tree
    /// data is reclaimed in the background once handles are released.
    pub fn del_working(&self, uuid: &Uuid) -> Result<(), Error> {
        self.delete_key(&CensusKey::Working(*uuid))
    }

    pub fn del_by_root(&self, root: &Fe) -> Result<(), Error> {
        self.delete_key(&CensusKey::Root(root.to_bytes_be()))
    }

    pub fn del_by_address(&self, address: &Address) -> Result<(), Error> {
        self.delete_key(&CensusKey::Contract(*address))
    }

    /// Promote a working census to its content address: the namespace is
    /// re-keyed under the computed root in one atomic write and the
    /// working entry disappears. The working handle is closed.
    pub fn publish(&self, uuid: &Uuid) -> Result<Fe, Error> {
        let working = self.load_working(uuid)?;
        let root = working
            .root()?
            .ok_or_else(|| Error::invalid_input("cannot publish an empty census"))?;

        let working_key = CensusKey::Working(*uuid);
        let root_key = CensusKey::Root(root.to_bytes_be());

        let mut registry = self.registry.lock().unwrap();
        if registry.contains_key(&root_key) || self.head_exists(&root_key)? {
            return Err(Error::AlreadyExists);
        }

        let mut batch = WriteBatch::default();
        TreeStore::stage_move(
            &self.db,
            &working_key.prefix(),
            &root_key.prefix(),
            &mut batch,
        )?;
        KeysKV::stage_copy_prefix(
            &self.db,
            &working_key.prefix(),
            &root_key.prefix(),
            &mut batch,
        )?;
        KeysKV::stage_delete_prefix(&self.db, &working_key.prefix(), &mut batch)?;
        HeadsKV::stage_upsert(
            &self.db,
            DBBytes(root_key.bytes()),
            DBSerde(HeadRecord::new(now_ms())),
            &mut batch,
        );
        HeadsKV::stage_delete(&self.db, DBBytes(working_key.bytes()), &mut batch);

        self.db
            .write(batch)
            .map_err(tally_storage::Error::storage)?;

        working.close();
        registry.remove(&working_key);

        info!(%root, "census published");
        Ok(root)
    }

    pub fn size_by_root(&self, root: &Fe) -> Result<u64, Error> {
        self.load_by_root(root)?.size()
    }

    pub fn proof_by_root(&self, root: &Fe, address: &Address) -> Result<CensusProof, Error> {
        self.load_by_root(root)?.gen_proof(address)
    }

    pub fn verify_proof(&self, proof: &CensusProof) -> bool {
        verify_census_proof(proof)
    }

    /// Build a census from a JSONL participant stream. Participants are
    /// inserted in `index` order; the computed root must equal
    /// `expected_root` or nothing is retained.
    pub fn import(
        &self,
        expected_root: &Fe,
        reader: impl BufRead,
    ) -> Result<Arc<CensusTree>, Error> {
        let mut participants = Vec::new();

        for line in reader.lines() {
            let line = line.map_err(|err| Error::invalid_input(format!("read failed: {err}")))?;
            if line.trim().is_empty() {
                continue;
            }

            let participant: Participant = serde_json::from_str(&line)
                .map_err(|err| Error::invalid_input(format!("bad participant: {err}")))?;
            participants.push(participant);
        }

        self.import_participants(expected_root, participants)
    }

    /// Build a census from a JSON dump `{ root, participants }`. The
    /// declared root must match the recomputed one.
    pub fn import_all(&self, bytes: &[u8]) -> Result<Arc<CensusTree>, Error> {
        let dump: CensusDump = serde_json::from_slice(bytes)
            .map_err(|err| Error::invalid_input(format!("bad census dump: {err}")))?;

        self.import_participants(&dump.root, dump.participants)
    }

    fn import_participants(
        &self,
        expected_root: &Fe,
        mut participants: Vec<Participant>,
    ) -> Result<Arc<CensusTree>, Error> {
        participants.sort_by_key(|p| p.index);

        for (position, participant) in participants.iter().enumerate() {
            if participant.index != position as u64 {
                return Err(Error::invalid_input(format!(
                    "participant indexes are not contiguous at {}",
                    participant.index
                )));
            }
        }

        let entries: Vec<(Address, BigUint)> = participants
            .into_iter()
            .map(|p| (p.address, p.weight))
            .collect();

        let key = CensusKey::Root(expected_root.to_bytes_be());
        let tree = self.create(key.clone())?;

        match tree.import_entries(&entries, Some(expected_root)) {
            Ok(root) => {
                info!(%root, entries = entries.len(), "census imported");
                Ok(tree)
            }
            Err(err) => {
                self.forget(&key)?;
                Err(err)
            }
        }
    }

    /// First import of an on-chain census: create the contract-bound tree
    /// and replay the event history into it.
    pub fn import_events_by_address(
        &self,
        address: &Address,
        events: &[WeightChange],
    ) -> Result<Arc<CensusTree>, Error> {
        let key = CensusKey::Contract(*address);
        let tree = self.create(key.clone())?;

        match tree.apply_changes(events) {
            Ok(root) => {
                self.set_contract_root(address, &root)?;
                info!(%address, %root, events = events.len(), "on-chain census imported");
                Ok(tree)
            }
            Err(err) => {
                self.forget(&key)?;
                Err(err)
            }
        }
    }

    /// Apply newer weight-change events to an existing contract-bound
    /// census (insert when absent, replace otherwise).
    pub fn apply_events(&self, address: &Address, events: &[WeightChange]) -> Result<Fe, Error> {
        let tree = self.load_by_address(address)?;
        let root = tree.apply_changes(events)?;
        self.set_contract_root(address, &root)?;

        debug!(%address, %root, events = events.len(), "census head advanced");
        Ok(root)
    }

    fn set_contract_root(&self, address: &Address, root: &Fe) -> Result<(), Error> {
        let key = CensusKey::Contract(*address);
        let mut record = self
            .head_record(&key)?
            .ok_or(Error::NotFound)?;
        record.root = Some(root.to_bytes_be());

        HeadsKV::put_by_key(&self.db, DBBytes(key.bytes()), DBSerde(record))?;
        Ok(())
    }

    /// Latest root recorded for a contract-bound census.
    pub fn contract_root(&self, address: &Address) -> Result<Option<Fe>, Error> {
        let record = self.head_record(&CensusKey::Contract(*address))?;
        match record.and_then(|r| r.root) {
            Some(bytes) => Ok(Some(Fe::from_bytes_be(&bytes)?)),
            None => Ok(None),
        }
    }

    /// How many upstream events have been consumed for a contract-bound
    /// census; zero when none was imported yet.
    pub fn processed_events(&self, address: &Address) -> Result<u64, Error> {
        let record = self.head_record(&CensusKey::Contract(*address))?;
        Ok(record.map(|r| r.processed_events).unwrap_or(0))
    }

    /// Record the new processed-event count after an import run, so the
    /// next run resumes pagination instead of replaying the history. A
    /// missing head (nothing was imported) keeps the count at zero.
    pub fn set_processed_events(&self, address: &Address, processed: u64) -> Result<(), Error> {
        let key = CensusKey::Contract(*address);
        let Some(mut record) = self.head_record(&key)? else {
            return Ok(());
        };

        record.processed_events = processed;
        HeadsKV::put_by_key(&self.db, DBBytes(key.bytes()), DBSerde(record))?;
        Ok(())
    }

    /// Export a published census as the JSON dump shape `import_all`
    /// rebuilds.
    pub fn dump_by_root(&self, root: &Fe) -> Result<CensusDump, Error> {
        let tree = self.load_by_root(root)?;

        Ok(CensusDump {
            root: *root,
            participants: tree.participants()?,
        })
    }

    /// Evict working censuses older than `older_than`. The head records
    /// are walked as a snapshot so in-flight imports keep their locks;
    /// undecodable records are skipped.
    pub fn purge_working(&self, older_than: Duration) -> Result<usize, Error> {
        let cutoff = now_ms().saturating_sub(older_than.as_millis() as u64);

        let mut stale = Vec::new();
        for entry in HeadsKV::iter_prefix(&self.db, &[TAG_WORKING]) {
            let (key, value) = entry?;

            let uuid = match key.get(1..17).map(Uuid::from_slice) {
                Some(Ok(uuid)) => uuid,
                _ => {
                    warn!(key = %hex::encode(&key), "skipping malformed working census key");
                    continue;
                }
            };

            let record: HeadRecord = match bincode::deserialize(&value) {
                Ok(record) => record,
                Err(err) => {
                    warn!(%uuid, ?err, "skipping undecodable working census record");
                    continue;
                }
            };

            if record.created_at_ms < cutoff {
                stale.push(uuid);
            }
        }

        let purged = stale.len();
        for uuid in stale {
            debug!(%uuid, "purging stale working census");
            self.del_working(&uuid)?;
        }

        Ok(purged)
    }
}

fn purge_namespace(db: &DB, prefix: &[u8]) -> Result<(), Error> {
    let mut batch = WriteBatch::default();
    TreeStore::stage_purge(db, prefix, &mut batch)?;
    KeysKV::stage_delete_prefix(db, prefix, &mut batch)?;

    db.write(batch).map_err(tally_storage::Error::storage)?;
    Ok(())
}
