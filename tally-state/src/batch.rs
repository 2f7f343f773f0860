use std::collections::HashMap;

use rocksdb::WriteBatch;
use serde::{Deserialize, Serialize};
use tally_crypto::Fe;
use tally_primitives::{
    ballot_index,
    keys::{
        KEY_BALLOT_MODE, KEY_CENSUS_ORIGIN, KEY_ENCRYPTION_KEY, KEY_PROCESS_ID, KEY_RESULTS_ADD,
        KEY_RESULTS_SUB,
    },
    Address, Ballot, StateKey,
};
use tally_storage::{DBBytes, DBSerde, KVTable};
use tracing::debug;

use crate::{
    state::{fold_values, leaf_hash, LeafRecord, State, StateKeysKV},
    witness::StateTransition,
    Error, FNC_INSERT, FNC_UPDATE,
};

/// Fixed batch width. The state-transition circuit is sized for exactly
/// this many votes, so shorter batches are padded with noop transitions.
pub const VOTES_PER_BATCH: usize = 10;

/// One vote as handed to the state engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub address: Address,
    /// The voter's leaf position in the census.
    pub census_index: u64,
    pub vote_id: StateKey,
    /// The ballot as cast by the voter.
    pub ballot: Ballot,
    /// The ballot after sequencer reencryption; this is what the state
    /// stores and accumulates.
    pub reencrypted_ballot: Ballot,
    pub weight: Fe,
}

/// A vote accepted into the open batch, together with what it displaced.
#[derive(Debug, Clone)]
pub struct AdmittedVote {
    pub vote: Vote,
    pub ballot_key: StateKey,
    /// The previously stored ballot when this vote overwrites one, the
    /// zero ballot otherwise.
    pub overwritten_ballot: Ballot,
    pub overwrote: bool,
}

pub(crate) struct OpenBatch {
    root_before: Fe,
    pending: Vec<AdmittedVote>,
    all_ballots_sum: Ballot,
    overwritten_sum: Ballot,
    voters_count: u64,
    overwritten_votes_count: u64,
}

/// Everything one committed batch hands to the prover: the root pair, the
/// ordered witnesses and the data that goes into the blob.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub root_before: Fe,
    pub root_after: Fe,
    /// Inclusion witnesses for process id, census origin, ballot mode and
    /// encryption key, in that order, at `root_before`.
    pub process_witnesses: Vec<StateTransition>,
    /// Ballot/vote-id transition pairs, one pair per slot, noop-padded to
    /// [`VOTES_PER_BATCH`].
    pub vote_witnesses: Vec<StateTransition>,
    pub results_add_witness: StateTransition,
    pub results_sub_witness: StateTransition,
    pub votes: Vec<AdmittedVote>,
    /// New running sums after this batch.
    pub results_add: Ballot,
    pub results_sub: Ballot,
    pub voters_count: u64,
    pub overwritten_votes_count: u64,
}

impl State {
    /// Open a batch: snapshot the current root and reset the per-batch
    /// accumulators.
    pub fn start_batch(&mut self) -> Result<(), Error> {
        if self.batch.is_some() {
            return Err(Error::BatchOpen);
        }
        if !self.is_initialized()? {
            return Err(Error::NotInitialized);
        }

        let root_before = self.root()?.ok_or(Error::NotInitialized)?;

        self.batch = Some(OpenBatch {
            root_before,
            pending: Vec::new(),
            all_ballots_sum: Ballot::zero(),
            overwritten_sum: Ballot::zero(),
            voters_count: 0,
            overwritten_votes_count: 0,
        });

        Ok(())
    }

    /// Admit one vote into the open batch. The tree is untouched until
    /// [`end_batch`](Self::end_batch).
    pub fn add_vote(&mut self, vote: Vote) -> Result<(), Error> {
        let batch = self.batch.as_ref().ok_or(Error::NoBatchOpen)?;
        if batch.pending.len() >= VOTES_PER_BATCH {
            return Err(Error::BatchFull(batch.pending.len()));
        }

        let ballot_key = ballot_index(vote.census_index, &vote.address)?;

        if batch.pending.iter().any(|p| p.vote.vote_id == vote.vote_id)
            || self.contains_vote_id(vote.vote_id)?
        {
            return Err(Error::DuplicateVoteId(vote.vote_id));
        }

        // an earlier vote in this same batch counts as the stored ballot
        let previous = match batch
            .pending
            .iter()
            .rev()
            .find(|p| p.ballot_key == ballot_key)
        {
            Some(pending) => Some(pending.vote.reencrypted_ballot.clone()),
            None => self.ballot_by_index(ballot_key)?,
        };

        let batch = self.batch.as_mut().ok_or(Error::NoBatchOpen)?;

        let (overwritten_ballot, overwrote) = match previous {
            Some(stored) => {
                batch.overwritten_sum = batch.overwritten_sum.add(&stored)?;
                batch.overwritten_votes_count += 1;
                (stored, true)
            }
            None => (Ballot::zero(), false),
        };

        batch.all_ballots_sum = batch.all_ballots_sum.add(&vote.reencrypted_ballot)?;
        batch.voters_count += 1;
        batch.pending.push(AdmittedVote {
            vote,
            ballot_key,
            overwritten_ballot,
            overwrote,
        });

        Ok(())
    }

    /// Drop the open batch without touching the state.
    pub fn abort_batch(&mut self) {
        self.batch = None;
        self.tree.store_mut().discard();
    }

    /// Apply the open batch: emit the ordered witness stream, advance the
    /// accumulators and commit everything as one storage transaction. Any
    /// failure discards the transaction.
    pub fn end_batch(&mut self) -> Result<BatchResult, Error> {
        let batch = self.batch.take().ok_or(Error::NoBatchOpen)?;

        match self.commit_batch(batch) {
            Ok(result) => Ok(result),
            Err(err) => {
                self.tree.store_mut().discard();
                Err(err)
            }
        }
    }

    /// The whole lifecycle in one call, aborting on the first bad vote.
    pub fn add_votes_batch(&mut self, votes: &[Vote]) -> Result<BatchResult, Error> {
        self.start_batch()?;

        for vote in votes {
            if let Err(err) = self.add_vote(vote.clone()) {
                self.abort_batch();
                return Err(err);
            }
        }

        self.end_batch()
    }

    fn commit_batch(&mut self, batch: OpenBatch) -> Result<BatchResult, Error> {
        let mut overlay: HashMap<StateKey, LeafRecord> = HashMap::new();

        // inclusion paths for the process leaves at the pre-batch root
        let process_witnesses = vec![
            self.inclusion_witness(KEY_PROCESS_ID, &overlay)?,
            self.inclusion_witness(KEY_CENSUS_ORIGIN, &overlay)?,
            self.inclusion_witness(KEY_BALLOT_MODE, &overlay)?,
            self.inclusion_witness(KEY_ENCRYPTION_KEY, &overlay)?,
        ];

        // ballot and vote-id transitions, slot by slot; empty slots keep
        // the stream shape with noops
        let mut vote_witnesses = Vec::with_capacity(2 * VOTES_PER_BATCH);
        for slot in 0..VOTES_PER_BATCH {
            match batch.pending.get(slot) {
                Some(admitted) => {
                    let coords = admitted.vote.reencrypted_ballot.coords();
                    vote_witnesses.push(self.upsert_leaf(
                        &mut overlay,
                        admitted.ballot_key,
                        coords,
                    )?);
                    vote_witnesses.push(self.insert_vote_id(&mut overlay, admitted.vote.vote_id)?);
                }
                None => {
                    let root = self.tree.root()?.ok_or(Error::NotInitialized)?;
                    vote_witnesses.push(StateTransition::noop(root));
                    vote_witnesses.push(StateTransition::noop(root));
                }
            }
        }

        // advance the running sums
        let results_add = self
            .ballot_leaf(KEY_RESULTS_ADD, &overlay)?
            .add(&batch.all_ballots_sum)?;
        let results_add_witness =
            self.upsert_leaf(&mut overlay, KEY_RESULTS_ADD, results_add.coords())?;

        let results_sub = self
            .ballot_leaf(KEY_RESULTS_SUB, &overlay)?
            .add(&batch.overwritten_sum)?;
        let results_sub_witness =
            self.upsert_leaf(&mut overlay, KEY_RESULTS_SUB, results_sub.coords())?;

        let root_after = self.tree.root()?.ok_or(Error::NotInitialized)?;

        // one write for the whole batch
        let mut wb = WriteBatch::default();
        self.tree.store().stage(&mut wb);
        for (key, record) in &overlay {
            StateKeysKV::stage_upsert(
                &self.db,
                DBBytes(self.leaf_key(*key)),
                DBSerde(record.clone()),
                &mut wb,
            );
        }

        self.db.write(wb).map_err(tally_storage::Error::storage)?;
        self.tree.store_mut().mark_clean();

        debug!(
            process = %self.process_id(),
            votes = batch.pending.len(),
            overwritten = batch.overwritten_votes_count,
            root_after = %root_after,
            "batch committed"
        );

        Ok(BatchResult {
            root_before: batch.root_before,
            root_after,
            process_witnesses,
            vote_witnesses,
            results_add_witness,
            results_sub_witness,
            votes: batch.pending,
            results_add,
            results_sub,
            voters_count: batch.voters_count,
            overwritten_votes_count: batch.overwritten_votes_count,
        })
    }

    fn ballot_leaf(
        &self,
        key: StateKey,
        overlay: &HashMap<StateKey, LeafRecord>,
    ) -> Result<Ballot, Error> {
        let record = self
            .record_overlaid(key, overlay)?
            .ok_or(Error::LeafNotFound(key))?;
        Ok(Ballot::from_coords(&record.values_fe()?)?)
    }

    /// Insert or update the leaf at `key`, returning its transition
    /// witness. Siblings are taken at the leaf's index after the
    /// mutation; for updates the path is unchanged by the operation.
    fn upsert_leaf(
        &mut self,
        overlay: &mut HashMap<StateKey, LeafRecord>,
        key: StateKey,
        values: Vec<Fe>,
    ) -> Result<StateTransition, Error> {
        let folded = fold_values(&values)?;
        let leaf = leaf_hash(key, &folded)?;
        let old_root = self.tree.root()?.ok_or(Error::NotInitialized)?;

        let (index, old_key, old_value, is_old0, fnc) =
            match self.record_overlaid(key, overlay)? {
                Some(record) => {
                    let old_value = fold_values(&record.values_fe()?)?;
                    self.tree.update(record.index, leaf)?;
                    (record.index, Fe::from(key), old_value, false, FNC_UPDATE)
                }
                None => {
                    let index = self.tree.insert(leaf)?;
                    (index, Fe::zero(), Fe::zero(), true, FNC_INSERT)
                }
            };

        overlay.insert(key, LeafRecord::new(index, &values));

        let proof = self.tree.proof(index)?;
        let new_root = self.tree.root()?.ok_or(Error::NotInitialized)?;

        Ok(StateTransition {
            old_root,
            new_root,
            siblings: proof.siblings,
            old_key,
            old_value,
            new_key: Fe::from(key),
            new_value: folded,
            is_old0,
            fnc0: fnc.0,
            fnc1: fnc.1,
        })
    }

    /// Vote-id leaves only ever get inserted, with the zero sentinel as
    /// value; existence is the signal.
    fn insert_vote_id(
        &mut self,
        overlay: &mut HashMap<StateKey, LeafRecord>,
        vote_id: StateKey,
    ) -> Result<StateTransition, Error> {
        if self.record_overlaid(vote_id, overlay)?.is_some() {
            return Err(Error::DuplicateVoteId(vote_id));
        }

        self.upsert_leaf(overlay, vote_id, vec![Fe::zero()])
    }
}
