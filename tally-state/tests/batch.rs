use std::sync::Arc;

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bn254::{EdwardsAffine, Fq, Fr};
use ark_ff::{BigInteger, PrimeField};
use rocksdb::DB;
use tally_crypto::{hash, multi_hash, Fe};
use tally_primitives::{keys, Address, Ballot, CipherField, ProcessId};
use tally_state::{Error, State, Vote, FNC_INSERT, FNC_NOP, FNC_UPDATE, VOTES_PER_BATCH};

fn with_tmp_db<F: FnOnce(Arc<DB>)>(op: F) {
    let path = tempfile::tempdir().unwrap().into_path();
    let db = tally_storage::open(&path).unwrap();

    op(db);

    tally_storage::destroy(&path).unwrap();
}

fn voter(last: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0x10;
    bytes[19] = last;
    Address::new(bytes)
}

fn process() -> ProcessId {
    ProcessId::new(1, voter(0xFF), 7).unwrap()
}

fn fe_from_fq(fq: &Fq) -> Fe {
    Fe::from_bytes_be_mod(&fq.into_bigint().to_bytes_be())
}

fn point(n: u64) -> (Fe, Fe) {
    let p = (EdwardsAffine::generator() * Fr::from(n)).into_affine();
    (fe_from_fq(&p.x), fe_from_fq(&p.y))
}

/// A well-formed ballot built from small multiples of the curve
/// generator.
fn ballot(n: u64) -> Ballot {
    let field = CipherField {
        c1: point(n),
        c2: point(n + 1),
    };
    Ballot::new(vec![field; 8]).unwrap()
}

fn vote(pid: &ProcessId, address: Address, census_index: u64, k: u64, n: u64) -> Vote {
    Vote {
        address,
        census_index,
        vote_id: keys::vote_id(pid, &address, &Fe::from(k)).unwrap(),
        ballot: ballot(n),
        reencrypted_ballot: ballot(n + 100),
        weight: Fe::one(),
    }
}

fn initialized_state(db: Arc<DB>) -> State {
    let mut state = State::open(db, process()).unwrap();
    state
        .initialize(Fe::from(1), Fe::from(987654), (Fe::from(123), Fe::from(456)))
        .unwrap();
    state
}

#[test]
fn initial_root_matches_fixed_topology() {
    with_tmp_db(|db| {
        let pid = process();
        let origin = Fe::from(6);
        let mode = Fe::from(987654);
        let enc_key = (Fe::from(123), Fe::from(456));

        let mut state = State::open(db, pid).unwrap();
        let root = state.initialize(origin, mode, enc_key).unwrap();

        // rebuild the documented structure by hand
        let h = |a: Fe, b: Fe| hash(&[a, b]).unwrap();
        let leaf = |k: u64, v: Fe| hash(&[Fe::from(k), v, Fe::one()]).unwrap();

        let zero_ballot = multi_hash(&Ballot::zero().coords()).unwrap();
        let l_process = leaf(0x00, pid.to_fe());
        let l_origin = leaf(0x01, origin);
        let l_mode = leaf(0x02, mode);
        let l_enc = leaf(0x03, h(enc_key.0, enc_key.1));
        let l_add = leaf(0x04, zero_ballot);
        let l_sub = leaf(0x05, zero_ballot);

        let node_a0 = h(l_process, l_add);
        let node_a1 = h(l_mode, l_origin);
        let node_a = h(node_a0, node_a1);
        let node_b = h(l_sub, l_enc);
        let expected = h(node_a, node_b);

        assert_eq!(root, expected);
        assert_eq!(state.root().unwrap().unwrap(), expected);
    });
}

#[test]
fn initialize_is_once_only_and_durable() {
    with_tmp_db(|db| {
        let root = {
            let mut state = initialized_state(db.clone());
            assert!(matches!(
                state.initialize(Fe::from(1), Fe::from(2), (Fe::from(3), Fe::from(4))),
                Err(Error::AlreadyInitialized)
            ));
            state.root().unwrap().unwrap()
        };

        // reopening finds the same state
        let state = State::open(db, process()).unwrap();
        assert!(state.is_initialized().unwrap());
        assert_eq!(state.root().unwrap().unwrap(), root);
        assert_eq!(state.ballot_mode().unwrap(), Fe::from(987654));
        assert_eq!(
            state.encryption_key().unwrap(),
            (Fe::from(123), Fe::from(456))
        );
        assert_eq!(state.results_add().unwrap(), Ballot::zero());
        assert_eq!(state.results_sub().unwrap(), Ballot::zero());
    });
}

#[test]
fn overwrite_moves_the_tally() {
    with_tmp_db(|db| {
        let pid = process();
        let mut state = initialized_state(db);
        let alice = voter(1);

        let first = vote(&pid, alice, 0, 1, 1);
        let ballot_one = first.reencrypted_ballot.clone();
        state.add_votes_batch(std::slice::from_ref(&first)).unwrap();

        assert_eq!(state.results_add().unwrap(), ballot_one);
        assert_eq!(state.results_sub().unwrap(), Ballot::zero());

        let second = vote(&pid, alice, 0, 2, 5);
        let ballot_two = second.reencrypted_ballot.clone();
        let result = state.add_votes_batch(std::slice::from_ref(&second)).unwrap();

        // the new vote displaced the first ballot
        assert_eq!(result.overwritten_votes_count, 1);
        assert!(result.votes[0].overwrote);
        assert_eq!(result.votes[0].overwritten_ballot, ballot_one);

        assert_eq!(
            state.results_add().unwrap(),
            ballot_one.add(&ballot_two).unwrap()
        );
        assert_eq!(state.results_sub().unwrap(), ballot_one);
        assert!(state.contains_vote_id(first.vote_id).unwrap());
        assert!(state.contains_vote_id(second.vote_id).unwrap());
    });
}

#[test]
fn witness_stream_has_the_fixed_shape() {
    with_tmp_db(|db| {
        let pid = process();
        let mut state = initialized_state(db);

        let votes = vec![vote(&pid, voter(1), 0, 1, 1), vote(&pid, voter(2), 1, 1, 2)];
        let result = state.add_votes_batch(&votes).unwrap();

        // four process-leaf inclusions at the pre-batch root
        assert_eq!(result.process_witnesses.len(), 4);
        let expected_keys = [0u64, 1, 2, 3];
        for (witness, key) in result.process_witnesses.iter().zip(expected_keys) {
            assert_eq!(witness.fnc(), FNC_NOP);
            assert_eq!(witness.old_root, result.root_before);
            assert_eq!(witness.new_root, result.root_before);
            assert_eq!(witness.old_key, Fe::from(key));
            assert!(!witness.siblings.is_empty());
        }

        // a ballot/vote-id pair per slot, noop-padded
        assert_eq!(result.vote_witnesses.len(), 2 * VOTES_PER_BATCH);
        for pair in 0..2 {
            let ballot_witness = &result.vote_witnesses[2 * pair];
            let vote_id_witness = &result.vote_witnesses[2 * pair + 1];

            assert_eq!(ballot_witness.fnc(), FNC_INSERT);
            assert!(ballot_witness.is_old0);
            assert_eq!(ballot_witness.new_key, Fe::from(result.votes[pair].ballot_key));

            assert_eq!(vote_id_witness.fnc(), FNC_INSERT);
            assert_eq!(
                vote_id_witness.new_key,
                Fe::from(result.votes[pair].vote.vote_id)
            );
            // vote-id leaves carry the zero sentinel
            assert_eq!(vote_id_witness.new_value, Fe::zero());
        }
        for witness in &result.vote_witnesses[4..] {
            assert!(witness.is_noop());
        }

        // the roots chain through the whole stream
        assert_eq!(result.vote_witnesses[0].old_root, result.root_before);
        for window in result.vote_witnesses.windows(2) {
            assert_eq!(window[0].new_root, window[1].old_root);
        }
        assert_eq!(
            result.results_add_witness.old_root,
            result.vote_witnesses.last().unwrap().new_root
        );
        assert_eq!(
            result.results_sub_witness.old_root,
            result.results_add_witness.new_root
        );
        assert_eq!(result.results_sub_witness.new_root, result.root_after);

        // accumulator updates are in-place
        assert_eq!(result.results_add_witness.fnc(), FNC_UPDATE);
        assert_eq!(result.results_sub_witness.fnc(), FNC_UPDATE);
        assert_eq!(state.root().unwrap().unwrap(), result.root_after);
    });
}

#[test]
fn failed_batches_leave_no_trace() {
    with_tmp_db(|db| {
        let pid = process();
        let mut state = initialized_state(db);
        let root_before = state.root().unwrap().unwrap();

        // too many votes
        state.start_batch().unwrap();
        for i in 0..VOTES_PER_BATCH {
            state
                .add_vote(vote(&pid, voter(i as u8 + 1), i as u64, 1, i as u64 + 1))
                .unwrap();
        }
        let overflow = state.add_vote(vote(&pid, voter(99), 99, 1, 99));
        assert!(matches!(overflow, Err(Error::BatchFull(_))));
        state.abort_batch();
        assert_eq!(state.root().unwrap().unwrap(), root_before);

        // duplicate vote id aborts the composite call
        let duplicated = vote(&pid, voter(1), 0, 1, 1);
        let err = state
            .add_votes_batch(&[duplicated.clone(), duplicated.clone()])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateVoteId(_)));
        assert_eq!(state.root().unwrap().unwrap(), root_before);
        assert!(!state.contains_vote_id(duplicated.vote_id).unwrap());

        // votes outside a batch are rejected
        assert!(matches!(
            state.add_vote(vote(&pid, voter(1), 0, 1, 1)),
            Err(Error::NoBatchOpen)
        ));
    });
}

#[test]
fn batches_serialize_per_process() {
    with_tmp_db(|db| {
        let pid = process();
        let mut state = initialized_state(db);

        state.start_batch().unwrap();
        assert!(matches!(state.start_batch(), Err(Error::BatchOpen)));

        state.add_vote(vote(&pid, voter(1), 0, 1, 1)).unwrap();
        let result = state.end_batch().unwrap();
        assert_eq!(result.voters_count, 1);

        // a follow-up batch starts from the committed root
        state.start_batch().unwrap();
        state.add_vote(vote(&pid, voter(2), 1, 1, 2)).unwrap();
        let next = state.end_batch().unwrap();
        assert_eq!(next.root_before, result.root_after);
    });
}

#[test]
fn ballot_leaf_is_readable_after_commit() {
    with_tmp_db(|db| {
        let pid = process();
        let mut state = initialized_state(db);

        let cast = vote(&pid, voter(3), 2, 4, 9);
        let result = state.add_votes_batch(std::slice::from_ref(&cast)).unwrap();

        let stored = state
            .ballot_by_index(result.votes[0].ballot_key)
            .unwrap()
            .unwrap();
        assert_eq!(stored, cast.reencrypted_ballot);
    });
}
