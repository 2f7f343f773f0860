//! Per-process voting state.
//!
//! Each process owns a Poseidon-Merkle tree holding its configuration
//! leaves, one ballot leaf per voter, one existence leaf per vote id and
//! two homomorphic running-sum accumulators. Votes are applied in bounded
//! batches; every batch runs inside one storage transaction and emits the
//! ordered transition witnesses the state-transition circuit consumes.

use thiserror::Error;

pub mod batch;
pub mod state;
pub mod witness;

pub use batch::{BatchResult, Vote, VOTES_PER_BATCH};
pub use state::State;
pub use witness::{StateTransition, FNC_DELETE, FNC_INSERT, FNC_NOP, FNC_UPDATE};

use tally_primitives::StateKey;

#[derive(Error, Debug)]
pub enum Error {
    #[error("state is already initialized")]
    AlreadyInitialized,

    #[error("state is not initialized")]
    NotInitialized,

    #[error("no batch is open")]
    NoBatchOpen,

    #[error("a batch is already open")]
    BatchOpen,

    #[error("batch is full ({0} votes)")]
    BatchFull(usize),

    #[error("vote id {0:#x} already recorded")]
    DuplicateVoteId(StateKey),

    #[error("state leaf {0:#x} not found")]
    LeafNotFound(StateKey),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Merkle(#[from] tally_merkle::Error),

    #[error(transparent)]
    Crypto(#[from] tally_crypto::Error),

    #[error(transparent)]
    Primitives(#[from] tally_primitives::Error),

    #[error(transparent)]
    Storage(#[from] tally_storage::Error),
}
