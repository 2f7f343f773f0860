//! Domain types shared across the tally sequencer: voter addresses,
//! process identifiers, ballot rules, encrypted ballots and the state-key
//! derivations that place them in the per-process tree.

use thiserror::Error;

pub mod address;
pub mod ballot;
pub mod keys;
pub mod origin;
pub mod process;

pub use address::Address;
pub use ballot::{
    ballot_inputs_hash, Ballot, BallotMode, CipherField, COORDS_PER_BALLOT, COORDS_PER_FIELD,
    FIELDS_PER_BALLOT,
};
pub use keys::{ballot_index, vote_id, StateKey};
pub use origin::CensusOrigin;
pub use process::ProcessId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid process id: {0}")]
    InvalidProcessId(String),

    #[error("invalid ballot mode: {0}")]
    InvalidBallotMode(String),

    #[error("unknown census origin tag: {0}")]
    UnknownCensusOrigin(u8),

    #[error("ballot has no fields")]
    EmptyBallot,

    #[error("ballot shape mismatch: {0} coordinates")]
    BallotShape(usize),

    #[error("point ({0}, {1}) is not on the curve")]
    CurvePoint(tally_crypto::Fe, tally_crypto::Fe),

    #[error("census index {0} out of range")]
    CensusIndexRange(u64),

    #[error(transparent)]
    Crypto(#[from] tally_crypto::Error),
}

impl Error {
    pub fn invalid_ballot_mode(detail: impl ToString) -> Self {
        Self::InvalidBallotMode(detail.to_string())
    }
}
