//! Blob packing for vote batches.
//!
//! A batch is committed on chain as one EIP-4844 blob: 4096 cells of 32
//! big-endian bytes, each a canonical BN254 scalar. The layout is fixed so
//! any observer rebuilds the identical blob from the same batch:
//! results-add (32 cells), results-sub (32 cells), then per-vote records
//! of vote id, address and the 32 reencrypted ballot coordinates, closed
//! by a zero vote-id sentinel. The KZG commitment itself is produced by an
//! external collaborator; this crate owns the byte layout and the choice
//! of evaluation point.

use thiserror::Error;

pub mod codec;
pub mod point;

pub use codec::{decode, encode, Blob, BlobBatch, BlobVote};
pub use point::evaluation_point;

use tally_primitives::COORDS_PER_BALLOT;

pub const FIELD_ELEMENTS_PER_BLOB: usize = 4096;
pub const BYTES_PER_FIELD_ELEMENT: usize = 32;
pub const BLOB_SIZE: usize = FIELD_ELEMENTS_PER_BLOB * BYTES_PER_FIELD_ELEMENT;

/// Cells reserved for the two running-sum accumulators.
pub const RESULTS_CELLS: usize = 2 * COORDS_PER_BALLOT;

/// Cells per vote record: vote id, address, ballot coordinates.
pub const CELLS_PER_VOTE: usize = 2 + COORDS_PER_BALLOT;

/// Votes a blob can carry next to the accumulators and the sentinel.
pub const MAX_VOTES_PER_BLOB: usize =
    (FIELD_ELEMENTS_PER_BLOB - RESULTS_CELLS - 1) / CELLS_PER_VOTE;

#[derive(Error, Debug)]
pub enum Error {
    #[error("batch of {0} votes exceeds blob capacity")]
    BlobOverflow(usize),

    #[error("truncated vote record at cell {0}")]
    IncompleteVote(usize),

    #[error("blob length {0} is invalid")]
    BadLength(usize),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Crypto(#[from] tally_crypto::Error),

    #[error(transparent)]
    Primitives(#[from] tally_primitives::Error),
}
