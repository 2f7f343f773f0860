use serde::{Deserialize, Serialize};
use tally_crypto::Fe;
use tally_primitives::{Ballot, COORDS_PER_BALLOT};

use crate::{
    Error, BLOB_SIZE, BYTES_PER_FIELD_ELEMENT, CELLS_PER_VOTE, FIELD_ELEMENTS_PER_BLOB,
    MAX_VOTES_PER_BLOB, RESULTS_CELLS,
};

/// One fixed-size blob, 4096 × 32 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob(Box<[u8; BLOB_SIZE]>);

impl Blob {
    fn zeroed() -> Self {
        Self(vec![0u8; BLOB_SIZE].into_boxed_slice().try_into().unwrap())
    }

    pub fn as_bytes(&self) -> &[u8; BLOB_SIZE] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != BLOB_SIZE {
            return Err(Error::BadLength(bytes.len()));
        }

        let mut blob = Self::zeroed();
        blob.0.copy_from_slice(bytes);
        Ok(blob)
    }

    fn write_cell(&mut self, cell: usize, value: &Fe) {
        let offset = cell * BYTES_PER_FIELD_ELEMENT;
        self.0[offset..offset + BYTES_PER_FIELD_ELEMENT].copy_from_slice(&value.to_bytes_be());
    }

    fn read_cell(&self, cell: usize) -> Result<Fe, Error> {
        let offset = cell * BYTES_PER_FIELD_ELEMENT;
        Ok(Fe::from_bytes_be(
            &self.0[offset..offset + BYTES_PER_FIELD_ELEMENT],
        )?)
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob").finish_non_exhaustive()
    }
}

/// One vote as laid out in the blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobVote {
    pub vote_id: Fe,
    pub address: Fe,
    pub ballot: Ballot,
}

/// The blob-visible content of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobBatch {
    pub results_add: Ballot,
    pub results_sub: Ballot,
    pub votes: Vec<BlobVote>,
}

/// Pack a batch into its canonical blob.
pub fn encode(batch: &BlobBatch) -> Result<Blob, Error> {
    if batch.votes.len() > MAX_VOTES_PER_BLOB {
        return Err(Error::BlobOverflow(batch.votes.len()));
    }

    let mut blob = Blob::zeroed();
    let mut cell = 0;

    for coord in batch.results_add.coords() {
        blob.write_cell(cell, &coord);
        cell += 1;
    }
    for coord in batch.results_sub.coords() {
        blob.write_cell(cell, &coord);
        cell += 1;
    }

    for vote in &batch.votes {
        if vote.vote_id.is_zero() {
            return Err(Error::InvalidInput(
                "zero vote id collides with the sentinel".into(),
            ));
        }

        blob.write_cell(cell, &vote.vote_id);
        blob.write_cell(cell + 1, &vote.address);

        for (offset, coord) in vote.ballot.coords().iter().enumerate() {
            blob.write_cell(cell + 2 + offset, coord);
        }

        cell += CELLS_PER_VOTE;
    }

    // the zero sentinel and the tail are already zero-filled
    Ok(blob)
}

/// Strict inverse of [`encode`]: stops at the zero vote-id sentinel,
/// rejects truncated records and non-canonical cells.
pub fn decode(blob: &Blob) -> Result<BlobBatch, Error> {
    let read_ballot = |start: usize| -> Result<Ballot, Error> {
        let coords = (start..start + COORDS_PER_BALLOT)
            .map(|cell| blob.read_cell(cell))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ballot::from_coords(&coords)?)
    };

    let results_add = read_ballot(0)?;
    let results_sub = read_ballot(COORDS_PER_BALLOT)?;

    let mut votes = Vec::new();
    let mut cell = RESULTS_CELLS;

    loop {
        if cell >= FIELD_ELEMENTS_PER_BLOB {
            // ran off the end without a sentinel
            return Err(Error::IncompleteVote(cell));
        }

        let vote_id = blob.read_cell(cell)?;
        if vote_id.is_zero() {
            break;
        }

        if cell + CELLS_PER_VOTE > FIELD_ELEMENTS_PER_BLOB {
            return Err(Error::IncompleteVote(cell));
        }

        let address = blob.read_cell(cell + 1)?;
        let ballot = read_ballot(cell + 2)?;

        votes.push(BlobVote {
            vote_id,
            address,
            ballot,
        });
        cell += CELLS_PER_VOTE;
    }

    Ok(BlobBatch {
        results_add,
        results_sub,
        votes,
    })
}
