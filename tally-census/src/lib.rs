//! Census storage and ingestion.
//!
//! A census is an insertion-ordered Merkle tree of `(address, weight)`
//! leaves. The [`CensusStore`] keeps every census of a node in one shared
//! database, addressable three ways: by working uuid while under
//! construction, by root once published, or by the smart-contract address
//! it mirrors. Importers feed the store from off-chain snapshots and
//! indexed on-chain events; the [`Orchestrator`] picks the importer for a
//! census descriptor and resolves dynamic on-chain roots.

use thiserror::Error;

pub mod context;
pub mod import;
pub mod orchestrator;
pub mod store;
mod tables;
pub mod tree;

pub use context::Context;
pub use import::{
    CensusDescriptor, CensusDump, CensusImporter, GraphqlImporter, JsonImporter, Participant,
    WeightChange,
};
pub use orchestrator::{OnchainCensusFetcher, Orchestrator};
pub use store::{CensusKey, CensusStore};
pub use tree::{pack_census_leaf, verify_census_proof, CensusProof, CensusTree, MAX_WEIGHT_BITS};

#[derive(Error, Debug)]
pub enum Error {
    #[error("census not found")]
    NotFound,

    #[error("census already exists")]
    AlreadyExists,

    #[error("census root mismatch: expected {expected}, computed {computed}")]
    RootMismatch {
        expected: tally_crypto::Fe,
        computed: tally_crypto::Fe,
    },

    #[error("census is closed")]
    Closed,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no importer plugin found for {0}")]
    NoImporter(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Merkle(#[from] tally_merkle::Error),

    #[error(transparent)]
    Crypto(#[from] tally_crypto::Error),

    #[error(transparent)]
    Primitives(#[from] tally_primitives::Error),

    #[error(transparent)]
    Storage(#[from] tally_storage::Error),
}

impl Error {
    pub fn invalid_input(detail: impl ToString) -> Self {
        Self::InvalidInput(detail.to_string())
    }
}
