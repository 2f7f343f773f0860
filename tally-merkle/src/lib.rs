//! Lean incremental Merkle tree.
//!
//! Leaves are appended in insertion order and hashed pair-wise with
//! Poseidon. A node without a right sibling is promoted to its parent
//! unchanged, so the tree never pads with zeros: the root of a single-leaf
//! tree is the leaf itself. This is the construction census contracts and
//! the state-transition circuit recompute, which makes roots portable
//! across implementations.

use thiserror::Error;

pub mod store;
pub mod tree;

pub use store::{MemStore, NodeStore};
pub use tree::{verify_proof, LeanTree, MerkleProof};

#[derive(Error, Debug)]
pub enum Error {
    #[error("tree is empty")]
    Empty,

    #[error("leaf index {0} out of bounds (size {1})")]
    IndexOutOfBounds(u64, u64),

    #[error("missing node at level {0}, index {1}")]
    MissingNode(u32, u64),

    #[error("node store error: {0}")]
    Store(String),

    #[error(transparent)]
    Crypto(#[from] tally_crypto::Error),
}

impl Error {
    pub fn store(error: impl ToString) -> Self {
        Self::Store(error.to_string())
    }
}
