//! Field arithmetic and Poseidon hashing over the BN254 scalar field.
//!
//! Everything the sequencer commits to (census roots, state roots, ballot
//! hashes) lives in the BN254 scalar field and is hashed with the
//! circom-compatible Poseidon permutation, so that the same values can be
//! recomputed inside an arithmetic circuit.

use thiserror::Error;

pub mod field;
pub mod poseidon;

pub use field::{to_field, truncate_low, Fe};
pub use poseidon::{hash, multi_hash, MAX_HASH_WIDTH};

#[derive(Error, Debug)]
pub enum Error {
    #[error("poseidon input is empty")]
    EmptyInput,

    #[error("poseidon rejected input: {0}")]
    Poseidon(String),

    #[error("value is not a canonical field element: {0}")]
    NotInField(String),

    #[error("invalid decimal string: {0}")]
    InvalidDecimal(String),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),
}

impl Error {
    pub fn not_in_field(value: impl ToString) -> Self {
        Self::NotInField(value.to_string())
    }
}
