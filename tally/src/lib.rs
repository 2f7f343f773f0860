//! Rust-native building blocks for a decentralized, privacy-preserving
//! voting sequencer.
//!
//! Tally is a collection of modules implementing the core of a voting
//! sequencer node: a content-addressed census store with pluggable
//! importers, a per-process Poseidon-Merkle state engine with a batched
//! vote protocol, and the deterministic blob layout that commits each
//! batch on chain. This crate provides no application of its own; it is
//! the base layer for sequencer daemons, provers and explorers.

#[doc(inline)]
pub use tally_crypto as crypto;

#[doc(inline)]
pub use tally_primitives as primitives;

#[doc(inline)]
pub use tally_merkle as merkle;

#[doc(inline)]
pub use tally_storage as storage;

#[doc(inline)]
pub use tally_census as census;

#[doc(inline)]
pub use tally_state as state;

#[doc(inline)]
pub use tally_blob as blob;
