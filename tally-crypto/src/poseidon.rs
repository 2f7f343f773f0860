use ark_bn254::Fr;
use once_cell::sync::Lazy;
use poseidon_ark::Poseidon;

use crate::{Error, Fe};

/// Widest Poseidon permutation the circom parameter set provides. Inputs
/// longer than this are folded by [`multi_hash`].
pub const MAX_HASH_WIDTH: usize = 16;

static POSEIDON: Lazy<Poseidon> = Lazy::new(Poseidon::new);

/// Poseidon hash of up to [`MAX_HASH_WIDTH`] field elements.
///
/// The output matches the iden3/circomlib implementation bit for bit, which
/// is what allows roots computed here to be re-derived inside a circuit.
pub fn hash(inputs: &[Fe]) -> Result<Fe, Error> {
    if inputs.is_empty() {
        return Err(Error::EmptyInput);
    }

    let inputs: Vec<Fr> = inputs.iter().map(Fe::to_fr).collect();

    POSEIDON.hash(inputs).map(Fe::from).map_err(Error::Poseidon)
}

/// Poseidon hash of arbitrarily many field elements.
///
/// Inputs are split into contiguous chunks of [`MAX_HASH_WIDTH`] (the last
/// chunk possibly short), each chunk is hashed, and the chunk digests are
/// hashed once more. Short inputs collapse to a single [`hash`] call.
pub fn multi_hash(inputs: &[Fe]) -> Result<Fe, Error> {
    if inputs.len() <= MAX_HASH_WIDTH {
        return hash(inputs);
    }

    let digests: Vec<Fe> = inputs
        .chunks(MAX_HASH_WIDTH)
        .map(hash)
        .collect::<Result<_, _>>()?;

    multi_hash(&digests)
}

#[cfg(test)]
mod tests {
    use super::*;

    // multi_hash of the 32 zero-ballot coordinates (0,1,0,1)×8, and the
    // reserved results leaves built from it.
    const ZERO_BALLOT_HASH: &str =
        "2c66ee3d8ff0f86c2251e885d4c207e5162c05d0b458c773106cd5579c58bf36";
    const LEAF_RESULTS_ADD: &str =
        "1f72c52b6e5dedca4f99ecfa24f2776732431e8d544e14c6f78f5042727c4657";
    const LEAF_RESULTS_SUB: &str =
        "2b853c511fba705a6030f80ce83d6ee8cbf4a1273724368728c11682eae4c51a";

    fn zero_ballot_fields() -> Vec<Fe> {
        let mut out = Vec::with_capacity(32);
        for _ in 0..8 {
            out.extend([Fe::zero(), Fe::one(), Fe::zero(), Fe::one()]);
        }
        out
    }

    #[test]
    fn empty_input_fails() {
        assert!(matches!(hash(&[]), Err(Error::EmptyInput)));
        assert!(matches!(multi_hash(&[]), Err(Error::EmptyInput)));
    }

    #[test]
    fn zero_ballot_golden() {
        let digest = multi_hash(&zero_ballot_fields()).unwrap();
        assert_eq!(digest.to_hex(), ZERO_BALLOT_HASH);
    }

    #[test]
    fn results_leaves_golden() {
        let zb = multi_hash(&zero_ballot_fields()).unwrap();

        let add = hash(&[Fe::from(4), zb, Fe::one()]).unwrap();
        assert_eq!(add.to_hex(), LEAF_RESULTS_ADD);

        let sub = hash(&[Fe::from(5), zb, Fe::one()]).unwrap();
        assert_eq!(sub.to_hex(), LEAF_RESULTS_SUB);
    }

    #[test]
    fn chunking_matches_manual_fold() {
        let inputs: Vec<Fe> = (1..=20u64).map(Fe::from).collect();

        let first = hash(&inputs[..16]).unwrap();
        let second = hash(&inputs[16..]).unwrap();
        let expected = hash(&[first, second]).unwrap();

        assert_eq!(multi_hash(&inputs).unwrap(), expected);
    }

    #[test]
    fn short_input_is_plain_hash() {
        let inputs: Vec<Fe> = (1..=16u64).map(Fe::from).collect();
        assert_eq!(multi_hash(&inputs).unwrap(), hash(&inputs).unwrap());
    }
}
