use tally_crypto::{multi_hash, truncate_low, Fe};
use tally_primitives::ProcessId;

use crate::Error;

/// Bits the downstream proving field can absorb.
const EVALUATION_POINT_BITS: u32 = 250;

/// KZG commitments are 48-byte G1 points, split into two sub-field cells
/// for hashing.
pub const COMMITMENT_BYTES: usize = 48;

/// Derive the evaluation point `z` for a blob's KZG opening.
///
/// `z` binds the opening to the process, the pre-batch state root and the
/// blob commitment, and is truncated to 250 bits so the same value fits
/// the proving field. Equal inputs always derive the equal point, which is
/// what makes the opened value reproducible by observers.
pub fn evaluation_point(
    process_id: &ProcessId,
    root_before: &Fe,
    commitment: &[u8; COMMITMENT_BYTES],
) -> Result<Fe, Error> {
    let low = Fe::from_bytes_be(&commitment[..COMMITMENT_BYTES / 2])?;
    let high = Fe::from_bytes_be(&commitment[COMMITMENT_BYTES / 2..])?;

    let digest = multi_hash(&[process_id.to_fe(), *root_before, low, high])?;
    Ok(truncate_low(&digest, EVALUATION_POINT_BITS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_primitives::Address;

    fn process() -> ProcessId {
        let mut bytes = [0u8; 20];
        bytes[19] = 0x42;
        ProcessId::new(1, Address::new(bytes), 3).unwrap()
    }

    #[test]
    fn point_is_deterministic_and_bounded() {
        let commitment = [7u8; COMMITMENT_BYTES];
        let a = evaluation_point(&process(), &Fe::from(11), &commitment).unwrap();
        let b = evaluation_point(&process(), &Fe::from(11), &commitment).unwrap();

        assert_eq!(a, b);
        assert!(a.to_biguint().bits() <= 250);
    }

    #[test]
    fn point_binds_every_input() {
        let commitment = [7u8; COMMITMENT_BYTES];
        let base = evaluation_point(&process(), &Fe::from(11), &commitment).unwrap();

        let other_root = evaluation_point(&process(), &Fe::from(12), &commitment).unwrap();
        assert_ne!(base, other_root);

        let mut other_commitment = commitment;
        other_commitment[0] ^= 1;
        let other = evaluation_point(&process(), &Fe::from(11), &other_commitment).unwrap();
        assert_ne!(base, other);
    }
}
