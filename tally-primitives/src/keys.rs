use tally_crypto::{poseidon, truncate_low, Fe};

use crate::{Address, Error, ProcessId};

/// The unified 64-bit address space of the per-process state tree.
///
/// Low keys are reserved configuration slots, the middle range holds ballot
/// leaves, and every key with the top bit set is a vote-id leaf, so the two
/// dynamic key families can never collide.
pub type StateKey = u64;

pub const KEY_PROCESS_ID: StateKey = 0x00;
pub const KEY_CENSUS_ORIGIN: StateKey = 0x01;
pub const KEY_BALLOT_MODE: StateKey = 0x02;
pub const KEY_ENCRYPTION_KEY: StateKey = 0x03;
pub const KEY_RESULTS_ADD: StateKey = 0x04;
pub const KEY_RESULTS_SUB: StateKey = 0x05;

pub const CONFIG_MIN: StateKey = 0;
pub const CONFIG_MAX: StateKey = 15;
pub const BALLOT_MIN: StateKey = 16;
pub const BALLOT_MAX: StateKey = (1 << 63) - 1;
pub const VOTE_ID_MIN: StateKey = 1 << 63;
pub const VOTE_ID_MAX: StateKey = u64::MAX;

pub const VOTE_ID_HASH_BITS: u32 = 63;
pub const CENSUS_ADDRESS_BIT_LEN: u32 = 16;
pub const CENSUS_INDEX_MAX: u64 = (BALLOT_MAX >> CENSUS_ADDRESS_BIT_LEN) - CONFIG_MAX;

/// State key of the ballot leaf for a voter, mixing the census leaf index
/// with the low bits of the address:
/// `BALLOT_MIN + census_index · 2^16 + (address mod 2^16)`.
pub fn ballot_index(census_index: u64, address: &Address) -> Result<StateKey, Error> {
    if census_index > CENSUS_INDEX_MAX {
        return Err(Error::CensusIndexRange(census_index));
    }

    Ok(BALLOT_MIN + (census_index << CENSUS_ADDRESS_BIT_LEN) + address.low_u16() as u64)
}

/// State key of the vote-id leaf:
/// `VOTE_ID_MIN + (H(process_id, address, k) mod 2^63)` where `k` is
/// voter-supplied randomness.
pub fn vote_id(process_id: &ProcessId, address: &Address, k: &Fe) -> Result<StateKey, Error> {
    let digest = poseidon::hash(&[process_id.to_fe(), address.to_fe(), *k])?;
    let low = truncate_low(&digest, VOTE_ID_HASH_BITS);

    let low = u64::try_from(low.to_biguint()).expect("63-bit value fits u64");
    Ok(VOTE_ID_MIN | low)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voter() -> Address {
        "0xB1F05B11Ba3d892EdD00f2e7689779E2B8841827".parse().unwrap()
    }

    #[test]
    fn ballot_index_stays_in_ballot_range() {
        for census_index in [0, 1, 1000, CENSUS_INDEX_MAX] {
            let key = ballot_index(census_index, &voter()).unwrap();
            assert!((BALLOT_MIN..=BALLOT_MAX).contains(&key));
        }
    }

    #[test]
    fn ballot_index_rejects_oversized_census_index() {
        assert!(ballot_index(CENSUS_INDEX_MAX + 1, &voter()).is_err());
    }

    #[test]
    fn vote_id_has_top_bit_set() {
        let pid = ProcessId::new(1, voter(), 7).unwrap();
        for k in 0..20u64 {
            let id = vote_id(&pid, &voter(), &Fe::from(k)).unwrap();
            assert!(id >= VOTE_ID_MIN);
        }
    }

    #[test]
    fn vote_id_differs_per_randomness() {
        let pid = ProcessId::new(1, voter(), 7).unwrap();
        let a = vote_id(&pid, &voter(), &Fe::from(1)).unwrap();
        let b = vote_id(&pid, &voter(), &Fe::from(2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn key_spaces_do_not_overlap() {
        assert!(CONFIG_MAX < BALLOT_MIN);
        assert!(BALLOT_MAX < VOTE_ID_MIN);
        assert_eq!(VOTE_ID_MIN, 1 << 63);
    }
}
