use std::{fmt, str::FromStr};

use num_bigint::BigUint;
use sha3::{Digest, Keccak256};
use tally_crypto::{to_field, Fe};

use crate::{Address, Error};

/// A 31-byte process identifier: `address(20) ‖ version(4) ‖ nonce(7 BE)`.
///
/// The version tag binds the id to a chain: it is the last four bytes of
/// `keccak256(chain_id_be32 ‖ address)`. The big-endian integer view of the
/// 31 bytes is the canonical database key prefix and, reduced into the
/// field, the value of the process-id state leaf.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId {
    address: Address,
    version: [u8; 4],
    nonce: u64,
}

impl ProcessId {
    pub const BYTES: usize = 31;

    /// Derive a process id for `nonce` of `address` on `chain_id`.
    pub fn new(chain_id: u32, address: Address, nonce: u64) -> Result<Self, Error> {
        let id = Self {
            address,
            version: Self::version_tag(chain_id, &address),
            nonce,
        };
        id.check()?;
        Ok(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != Self::BYTES {
            return Err(Error::InvalidProcessId(hex::encode(bytes)));
        }

        let address = Address::try_from(&bytes[..20])?;
        let version: [u8; 4] = bytes[20..24].try_into().expect("4-byte slice");

        let mut nonce_be = [0u8; 8];
        nonce_be[1..].copy_from_slice(&bytes[24..31]);
        let nonce = u64::from_be_bytes(nonce_be);

        let id = Self {
            address,
            version,
            nonce,
        };
        id.check()?;
        Ok(id)
    }

    fn version_tag(chain_id: u32, address: &Address) -> [u8; 4] {
        let mut hasher = Keccak256::new();
        hasher.update(chain_id.to_be_bytes());
        hasher.update(address.as_bytes());
        let digest = hasher.finalize();

        digest[28..32].try_into().expect("4-byte slice")
    }

    fn check(&self) -> Result<(), Error> {
        if self.address.is_zero() {
            return Err(Error::InvalidProcessId("zero address".into()));
        }
        if self.version == [0u8; 4] {
            return Err(Error::InvalidProcessId("zero version".into()));
        }
        Ok(())
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn version(&self) -> &[u8; 4] {
        &self.version
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn to_bytes(&self) -> [u8; Self::BYTES] {
        let mut out = [0u8; Self::BYTES];
        out[..20].copy_from_slice(self.address.as_bytes());
        out[20..24].copy_from_slice(&self.version);
        out[24..31].copy_from_slice(&self.nonce.to_be_bytes()[1..]);
        out
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.to_bytes())
    }

    /// The id reduced into the scalar field. 248 bits always fit.
    pub fn to_fe(&self) -> Fe {
        to_field(&self.to_biguint())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessId")
            .field("address", &self.address)
            .field("version", &hex::encode(self.version))
            .field("nonce", &self.nonce)
            .finish()
    }
}

impl FromStr for ProcessId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| Error::InvalidProcessId(s.to_owned()))?;
        Self::from_bytes(&bytes)
    }
}

impl serde::Serialize for ProcessId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ProcessId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
