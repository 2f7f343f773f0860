use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tally_crypto::Fe;
use tally_primitives::{Address, CensusOrigin};

use crate::{store::CensusStore, Context, Error};

pub mod graphql;
pub mod json;

pub use graphql::GraphqlImporter;
pub use json::JsonImporter;

/// A census to materialize: where it claims to live (`uri`), what its
/// content address should be (`root`) and which contract it mirrors, if
/// any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CensusDescriptor {
    pub origin: CensusOrigin,
    #[serde(with = "hex_bytes")]
    pub root: [u8; 32],
    pub uri: String,
    #[serde(default)]
    pub contract_address: Option<Address>,
}

impl CensusDescriptor {
    /// The declared root as a field element; fails when the bytes are not
    /// canonical (as happens when the slot carries a padded address).
    pub fn expected_root(&self) -> Result<Fe, Error> {
        Ok(Fe::from_bytes_be(&self.root)?)
    }
}

/// Ingestion plugin. The orchestrator walks its plugin list in order and
/// dispatches to the first importer whose `accepts` matches the census
/// URI.
pub trait CensusImporter: Send + Sync {
    fn accepts(&self, uri: &str) -> bool;

    /// Import `census` into `store`. `processed` is how many upstream
    /// records earlier runs already consumed (used by paginated sources);
    /// the new processed count is returned.
    fn import(
        &self,
        ctx: &Context,
        store: &CensusStore,
        census: &CensusDescriptor,
        processed: u64,
    ) -> Result<u64, Error>;
}

/// One census membership entry as carried by snapshot formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub address: Address,
    #[serde(with = "decimal")]
    pub weight: BigUint,
    pub index: u64,
}

/// A full census snapshot: declared root plus participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CensusDump {
    pub root: Fe,
    pub participants: Vec<Participant>,
}

/// A weight mutation observed on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightChange {
    pub address: Address,
    pub previous_weight: BigUint,
    pub new_weight: BigUint,
}

pub(crate) fn parse_biguint(s: &str) -> Result<BigUint, Error> {
    BigUint::parse_bytes(s.as_bytes(), 10)
        .ok_or_else(|| Error::invalid_input(format!("bad integer: {s}")))
}

/// Serde helpers for big weights: decimal strings on the wire, plain
/// numbers tolerated on input.
mod decimal {
    use std::fmt;

    use num_bigint::BigUint;

    pub fn serialize<S>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BigUint, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct WeightVisitor;

        impl serde::de::Visitor<'_> for WeightVisitor {
            type Value = BigUint;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal string or unsigned number")
            }

            fn visit_str<E>(self, v: &str) -> Result<BigUint, E>
            where
                E: serde::de::Error,
            {
                BigUint::parse_bytes(v.as_bytes(), 10)
                    .ok_or_else(|| E::custom(format!("bad weight: {v}")))
            }

            fn visit_u64<E>(self, v: u64) -> Result<BigUint, E>
            where
                E: serde::de::Error,
            {
                Ok(BigUint::from(v))
            }
        }

        deserializer.deserialize_any(WeightVisitor)
    }
}

mod hex_bytes {
    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::Deserialize;

        let s = String::deserialize(deserializer)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)
            .map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}
