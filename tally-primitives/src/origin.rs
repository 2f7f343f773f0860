use tally_crypto::Fe;

use crate::Error;

/// Where a census comes from. The numeric tags are what gets persisted
/// and serialized, so they are fixed for the lifetime of a deployment;
/// unknown tags fail decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CensusOrigin {
    UnknownV0,
    MerkleTreeOffchainStaticV1,
    CspEddsaBabyJubJubV1,
    MerkleTreeOffchainDynamicV1,
    MerkleTreeOnchainDynamicV1,
}

impl CensusOrigin {
    pub fn tag(&self) -> u8 {
        match self {
            Self::UnknownV0 => 0,
            Self::MerkleTreeOffchainStaticV1 => 1,
            Self::CspEddsaBabyJubJubV1 => 2,
            Self::MerkleTreeOffchainDynamicV1 => 3,
            Self::MerkleTreeOnchainDynamicV1 => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, Error> {
        match tag {
            0 => Ok(Self::UnknownV0),
            1 => Ok(Self::MerkleTreeOffchainStaticV1),
            2 => Ok(Self::CspEddsaBabyJubJubV1),
            3 => Ok(Self::MerkleTreeOffchainDynamicV1),
            4 => Ok(Self::MerkleTreeOnchainDynamicV1),
            other => Err(Error::UnknownCensusOrigin(other)),
        }
    }

    /// Census is a Merkle tree the sequencer has to materialize.
    pub fn is_merkle_tree(&self) -> bool {
        matches!(
            self,
            Self::MerkleTreeOffchainStaticV1
                | Self::MerkleTreeOffchainDynamicV1
                | Self::MerkleTreeOnchainDynamicV1
        )
    }

    /// Credentials are issued by an external credential service provider;
    /// there is nothing to import.
    pub fn is_csp(&self) -> bool {
        matches!(self, Self::CspEddsaBabyJubJubV1)
    }

    pub fn is_onchain_dynamic(&self) -> bool {
        matches!(self, Self::MerkleTreeOnchainDynamicV1)
    }

    pub fn to_fe(&self) -> Fe {
        Fe::from(self.tag() as u64)
    }
}

impl serde::Serialize for CensusOrigin {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.tag())
    }
}

impl<'de> serde::Deserialize<'de> for CensusOrigin {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tag = u8::deserialize(deserializer)?;
        Self::from_tag(tag).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for tag in 0..=4 {
            assert_eq!(CensusOrigin::from_tag(tag).unwrap().tag(), tag);
        }
    }

    #[test]
    fn unknown_tag_fails() {
        assert!(matches!(
            CensusOrigin::from_tag(9),
            Err(Error::UnknownCensusOrigin(9))
        ));
    }

    #[test]
    fn serde_uses_numeric_tags() {
        let json = serde_json::to_string(&CensusOrigin::MerkleTreeOnchainDynamicV1).unwrap();
        assert_eq!(json, "4");

        let back: CensusOrigin = serde_json::from_str("2").unwrap();
        assert_eq!(back, CensusOrigin::CspEddsaBabyJubJubV1);

        assert!(serde_json::from_str::<CensusOrigin>("9").is_err());
    }

    #[test]
    fn classification() {
        assert!(CensusOrigin::MerkleTreeOnchainDynamicV1.is_merkle_tree());
        assert!(CensusOrigin::MerkleTreeOnchainDynamicV1.is_onchain_dynamic());
        assert!(CensusOrigin::CspEddsaBabyJubJubV1.is_csp());
        assert!(!CensusOrigin::CspEddsaBabyJubJubV1.is_merkle_tree());
    }
}
