use std::{fmt, str::FromStr};

use num_bigint::BigUint;
use tally_crypto::{to_field, Fe};

use crate::Error;

/// A 20-byte EVM-style account address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const BYTES: usize = 20;

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// The address as a field element. 160 bits always fit.
    pub fn to_fe(&self) -> Fe {
        to_field(&self.to_biguint())
    }

    /// The address modulo 2^16, i.e. its last two bytes.
    pub fn low_u16(&self) -> u16 {
        u16::from_be_bytes([self.0[18], self.0[19]])
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Error> {
        let inner: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::InvalidAddress(hex::encode(bytes)))?;
        Ok(Self(inner))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.to_string()).finish()
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.trim_start_matches("0x");
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(stripped, &mut bytes)
            .map_err(|_| Error::InvalidAddress(s.to_owned()))?;
        Ok(Self(bytes))
    }
}

impl serde::Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let addr: Address = "0x11311A2D24a77b6722D7F149B1D9C07C9Bdea16c"
            .parse()
            .unwrap();
        assert_eq!(addr.to_string(), "0x11311a2d24a77b6722d7f149b1d9c07c9bdea16c");

        let bare: Address = "11311a2d24a77b6722d7f149b1d9c07c9bdea16c".parse().unwrap();
        assert_eq!(bare, addr);
    }

    #[test]
    fn low_u16_is_last_two_bytes() {
        let addr: Address = "0x11311A2D24a77b6722D7F149B1D9C07C9Bdea16c"
            .parse()
            .unwrap();
        assert_eq!(addr.low_u16(), 0xa16c);
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("zz".repeat(20).parse::<Address>().is_err());
    }
}
