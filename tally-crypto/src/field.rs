use std::{fmt, str::FromStr};

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use minicbor::{Decode, Encode};
use num_bigint::BigUint;
use once_cell::sync::Lazy;

use crate::Error;

/// An element of the BN254 scalar field.
///
/// The canonical wire form is 32 big-endian bytes; the canonical text form
/// is the decimal string, which is also how the value serializes to JSON
/// and CBOR.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fe(Fr);

static MODULUS: Lazy<BigUint> = Lazy::new(|| {
    BigUint::from_bytes_be(&Fr::MODULUS.to_bytes_be())
});

/// The field modulus `r` as a big integer.
pub fn modulus() -> &'static BigUint {
    &MODULUS
}

/// Reduce an arbitrary non-negative integer into the field. `r` maps to 0.
pub fn to_field(value: &BigUint) -> Fe {
    Fe(Fr::from(value.clone()))
}

/// Keep only the lowest `bits` bits of `value`.
pub fn truncate_low(value: &Fe, bits: u32) -> Fe {
    let mask = (BigUint::from(1u8) << bits) - 1u8;
    to_field(&(value.to_biguint() & mask))
}

impl Fe {
    pub const BYTES: usize = 32;

    pub fn zero() -> Self {
        Self(Fr::from(0u64))
    }

    pub fn one() -> Self {
        Self(Fr::from(1u64))
    }

    /// Parse a canonical big-endian byte string. Values of any length up to
    /// 32 bytes are accepted; values ≥ `r` are rejected.
    pub fn from_bytes_be(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() > Self::BYTES {
            return Err(Error::not_in_field(hex::encode(bytes)));
        }

        let value = BigUint::from_bytes_be(bytes);
        if &value >= modulus() {
            return Err(Error::not_in_field(&value));
        }

        Ok(to_field(&value))
    }

    /// Interpret arbitrary big-endian bytes as an integer and reduce it
    /// into the field.
    pub fn from_bytes_be_mod(bytes: &[u8]) -> Self {
        to_field(&BigUint::from_bytes_be(bytes))
    }

    pub fn from_dec_str(s: &str) -> Result<Self, Error> {
        let value = BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| Error::InvalidDecimal(s.to_owned()))?;

        if &value >= modulus() {
            return Err(Error::not_in_field(&value));
        }

        Ok(to_field(&value))
    }

    pub fn from_hex_str(s: &str) -> Result<Self, Error> {
        let s = s.trim_start_matches("0x");
        let padded = if s.len() % 2 == 1 {
            format!("0{s}")
        } else {
            s.to_owned()
        };

        let bytes = hex::decode(padded).map_err(|_| Error::InvalidHex(s.to_owned()))?;
        Self::from_bytes_be(&bytes)
    }

    pub fn to_bytes_be(&self) -> [u8; Self::BYTES] {
        let bytes = self.0.into_bigint().to_bytes_be();
        let mut out = [0u8; Self::BYTES];
        out[Self::BYTES - bytes.len()..].copy_from_slice(&bytes);
        out
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0.into_bigint().to_bytes_be())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes_be())
    }

    pub fn to_fr(&self) -> Fr {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Fr::from(0u64)
    }
}

impl From<Fr> for Fe {
    fn from(value: Fr) -> Self {
        Self(value)
    }
}

impl From<Fe> for Fr {
    fn from(value: Fe) -> Self {
        value.0
    }
}

impl From<u64> for Fe {
    fn from(value: u64) -> Self {
        Self(Fr::from(value))
    }
}

impl From<&BigUint> for Fe {
    fn from(value: &BigUint) -> Self {
        to_field(value)
    }
}

impl fmt::Display for Fe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_biguint())
    }
}

impl fmt::Debug for Fe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fe").field(&self.to_biguint()).finish()
    }
}

impl FromStr for Fe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(hex) = s.strip_prefix("0x") {
            Self::from_hex_str(hex)
        } else {
            Self::from_dec_str(s)
        }
    }
}

impl serde::Serialize for Fe {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Fe {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct FeVisitor;

        impl serde::de::Visitor<'_> for FeVisitor {
            type Value = Fe;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal or 0x-hex field element string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Fe, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Fe, E>
            where
                E: serde::de::Error,
            {
                Ok(Fe::from(v))
            }
        }

        deserializer.deserialize_any(FeVisitor)
    }
}

impl<C> Encode<C> for Fe {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.to_string())?;
        Ok(())
    }
}

impl<'a, C> Decode<'a, C> for Fe {
    fn decode(
        d: &mut minicbor::Decoder<'a>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        let s = d.str()?;
        s.parse()
            .map_err(|_| minicbor::decode::Error::message("invalid field element string"))
    }
}
