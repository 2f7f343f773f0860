use std::fmt;

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bn254::{EdwardsAffine, Fq};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tally_crypto::{multi_hash, poseidon, to_field, Fe};

use crate::{Address, Error, ProcessId, StateKey};

/// Number of vote fields a ballot carries.
pub const FIELDS_PER_BALLOT: usize = 8;

/// Coordinates per encrypted field: two curve points, two coordinates each.
pub const COORDS_PER_FIELD: usize = 4;

/// Flat coordinate count of a full ballot.
pub const COORDS_PER_BALLOT: usize = FIELDS_PER_BALLOT * COORDS_PER_FIELD;

const MAX_VALUE_BITS: u32 = 48;
const SUM_BITS: u32 = 63;

/// Voter-rule configuration, packed into a single field element for
/// commitment purposes.
///
/// The packed layout concatenates the fields LSB first:
///
/// | offset | width | field |
/// |---|---|---|
/// | 0 | 8 | numFields |
/// | 8 | 8 | groupSize |
/// | 16 | 1 | uniqueValues |
/// | 17 | 1 | costFromWeight |
/// | 18 | 8 | costExponent |
/// | 26 | 48 | maxValue |
/// | 74 | 48 | minValue |
/// | 122 | 63 | maxValueSum |
/// | 185 | 63 | minValueSum |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotMode {
    pub num_fields: u8,
    pub group_size: u8,
    pub unique_values: bool,
    pub cost_from_weight: bool,
    pub cost_exponent: u8,
    pub max_value: u64,
    pub min_value: u64,
    pub max_value_sum: u64,
    pub min_value_sum: u64,
}

impl BallotMode {
    /// Pack into the canonical single-field-element form.
    pub fn pack(&self) -> Result<Fe, Error> {
        if self.group_size > self.num_fields {
            return Err(Error::invalid_ballot_mode(format!(
                "group size {} exceeds field count {}",
                self.group_size, self.num_fields
            )));
        }
        if self.max_value >> MAX_VALUE_BITS != 0 || self.min_value >> MAX_VALUE_BITS != 0 {
            return Err(Error::invalid_ballot_mode("value bound exceeds 48 bits"));
        }
        if self.max_value_sum >> SUM_BITS != 0 || self.min_value_sum >> SUM_BITS != 0 {
            return Err(Error::invalid_ballot_mode("sum bound exceeds 63 bits"));
        }

        let mut packed = BigUint::default();
        packed |= BigUint::from(self.num_fields);
        packed |= BigUint::from(self.group_size) << 8;
        packed |= BigUint::from(self.unique_values as u8) << 16;
        packed |= BigUint::from(self.cost_from_weight as u8) << 17;
        packed |= BigUint::from(self.cost_exponent) << 18;
        packed |= BigUint::from(self.max_value) << 26;
        packed |= BigUint::from(self.min_value) << 74;
        packed |= BigUint::from(self.max_value_sum) << 122;
        packed |= BigUint::from(self.min_value_sum) << 185;

        Ok(to_field(&packed))
    }

    /// Inverse of [`pack`](Self::pack).
    pub fn unpack(packed: &Fe) -> Result<Self, Error> {
        let value = packed.to_biguint();
        if value.bits() > 248 {
            return Err(Error::invalid_ballot_mode("packed value exceeds 248 bits"));
        }

        let take = |offset: u32, width: u32| -> u64 {
            let mask = (BigUint::from(1u8) << width) - 1u8;
            let chunk = (&value >> offset) & mask;
            // widths are at most 63 bits
            u64::try_from(chunk).expect("masked chunk fits u64")
        };

        Ok(Self {
            num_fields: take(0, 8) as u8,
            group_size: take(8, 8) as u8,
            unique_values: take(16, 1) == 1,
            cost_from_weight: take(17, 1) == 1,
            cost_exponent: take(18, 8) as u8,
            max_value: take(26, MAX_VALUE_BITS),
            min_value: take(74, MAX_VALUE_BITS),
            max_value_sum: take(122, SUM_BITS),
            min_value_sum: take(185, SUM_BITS),
        })
    }

    /// Logical bound checks beyond what packing enforces.
    pub fn validate(&self) -> Result<(), Error> {
        if self.num_fields as usize > FIELDS_PER_BALLOT {
            return Err(Error::invalid_ballot_mode(format!(
                "{} fields, at most {FIELDS_PER_BALLOT} supported",
                self.num_fields
            )));
        }
        if self.group_size > self.num_fields {
            return Err(Error::invalid_ballot_mode("group size exceeds field count"));
        }
        if self.min_value > self.max_value {
            return Err(Error::invalid_ballot_mode("min value above max value"));
        }
        if self.min_value_sum > self.max_value_sum {
            return Err(Error::invalid_ballot_mode("min sum above max sum"));
        }
        Ok(())
    }
}

impl fmt::Display for BallotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// One encrypted vote field: an ElGamal ciphertext as two curve points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherField {
    pub c1: (Fe, Fe),
    pub c2: (Fe, Fe),
}

impl CipherField {
    /// The ciphertext encrypting nothing: both points are the identity.
    pub fn identity() -> Self {
        Self {
            c1: (Fe::zero(), Fe::one()),
            c2: (Fe::zero(), Fe::one()),
        }
    }

    pub fn coords(&self) -> [Fe; COORDS_PER_FIELD] {
        [self.c1.0, self.c1.1, self.c2.0, self.c2.1]
    }

    /// Component-wise group addition of the two ciphertexts.
    pub fn add(&self, other: &Self) -> Result<Self, Error> {
        Ok(Self {
            c1: point_add(self.c1, other.c1)?,
            c2: point_add(self.c2, other.c2)?,
        })
    }

    /// Poseidon digest of the four coordinates.
    pub fn digest(&self) -> Result<Fe, Error> {
        Ok(poseidon::hash(&self.coords())?)
    }
}

/// An encrypted ballot: [`FIELDS_PER_BALLOT`] ciphertexts, treated as an
/// opaque coordinate vector for hashing and as a group element for the
/// running-sum accumulators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    fields: Vec<CipherField>,
}

impl Ballot {
    /// The additive identity: every field encrypts nothing.
    pub fn zero() -> Self {
        Self {
            fields: vec![CipherField::identity(); FIELDS_PER_BALLOT],
        }
    }

    pub fn new(fields: Vec<CipherField>) -> Result<Self, Error> {
        if fields.is_empty() {
            return Err(Error::EmptyBallot);
        }
        if fields.len() != FIELDS_PER_BALLOT {
            return Err(Error::BallotShape(fields.len() * COORDS_PER_FIELD));
        }
        Ok(Self { fields })
    }

    /// Rebuild a ballot from its flat coordinate vector.
    pub fn from_coords(coords: &[Fe]) -> Result<Self, Error> {
        if coords.is_empty() {
            return Err(Error::EmptyBallot);
        }
        if coords.len() != COORDS_PER_BALLOT {
            return Err(Error::BallotShape(coords.len()));
        }

        let fields = coords
            .chunks(COORDS_PER_FIELD)
            .map(|c| CipherField {
                c1: (c[0], c[1]),
                c2: (c[2], c[3]),
            })
            .collect();

        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[CipherField] {
        &self.fields
    }

    /// Flat coordinate view: `c1.x, c1.y, c2.x, c2.y` per field.
    pub fn coords(&self) -> Vec<Fe> {
        self.fields.iter().flat_map(|f| f.coords()).collect()
    }

    /// Homomorphic addition, field by field.
    pub fn add(&self, other: &Self) -> Result<Self, Error> {
        let fields = self
            .fields
            .iter()
            .zip(&other.fields)
            .map(|(a, b)| a.add(b))
            .collect::<Result<_, _>>()?;

        Ok(Self { fields })
    }
}

fn fe_to_fq(fe: &Fe) -> Fq {
    Fq::from(fe.to_biguint())
}

fn fq_to_fe(fq: &Fq) -> Fe {
    use ark_ff::{BigInteger, PrimeField};
    Fe::from_bytes_be_mod(&fq.into_bigint().to_bytes_be())
}

fn point_add(a: (Fe, Fe), b: (Fe, Fe)) -> Result<(Fe, Fe), Error> {
    let a_point = decode_point(a)?;
    let b_point = decode_point(b)?;

    let sum = (a_point.into_group() + b_point).into_affine();
    Ok((fq_to_fe(&sum.x), fq_to_fe(&sum.y)))
}

fn decode_point((x, y): (Fe, Fe)) -> Result<EdwardsAffine, Error> {
    let point = EdwardsAffine::new_unchecked(fe_to_fq(&x), fe_to_fq(&y));
    if !point.is_on_curve() {
        return Err(Error::CurvePoint(x, y));
    }
    Ok(point)
}

/// The 15-input Poseidon commitment binding one vote to its process
/// configuration: process id, packed ballot mode, encryption key, voter
/// address, vote id, the eight per-field ballot digests and the voter
/// weight. Fits a single permutation.
pub fn ballot_inputs_hash(
    process_id: &ProcessId,
    ballot_mode: &Fe,
    encryption_key: &(Fe, Fe),
    address: &Address,
    vote_id: StateKey,
    ballot: &Ballot,
    weight: &Fe,
) -> Result<Fe, Error> {
    let mut inputs = Vec::with_capacity(7 + FIELDS_PER_BALLOT);
    inputs.push(process_id.to_fe());
    inputs.push(*ballot_mode);
    inputs.push(encryption_key.0);
    inputs.push(encryption_key.1);
    inputs.push(address.to_fe());
    inputs.push(Fe::from(vote_id));

    for field in ballot.fields() {
        inputs.push(field.digest()?);
    }

    inputs.push(*weight);

    Ok(multi_hash(&inputs)?)
}
