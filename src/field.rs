//! Prime fields and field-vector arithmetic
//!
//! Mastic aggregates weights in a prime field of size ≥ 2^63 so that sums over
//! realistic report counts cannot wrap. Two fields are provided, matching the
//! two instantiation families:
//!
//! - [`Field64`]: modulus `2^32 · 4294967295 + 1` (64-bit, 2-adicity 32), used
//!   by the Count and Sum weight types.
//! - [`Field128`]: modulus `2^66 · 4611686018427387897 + 1` (128-bit,
//!   2-adicity 66), used by the vector-valued weight types.
//!
//! Both are NTT-friendly; the proof system interpolates wire polynomials over
//! their two-adic subgroups. Elements encode to little-endian bytes of fixed
//! width; decoding rejects non-canonical values.
//!
//! [`ControlBit`] is the GF(2) element steering the VIDPF tree walk. Its
//! corrections are branch-free: byte masks for seeds, a field embedding for
//! weight vectors.

#![forbid(unsafe_code)]

use ark_ff::fields::{Fp128, Fp64, MontBackend, MontConfig};
use ark_ff::{PrimeField, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use core::ops::{Add, AddAssign, Mul};

/// Configuration of the 64-bit field, `p = 2^32 · 4294967295 + 1`.
#[derive(MontConfig)]
#[modulus = "18446744069414584321"]
#[generator = "7"]
pub struct Field64Config;

/// 64-bit NTT-friendly prime field.
pub type Field64 = Fp64<MontBackend<Field64Config, 1>>;

/// Configuration of the 128-bit field, `p = 2^66 · 4611686018427387897 + 1`.
#[derive(MontConfig)]
#[modulus = "340282366920938462946865773367900766209"]
#[generator = "7"]
pub struct Field128Config;

/// 128-bit NTT-friendly prime field.
pub type Field128 = Fp128<MontBackend<Field128Config, 2>>;

/// Errors surfaced by the byte codecs for field vectors.
#[allow(missing_docs)] // the display strings are the documentation
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("encoded length {got} is not a multiple of the element size {elem}")]
    BadLength { got: usize, elem: usize },
    #[error("encoded element is not a canonical field value")]
    NonCanonical,
}

/// The field contract the Mastic core consumes.
///
/// `PrimeField` already carries the arithmetic and the two-adic roots of unity
/// needed by the proof system; this trait pins down the fixed-width wire
/// encoding and the unsigned readout used when decoding aggregates.
pub trait MasticField: PrimeField {
    /// Size in bytes of one encoded element.
    const ENCODED_SIZE: usize;

    /// The canonical integer representative, as an unsigned 128-bit value.
    fn to_unsigned(&self) -> u128;
}

impl MasticField for Field64 {
    const ENCODED_SIZE: usize = 8;

    fn to_unsigned(&self) -> u128 {
        u128::from(self.into_bigint().0[0])
    }
}

impl MasticField for Field128 {
    const ENCODED_SIZE: usize = 16;

    fn to_unsigned(&self) -> u128 {
        let limbs = self.into_bigint().0;
        u128::from(limbs[0]) | (u128::from(limbs[1]) << 64)
    }
}

/// Encode a vector to fixed-width little-endian bytes.
pub fn encode_vec<F: MasticField>(v: &[F]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * F::ENCODED_SIZE);
    for x in v {
        x.serialize_compressed(&mut out)
            .expect("writing to a Vec is infallible");
    }
    out
}

/// Decode a vector from fixed-width little-endian bytes, rejecting
/// non-canonical elements and ragged input.
pub fn decode_vec<F: MasticField>(bytes: &[u8]) -> Result<Vec<F>, FieldError> {
    if bytes.len() % F::ENCODED_SIZE != 0 {
        return Err(FieldError::BadLength {
            got: bytes.len(),
            elem: F::ENCODED_SIZE,
        });
    }
    bytes
        .chunks_exact(F::ENCODED_SIZE)
        .map(|chunk| F::deserialize_compressed(chunk).map_err(|_| FieldError::NonCanonical))
        .collect()
}

/// Componentwise sum, consuming the left operand.
pub fn vec_add<F: MasticField>(mut a: Vec<F>, b: &[F]) -> Vec<F> {
    debug_assert_eq!(a.len(), b.len());
    for (x, y) in a.iter_mut().zip(b) {
        *x += y;
    }
    a
}

/// Componentwise difference, consuming the left operand.
pub fn vec_sub<F: MasticField>(mut a: Vec<F>, b: &[F]) -> Vec<F> {
    debug_assert_eq!(a.len(), b.len());
    for (x, y) in a.iter_mut().zip(b) {
        *x -= y;
    }
    a
}

/// Componentwise negation.
pub fn vec_neg<F: MasticField>(mut a: Vec<F>) -> Vec<F> {
    for x in a.iter_mut() {
        *x = -*x;
    }
    a
}

/// A GF(2) element: the VIDPF control bit.
///
/// Addition is XOR, multiplication is AND. Corrections conditioned on a
/// `ControlBit` must not branch on its value; use [`ControlBit::mask`] for
/// byte material and [`ControlBit::to_field`] for field vectors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlBit(u8);

impl ControlBit {
    /// The zero bit.
    pub const ZERO: Self = ControlBit(0);
    /// The one bit.
    pub const ONE: Self = ControlBit(1);

    /// Build from the low bit of a byte.
    pub fn from_lsb(b: u8) -> Self {
        ControlBit(b & 1)
    }

    /// The bit as `0` or `1`.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Embed into a field: `0` or `1`.
    pub fn to_field<F: MasticField>(self) -> F {
        F::from(u64::from(self.0))
    }

    /// `bytes` if the bit is set, all-zero otherwise; no data-dependent branch.
    pub fn mask<const N: usize>(self, bytes: &[u8; N]) -> [u8; N] {
        let m = 0u8.wrapping_sub(self.0);
        let mut out = [0u8; N];
        for (o, b) in out.iter_mut().zip(bytes) {
            *o = b & m;
        }
        out
    }
}

impl Add for ControlBit {
    type Output = ControlBit;

    fn add(self, rhs: Self) -> Self {
        ControlBit(self.0 ^ rhs.0)
    }
}

impl AddAssign for ControlBit {
    fn add_assign(&mut self, rhs: Self) {
        self.0 ^= rhs.0;
    }
}

impl Mul for ControlBit {
    type Output = ControlBit;

    fn mul(self, rhs: Self) -> Self {
        ControlBit(self.0 & rhs.0)
    }
}

/// `value + bit · correction` in GF(2); the branch-free `correct` step for
/// control bits.
pub fn correct_bit(value: ControlBit, correction: ControlBit, bit: ControlBit) -> ControlBit {
    value + correction * bit
}

/// Zero vector of the given length.
pub fn zeros<F: MasticField>(len: usize) -> Vec<F> {
    vec![F::zero(); len]
}
