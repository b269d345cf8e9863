//! Validity circuits for the supported weight types
//!
//! Each circuit fixes how a weight is encoded into field elements, what
//! "valid" means, and which part of the encoding is aggregated:
//!
//! - [`Count`]: the weight is a single 0/1 contribution.
//! - [`Sum`]: an integer in `0..=max_measurement`, bit-encoded twice (value
//!   and offset value) so the range bound needs no comparison gate.
//! - [`SumVec`]: a vector of bounded integers, bit-encoded elementwise.
//! - [`Histogram`]: a one-hot bucket indicator.
//! - [`MultihotCountVec`]: a bit vector with at most `max_weight` bits set,
//!   plus an offset-encoded copy of the set-bit count.
//!
//! Bit (range) checks share one joint-randomness element: the checks are
//! combined as `Σ rᵏ·(xₖ² − xₖ)`, computed through the declared gadget so the
//! verifier can replay them on shares.

#![forbid(unsafe_code)]

use std::marker::PhantomData;

use ark_ff::{Field, One, Zero};

use crate::field::MasticField;
use crate::flp::{share_inverse, FlpError, Gadget, GadgetKind, GadgetSpec, Powers, Valid};

/// Number of bits needed to write `x` (which must be ≥ 1).
fn bit_length(x: u64) -> usize {
    (64 - x.leading_zeros()) as usize
}

/// LSB-first bit encoding of `value` into `bits` field elements.
fn encode_bits<F: MasticField>(value: u128, bits: usize) -> Vec<F> {
    (0..bits)
        .map(|j| F::from(((value >> j) & 1) as u64))
        .collect()
}

/// `Σ 2ʲ·bits[j]`; linear, so it maps shares to shares.
fn weighted_bit_sum<F: MasticField>(bits: &[F]) -> F {
    let mut acc = F::zero();
    let mut w = F::one();
    for b in bits {
        acc += w * b;
        w.double_in_place();
    }
    acc
}

/// Joint-randomness combination of the range checks `xₖ² − xₖ`, with the
/// squares routed through the gadget.
fn range_checks<F: MasticField>(
    gadget: &mut Gadget<F>,
    meas: &[F],
    chunk: usize,
    r: F,
) -> Result<F, FlpError> {
    let r_pows: Vec<F> = Powers::of(r).take(meas.len()).collect();
    let mut acc = F::zero();
    for (call, chunk_meas) in meas.chunks(chunk).enumerate() {
        let mut inputs = vec![F::zero(); 2 * chunk];
        for (j, x) in chunk_meas.iter().enumerate() {
            inputs[2 * j] = r_pows[call * chunk + j] * x;
            inputs[2 * j + 1] = *x;
        }
        acc += gadget.call(&inputs)?;
    }
    for (x, r_pow) in meas.iter().zip(&r_pows) {
        acc -= *r_pow * x;
    }
    Ok(acc)
}

// ---------------------------------------------------------------------------
// Count
// ---------------------------------------------------------------------------

/// A 0/1 contribution; `x(x−1) == 0` via one multiplication.
#[derive(Clone, Debug, Default)]
pub struct Count<F> {
    _field: PhantomData<F>,
}

impl<F> Count<F> {
    /// New Count circuit.
    pub fn new() -> Self {
        Self {
            _field: PhantomData,
        }
    }
}

impl<F: MasticField> Valid for Count<F> {
    type Field = F;
    type Measurement = bool;
    type AggResult = u128;

    fn meas_len(&self) -> usize {
        1
    }
    fn output_len(&self) -> usize {
        1
    }
    fn joint_rand_len(&self) -> usize {
        0
    }
    fn eval_output_len(&self) -> usize {
        1
    }
    fn gadget(&self) -> GadgetSpec {
        GadgetSpec {
            kind: GadgetKind::Mul,
            calls: 1,
        }
    }

    fn encode(&self, measurement: &bool) -> Result<Vec<F>, FlpError> {
        Ok(vec![F::from(u64::from(*measurement))])
    }

    fn eval(
        &self,
        gadget: &mut Gadget<F>,
        meas: &[F],
        _joint_rand: &[F],
        _num_shares: usize,
    ) -> Result<Vec<F>, FlpError> {
        let sq = gadget.call(&[meas[0], meas[0]])?;
        Ok(vec![sq - meas[0]])
    }

    fn truncate(&self, meas: Vec<F>) -> Vec<F> {
        meas
    }

    fn decode(&self, output: &[F], _num_measurements: usize) -> u128 {
        output[0].to_unsigned()
    }
}

// ---------------------------------------------------------------------------
// Sum
// ---------------------------------------------------------------------------

/// An integer in `0..=max_measurement`.
///
/// The encoding carries the value and the value plus
/// `2^bits − 1 − max_measurement`; both being `bits`-bit numbers pins the
/// value into the range without a comparison.
#[derive(Clone, Debug)]
pub struct Sum<F> {
    bits: usize,
    offset: u64,
    max_measurement: u64,
    _field: PhantomData<F>,
}

impl<F: MasticField> Sum<F> {
    /// New Sum circuit accepting values up to `max_measurement`.
    pub fn new(max_measurement: u64) -> Result<Self, FlpError> {
        if max_measurement == 0 {
            return Err(FlpError::InvalidParameter("maximum must be positive"));
        }
        if max_measurement >= 1 << 62 {
            return Err(FlpError::InvalidParameter("maximum too large"));
        }
        let bits = bit_length(max_measurement);
        let offset = ((1u128 << bits) - 1 - u128::from(max_measurement)) as u64;
        Ok(Self {
            bits,
            offset,
            max_measurement,
            _field: PhantomData,
        })
    }
}

impl<F: MasticField> Valid for Sum<F> {
    type Field = F;
    type Measurement = u64;
    type AggResult = u128;

    fn meas_len(&self) -> usize {
        2 * self.bits
    }
    fn output_len(&self) -> usize {
        1
    }
    fn joint_rand_len(&self) -> usize {
        1
    }
    fn eval_output_len(&self) -> usize {
        2
    }
    fn gadget(&self) -> GadgetSpec {
        GadgetSpec {
            kind: GadgetKind::Mul,
            calls: 2 * self.bits,
        }
    }

    fn encode(&self, measurement: &u64) -> Result<Vec<F>, FlpError> {
        if *measurement > self.max_measurement {
            return Err(FlpError::InvalidMeasurement("value exceeds the maximum"));
        }
        let mut out = encode_bits(u128::from(*measurement), self.bits);
        out.extend(encode_bits::<F>(
            u128::from(*measurement) + u128::from(self.offset),
            self.bits,
        ));
        Ok(out)
    }

    fn eval(
        &self,
        gadget: &mut Gadget<F>,
        meas: &[F],
        joint_rand: &[F],
        num_shares: usize,
    ) -> Result<Vec<F>, FlpError> {
        let mut range_check = F::zero();
        for (x, r_pow) in meas.iter().zip(Powers::of(joint_rand[0])) {
            let sq = gadget.call(&[*x, *x])?;
            range_check += r_pow * (sq - x);
        }

        let value = weighted_bit_sum(&meas[..self.bits]);
        let offset_value = weighted_bit_sum(&meas[self.bits..]);
        let offset_check =
            offset_value - value - F::from(self.offset) * share_inverse::<F>(num_shares);
        Ok(vec![range_check, offset_check])
    }

    fn truncate(&self, meas: Vec<F>) -> Vec<F> {
        vec![weighted_bit_sum(&meas[..self.bits])]
    }

    fn decode(&self, output: &[F], _num_measurements: usize) -> u128 {
        output[0].to_unsigned()
    }
}

// ---------------------------------------------------------------------------
// SumVec
// ---------------------------------------------------------------------------

/// A vector of `length` integers, each below `2^bits`.
#[derive(Clone, Debug)]
pub struct SumVec<F> {
    length: usize,
    bits: usize,
    chunk: usize,
    _field: PhantomData<F>,
}

impl<F: MasticField> SumVec<F> {
    /// New SumVec circuit over vectors of `length` values of `bits` bits
    /// each, with `chunk` range checks batched per gadget call.
    pub fn new(length: usize, bits: usize, chunk: usize) -> Result<Self, FlpError> {
        if length == 0 {
            return Err(FlpError::InvalidParameter("length must be positive"));
        }
        if bits == 0 || bits > 64 {
            return Err(FlpError::InvalidParameter("bits must be in 1..=64"));
        }
        if chunk == 0 {
            return Err(FlpError::InvalidParameter("chunk length must be positive"));
        }
        Ok(Self {
            length,
            bits,
            chunk,
            _field: PhantomData,
        })
    }
}

impl<F: MasticField> Valid for SumVec<F> {
    type Field = F;
    type Measurement = Vec<u64>;
    type AggResult = Vec<u128>;

    fn meas_len(&self) -> usize {
        self.length * self.bits
    }
    fn output_len(&self) -> usize {
        self.length
    }
    fn joint_rand_len(&self) -> usize {
        1
    }
    fn eval_output_len(&self) -> usize {
        1
    }
    fn gadget(&self) -> GadgetSpec {
        GadgetSpec {
            kind: GadgetKind::ParallelSumMul { chunk: self.chunk },
            calls: self.meas_len().div_ceil(self.chunk),
        }
    }

    fn encode(&self, measurement: &Vec<u64>) -> Result<Vec<F>, FlpError> {
        if measurement.len() != self.length {
            return Err(FlpError::InvalidMeasurement("wrong vector length"));
        }
        let mut out = Vec::with_capacity(self.meas_len());
        for &v in measurement {
            if self.bits < 64 && v >> self.bits != 0 {
                return Err(FlpError::InvalidMeasurement("entry exceeds the bit width"));
            }
            out.extend(encode_bits::<F>(u128::from(v), self.bits));
        }
        Ok(out)
    }

    fn eval(
        &self,
        gadget: &mut Gadget<F>,
        meas: &[F],
        joint_rand: &[F],
        _num_shares: usize,
    ) -> Result<Vec<F>, FlpError> {
        Ok(vec![range_checks(gadget, meas, self.chunk, joint_rand[0])?])
    }

    fn truncate(&self, meas: Vec<F>) -> Vec<F> {
        meas.chunks(self.bits).map(weighted_bit_sum).collect()
    }

    fn decode(&self, output: &[F], _num_measurements: usize) -> Vec<u128> {
        output.iter().map(MasticField::to_unsigned).collect()
    }
}

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// A one-hot indicator over `length` buckets.
#[derive(Clone, Debug)]
pub struct Histogram<F> {
    length: usize,
    chunk: usize,
    _field: PhantomData<F>,
}

impl<F: MasticField> Histogram<F> {
    /// New Histogram circuit with `length` buckets and `chunk` range checks
    /// batched per gadget call.
    pub fn new(length: usize, chunk: usize) -> Result<Self, FlpError> {
        if length == 0 {
            return Err(FlpError::InvalidParameter("length must be positive"));
        }
        if chunk == 0 {
            return Err(FlpError::InvalidParameter("chunk length must be positive"));
        }
        Ok(Self {
            length,
            chunk,
            _field: PhantomData,
        })
    }
}

impl<F: MasticField> Valid for Histogram<F> {
    type Field = F;
    type Measurement = usize;
    type AggResult = Vec<u128>;

    fn meas_len(&self) -> usize {
        self.length
    }
    fn output_len(&self) -> usize {
        self.length
    }
    fn joint_rand_len(&self) -> usize {
        1
    }
    fn eval_output_len(&self) -> usize {
        2
    }
    fn gadget(&self) -> GadgetSpec {
        GadgetSpec {
            kind: GadgetKind::ParallelSumMul { chunk: self.chunk },
            calls: self.length.div_ceil(self.chunk),
        }
    }

    fn encode(&self, measurement: &usize) -> Result<Vec<F>, FlpError> {
        if *measurement >= self.length {
            return Err(FlpError::InvalidMeasurement("bucket out of range"));
        }
        let mut out = vec![F::zero(); self.length];
        out[*measurement] = F::one();
        Ok(out)
    }

    fn eval(
        &self,
        gadget: &mut Gadget<F>,
        meas: &[F],
        joint_rand: &[F],
        num_shares: usize,
    ) -> Result<Vec<F>, FlpError> {
        let range_check = range_checks(gadget, meas, self.chunk, joint_rand[0])?;
        let sum_check = meas.iter().copied().sum::<F>() - share_inverse::<F>(num_shares);
        Ok(vec![range_check, sum_check])
    }

    fn truncate(&self, meas: Vec<F>) -> Vec<F> {
        meas
    }

    fn decode(&self, output: &[F], _num_measurements: usize) -> Vec<u128> {
        output.iter().map(MasticField::to_unsigned).collect()
    }
}

// ---------------------------------------------------------------------------
// MultihotCountVec
// ---------------------------------------------------------------------------

/// A bit vector with at most `max_weight` set bits.
///
/// The count of set bits is carried offset-encoded next to the vector; the
/// circuit checks every entry is a bit and that the declared count matches
/// the vector.
#[derive(Clone, Debug)]
pub struct MultihotCountVec<F> {
    length: usize,
    max_weight: u64,
    chunk: usize,
    count_bits: usize,
    offset: u64,
    _field: PhantomData<F>,
}

impl<F: MasticField> MultihotCountVec<F> {
    /// New MultihotCountVec circuit over `length` positions with at most
    /// `max_weight` of them set.
    pub fn new(length: usize, max_weight: u64, chunk: usize) -> Result<Self, FlpError> {
        if length == 0 {
            return Err(FlpError::InvalidParameter("length must be positive"));
        }
        if max_weight == 0 || max_weight > length as u64 {
            return Err(FlpError::InvalidParameter(
                "weight bound must be in 1..=length",
            ));
        }
        if chunk == 0 {
            return Err(FlpError::InvalidParameter("chunk length must be positive"));
        }
        let count_bits = bit_length(max_weight);
        let offset = ((1u128 << count_bits) - 1 - u128::from(max_weight)) as u64;
        Ok(Self {
            length,
            max_weight,
            chunk,
            count_bits,
            offset,
            _field: PhantomData,
        })
    }
}

impl<F: MasticField> Valid for MultihotCountVec<F> {
    type Field = F;
    type Measurement = Vec<bool>;
    type AggResult = Vec<u128>;

    fn meas_len(&self) -> usize {
        self.length + self.count_bits
    }
    fn output_len(&self) -> usize {
        self.length
    }
    fn joint_rand_len(&self) -> usize {
        1
    }
    fn eval_output_len(&self) -> usize {
        2
    }
    fn gadget(&self) -> GadgetSpec {
        GadgetSpec {
            kind: GadgetKind::ParallelSumMul { chunk: self.chunk },
            calls: self.meas_len().div_ceil(self.chunk),
        }
    }

    fn encode(&self, measurement: &Vec<bool>) -> Result<Vec<F>, FlpError> {
        if measurement.len() != self.length {
            return Err(FlpError::InvalidMeasurement("wrong vector length"));
        }
        let weight = measurement.iter().filter(|&&b| b).count() as u64;
        if weight > self.max_weight {
            return Err(FlpError::InvalidMeasurement("too many set positions"));
        }
        let mut out: Vec<F> = measurement
            .iter()
            .map(|&b| F::from(u64::from(b)))
            .collect();
        out.extend(encode_bits::<F>(
            u128::from(weight) + u128::from(self.offset),
            self.count_bits,
        ));
        Ok(out)
    }

    fn eval(
        &self,
        gadget: &mut Gadget<F>,
        meas: &[F],
        joint_rand: &[F],
        num_shares: usize,
    ) -> Result<Vec<F>, FlpError> {
        let range_check = range_checks(gadget, meas, self.chunk, joint_rand[0])?;
        let declared = weighted_bit_sum(&meas[self.length..]);
        let actual = meas[..self.length].iter().copied().sum::<F>();
        let weight_check =
            declared - actual - F::from(self.offset) * share_inverse::<F>(num_shares);
        Ok(vec![range_check, weight_check])
    }

    fn truncate(&self, mut meas: Vec<F>) -> Vec<F> {
        meas.truncate(self.length);
        meas
    }

    fn decode(&self, output: &[F], _num_measurements: usize) -> Vec<u128> {
        output.iter().map(MasticField::to_unsigned).collect()
    }
}
