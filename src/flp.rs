//! Fully Linear Proofs over validity circuits
//!
//! A weight is valid when a small arithmetic circuit over its encoding
//! evaluates to zero. The prover runs the circuit once, records every input
//! fed to the circuit's nonlinear gadget, interpolates those inputs into
//! wire polynomials seeded with hiding randomness, and publishes the gadget's
//! composition polynomial. A verifier holding only an additive *share* of the
//! encoding and of the proof re-runs the circuit with gadget calls answered
//! from the shared polynomial, then spot-checks the polynomial identity at a
//! random point. Everything the verifier computes is linear in its shares, so
//! two verifiers' outputs sum to the plaintext verdict.
//!
//! The gadget set is deliberately small: multiplication, and a parallel sum
//! of multiplications that keeps proofs short for long vectors.

#![forbid(unsafe_code)]

use ark_ff::{Field, Zero};

use crate::field::MasticField;
use crate::poly::{poly_add, poly_eval, poly_mul, EvalDomain, PolyError};

/// Errors surfaced by proof generation and verification.
#[allow(missing_docs)] // the display strings are the documentation
#[derive(Debug, thiserror::Error)]
pub enum FlpError {
    #[error("invalid circuit parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("measurement cannot be encoded: {0}")]
    InvalidMeasurement(&'static str),
    #[error("input has wrong length: {0}")]
    BadLength(&'static str),
    #[error("gadget called with wrong arity")]
    GadgetArity,
    #[error("gadget called more often than declared")]
    GadgetCalls,
    #[error("query randomness landed in the wire domain")]
    QueryRandInDomain,
    #[error(transparent)]
    Poly(#[from] PolyError),
}

/// The nonlinear gadget a circuit may call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GadgetKind {
    /// `G(x, y) = x · y`.
    Mul,
    /// `G(x_1, y_1, …, x_c, y_c) = Σ x_i · y_i` over a chunk of `c` pairs.
    ParallelSumMul {
        /// Number of multiplication pairs summed per call.
        chunk: usize,
    },
}

impl GadgetKind {
    /// Number of inputs per call.
    pub fn arity(self) -> usize {
        match self {
            GadgetKind::Mul => 2,
            GadgetKind::ParallelSumMul { chunk } => 2 * chunk,
        }
    }

    /// Total degree of the gadget polynomial.
    pub fn degree(self) -> usize {
        2
    }

    /// Evaluate the gadget on plaintext inputs.
    pub fn eval_direct<F: Field>(self, inputs: &[F]) -> F {
        debug_assert_eq!(inputs.len(), self.arity());
        match self {
            GadgetKind::Mul => inputs[0] * inputs[1],
            GadgetKind::ParallelSumMul { .. } => inputs
                .chunks_exact(2)
                .map(|pair| pair[0] * pair[1])
                .sum(),
        }
    }

    /// The gadget applied to wire polynomials (coefficient vectors).
    fn eval_poly<F: Field>(self, wires: &[Vec<F>]) -> Vec<F> {
        match self {
            GadgetKind::Mul => poly_mul(&wires[0], &wires[1]),
            GadgetKind::ParallelSumMul { .. } => {
                let mut acc = Vec::new();
                for pair in wires.chunks_exact(2) {
                    acc = poly_add(acc, &poly_mul(&pair[0], &pair[1]));
                }
                acc
            }
        }
    }
}

/// A gadget declaration: the kind plus how many times the circuit calls it.
#[derive(Clone, Copy, Debug)]
pub struct GadgetSpec {
    /// Which gadget.
    pub kind: GadgetKind,
    /// Exact number of calls the circuit makes per evaluation.
    pub calls: usize,
}

impl GadgetSpec {
    /// Size of the wire-polynomial interpolation domain.
    pub fn wire_domain_size(&self) -> usize {
        (1 + self.calls).next_power_of_two()
    }

    /// Length of the gadget polynomial in the proof.
    pub fn gadget_poly_len(&self) -> usize {
        self.kind.degree() * (self.wire_domain_size() - 1) + 1
    }
}

/// The gadget as seen by a circuit evaluation: records wire inputs and
/// answers each call according to the mode.
pub struct Gadget<F: MasticField> {
    kind: GadgetKind,
    calls: usize,
    wires: Vec<Vec<F>>,
    mode: GadgetMode<F>,
}

enum GadgetMode<F: MasticField> {
    /// Answer calls by direct evaluation (prover side).
    Direct,
    /// Answer call `k` with `p(ω^k)` from the shared gadget polynomial
    /// (verifier side).
    FromPoly {
        poly: Vec<F>,
        domain: EvalDomain<F>,
    },
}

impl<F: MasticField> Gadget<F> {
    fn direct(spec: GadgetSpec) -> Self {
        Self {
            kind: spec.kind,
            calls: spec.calls,
            wires: vec![Vec::with_capacity(spec.calls); spec.kind.arity()],
            mode: GadgetMode::Direct,
        }
    }

    fn from_poly(spec: GadgetSpec, poly: Vec<F>, domain: EvalDomain<F>) -> Self {
        Self {
            kind: spec.kind,
            calls: spec.calls,
            wires: vec![Vec::with_capacity(spec.calls); spec.kind.arity()],
            mode: GadgetMode::FromPoly { poly, domain },
        }
    }

    /// Invoke the gadget on one tuple of inputs.
    pub fn call(&mut self, inputs: &[F]) -> Result<F, FlpError> {
        if inputs.len() != self.kind.arity() {
            return Err(FlpError::GadgetArity);
        }
        if self.wires[0].len() == self.calls {
            return Err(FlpError::GadgetCalls);
        }
        for (wire, x) in self.wires.iter_mut().zip(inputs) {
            wire.push(*x);
        }
        match &self.mode {
            GadgetMode::Direct => Ok(self.kind.eval_direct(inputs)),
            GadgetMode::FromPoly { poly, domain } => {
                let k = self.wires[0].len(); // call index, 1-based; ω^0 seeds the wires
                Ok(poly_eval(poly, domain.element(k)))
            }
        }
    }

    /// Wire polynomials interpolated from `seeds` (at ω^0) and the recorded
    /// calls, zero-padded to the domain size.
    fn wire_polys(&self, seeds: &[F], domain: &EvalDomain<F>) -> Result<Vec<Vec<F>>, FlpError> {
        self.wires
            .iter()
            .zip(seeds)
            .map(|(wire, seed)| {
                let mut evals = Vec::with_capacity(domain.size());
                evals.push(*seed);
                evals.extend_from_slice(wire);
                evals.resize(domain.size(), F::zero());
                Ok(domain.interpolate(evals)?)
            })
            .collect()
    }
}

/// A validity circuit: decides a predicate over an encoded measurement using
/// one declared gadget, with all other arithmetic affine.
///
/// Contract obligations:
/// - `eval` makes exactly `gadget().calls` gadget calls, every input to the
///   gadget is linear in `(measurement, constants)`, and every additive
///   constant is scaled by `1/num_shares`;
/// - `truncate` is linear, so it maps shares to shares.
pub trait Valid {
    /// Field the circuit works over.
    type Field: MasticField;
    /// Plaintext measurement accepted by `encode`.
    type Measurement: Clone + std::fmt::Debug;
    /// Aggregate decoded by `decode`.
    type AggResult: std::fmt::Debug + PartialEq;

    /// Length of an encoded measurement.
    fn meas_len(&self) -> usize;
    /// Length of a truncated (aggregatable) encoding.
    fn output_len(&self) -> usize;
    /// Number of joint-randomness elements consumed by `eval`.
    fn joint_rand_len(&self) -> usize;
    /// Number of circuit outputs (all must be zero for a valid input).
    fn eval_output_len(&self) -> usize;
    /// The gadget declaration.
    fn gadget(&self) -> GadgetSpec;

    /// Encode a measurement.
    fn encode(&self, measurement: &Self::Measurement) -> Result<Vec<Self::Field>, FlpError>;

    /// Run the circuit; on a share, outputs are shares of the plaintext
    /// outputs.
    fn eval(
        &self,
        gadget: &mut Gadget<Self::Field>,
        meas: &[Self::Field],
        joint_rand: &[Self::Field],
        num_shares: usize,
    ) -> Result<Vec<Self::Field>, FlpError>;

    /// Map an encoding to its aggregatable part (linear).
    fn truncate(&self, meas: Vec<Self::Field>) -> Vec<Self::Field>;

    /// Decode an aggregated output given the number of contributing
    /// measurements.
    fn decode(&self, output: &[Self::Field], num_measurements: usize) -> Self::AggResult;
}

/// The proof system wrapped around a validity circuit.
#[derive(Clone, Debug)]
pub struct Flp<V> {
    valid: V,
}

impl<V: Valid> Flp<V> {
    /// Wrap a circuit.
    pub fn new(valid: V) -> Self {
        Self { valid }
    }

    /// The underlying circuit.
    pub fn valid(&self) -> &V {
        &self.valid
    }

    /// Length of an encoded measurement.
    pub fn meas_len(&self) -> usize {
        self.valid.meas_len()
    }

    /// Length of a truncated encoding.
    pub fn output_len(&self) -> usize {
        self.valid.output_len()
    }

    /// Joint-randomness length.
    pub fn joint_rand_len(&self) -> usize {
        self.valid.joint_rand_len()
    }

    /// Length of a proof.
    pub fn proof_len(&self) -> usize {
        let spec = self.valid.gadget();
        spec.kind.arity() + spec.gadget_poly_len()
    }

    /// Prover-randomness length (one seed per gadget wire).
    pub fn prove_rand_len(&self) -> usize {
        self.valid.gadget().kind.arity()
    }

    /// Query-randomness length: the evaluation point, plus one combiner when
    /// the circuit has several outputs.
    pub fn query_rand_len(&self) -> usize {
        1 + usize::from(self.valid.eval_output_len() > 1)
    }

    /// Length of a verifier share.
    pub fn verifier_len(&self) -> usize {
        1 + self.valid.gadget().kind.arity() + 1
    }

    /// Encode a measurement.
    pub fn encode(&self, measurement: &V::Measurement) -> Result<Vec<V::Field>, FlpError> {
        let out = self.valid.encode(measurement)?;
        debug_assert_eq!(out.len(), self.meas_len());
        Ok(out)
    }

    /// Truncate an encoding (or a share of one).
    pub fn truncate(&self, meas: Vec<V::Field>) -> Vec<V::Field> {
        self.valid.truncate(meas)
    }

    /// Decode an aggregate.
    pub fn decode(&self, output: &[V::Field], num_measurements: usize) -> V::AggResult {
        self.valid.decode(output, num_measurements)
    }

    /// Produce a proof that `meas` satisfies the circuit.
    pub fn prove(
        &self,
        meas: &[V::Field],
        prove_rand: &[V::Field],
        joint_rand: &[V::Field],
    ) -> Result<Vec<V::Field>, FlpError> {
        if meas.len() != self.meas_len() {
            return Err(FlpError::BadLength("measurement"));
        }
        if prove_rand.len() != self.prove_rand_len() {
            return Err(FlpError::BadLength("prover randomness"));
        }
        if joint_rand.len() != self.joint_rand_len() {
            return Err(FlpError::BadLength("joint randomness"));
        }

        let spec = self.valid.gadget();
        let mut gadget = Gadget::direct(spec);
        self.valid.eval(&mut gadget, meas, joint_rand, 1)?;
        if gadget.wires[0].len() != spec.calls {
            return Err(FlpError::GadgetCalls);
        }

        let domain = EvalDomain::new(spec.wire_domain_size())?;
        let wires = gadget.wire_polys(prove_rand, &domain)?;
        let mut gadget_poly = spec.kind.eval_poly(&wires);
        gadget_poly.resize(spec.gadget_poly_len(), V::Field::zero());

        let mut proof = prove_rand.to_vec();
        proof.extend(gadget_poly);
        Ok(proof)
    }

    /// Compute a verifier share from a measurement share and proof share.
    pub fn query(
        &self,
        meas_share: &[V::Field],
        proof_share: &[V::Field],
        query_rand: &[V::Field],
        joint_rand: &[V::Field],
        num_shares: usize,
    ) -> Result<Vec<V::Field>, FlpError> {
        if meas_share.len() != self.meas_len() {
            return Err(FlpError::BadLength("measurement share"));
        }
        if proof_share.len() != self.proof_len() {
            return Err(FlpError::BadLength("proof share"));
        }
        if query_rand.len() != self.query_rand_len() {
            return Err(FlpError::BadLength("query randomness"));
        }
        if joint_rand.len() != self.joint_rand_len() {
            return Err(FlpError::BadLength("joint randomness"));
        }
        if num_shares == 0 {
            return Err(FlpError::InvalidParameter("number of shares"));
        }

        let spec = self.valid.gadget();
        let arity = spec.kind.arity();
        let domain = EvalDomain::new(spec.wire_domain_size())?;
        let t = query_rand[0];
        // The wire polynomials are only hiding off the interpolation domain.
        if domain.contains(&t) {
            return Err(FlpError::QueryRandInDomain);
        }

        let (wire_seeds, gadget_poly) = proof_share.split_at(arity);
        let mut gadget = Gadget::from_poly(spec, gadget_poly.to_vec(), domain.clone());
        let outputs = self
            .valid
            .eval(&mut gadget, meas_share, joint_rand, num_shares)?;
        if outputs.len() != self.valid.eval_output_len() {
            return Err(FlpError::BadLength("circuit output"));
        }
        if gadget.wires[0].len() != spec.calls {
            return Err(FlpError::GadgetCalls);
        }

        // Reduce multiple circuit outputs with powers of a shared combiner.
        let v = if outputs.len() == 1 {
            outputs[0]
        } else {
            let s = query_rand[1];
            let mut acc = V::Field::zero();
            let mut s_pow = s;
            for out in &outputs {
                acc += s_pow * out;
                s_pow *= s;
            }
            acc
        };

        let mut verifier = Vec::with_capacity(self.verifier_len());
        verifier.push(v);
        for wire in gadget.wire_polys(wire_seeds, &domain)? {
            verifier.push(poly_eval(&wire, t));
        }
        verifier.push(poly_eval(gadget_poly, t));
        Ok(verifier)
    }

    /// Decide from a combined verifier whether the measurement is valid.
    pub fn decide(&self, verifier: &[V::Field]) -> Result<bool, FlpError> {
        if verifier.len() != self.verifier_len() {
            return Err(FlpError::BadLength("verifier"));
        }
        let spec = self.valid.gadget();
        let arity = spec.kind.arity();
        let v = verifier[0];
        let wire_evals = &verifier[1..1 + arity];
        let p_t = verifier[1 + arity];
        Ok(v.is_zero() && spec.kind.eval_direct(wire_evals) == p_t)
    }
}

/// `1 / num_shares`, the scaling applied to additive constants so that the
/// shares of a circuit evaluation sum to the plaintext evaluation.
pub fn share_inverse<F: MasticField>(num_shares: usize) -> F {
    F::from(num_shares as u64)
        .inverse()
        .expect("share counts are nonzero mod p")
}

/// Powers `r^1, r^2, …` of a joint-randomness element.
pub(crate) struct Powers<F> {
    next: F,
    base: F,
}

impl<F: MasticField> Powers<F> {
    pub(crate) fn of(base: F) -> Self {
        Self { next: base, base }
    }
}

impl<F: MasticField> Iterator for Powers<F> {
    type Item = F;

    fn next(&mut self) -> Option<F> {
        let out = self.next;
        self.next *= self.base;
        Some(out)
    }
}
