//! Polynomial primitives for the proof system
//!
//! Wire polynomials are interpolated over a power-of-two multiplicative
//! subgroup `H = {1, ω, …, ω^{P−1}}` of the field's two-adic subgroup, then
//! evaluated off-domain at the verifier's query point. Sizes here are tiny
//! (`P = next_pow2(1 + gadget calls)`), so the transforms are plain radix-2
//! loops and products are schoolbook convolutions.

#![forbid(unsafe_code)]

use ark_ff::{Field, One, Zero};

use crate::field::MasticField;

/// Errors produced by domain construction and transforms.
#[allow(missing_docs)] // the display strings are the documentation
#[derive(Debug, thiserror::Error)]
pub enum PolyError {
    #[error("domain size must be a positive power of two (got {0})")]
    BadSize(usize),
    #[error("field has no subgroup of order {0}")]
    NoRootOfUnity(usize),
    #[error("input length {got} does not match the domain size {n}")]
    BadLength { got: usize, n: usize },
}

/// A radix-2 evaluation domain of size `n` with generator `ω`.
#[derive(Clone, Debug)]
pub struct EvalDomain<F> {
    n: usize,
    omega: F,
    omega_inv: F,
    n_inv: F,
}

impl<F: MasticField> EvalDomain<F> {
    /// Construct the size-`n` domain; `n` must be a power of two within the
    /// field's two-adic subgroup.
    pub fn new(n: usize) -> Result<Self, PolyError> {
        if n == 0 || !n.is_power_of_two() {
            return Err(PolyError::BadSize(n));
        }
        let omega = F::get_root_of_unity(n as u64).ok_or(PolyError::NoRootOfUnity(n))?;
        let omega_inv = omega.inverse().expect("roots of unity are nonzero");
        let n_inv = F::from(n as u64)
            .inverse()
            .expect("domain sizes are nonzero mod p");
        Ok(Self {
            n,
            omega,
            omega_inv,
            n_inv,
        })
    }

    /// Domain size.
    pub fn size(&self) -> usize {
        self.n
    }

    /// The domain element `ω^k`.
    pub fn element(&self, k: usize) -> F {
        self.omega.pow([(k % self.n) as u64])
    }

    /// Whether `x` lies in the domain, i.e. `x^n == 1`.
    pub fn contains(&self, x: &F) -> bool {
        x.pow([self.n as u64]).is_one()
    }

    /// Evaluations on the domain → coefficients (inverse NTT).
    pub fn interpolate(&self, mut evals: Vec<F>) -> Result<Vec<F>, PolyError> {
        if evals.len() != self.n {
            return Err(PolyError::BadLength {
                got: evals.len(),
                n: self.n,
            });
        }
        ntt_in_place(&mut evals, self.omega_inv);
        for c in evals.iter_mut() {
            *c *= self.n_inv;
        }
        Ok(evals)
    }

    /// Coefficients → evaluations on the domain (forward NTT).
    pub fn evaluate(&self, mut coeffs: Vec<F>) -> Result<Vec<F>, PolyError> {
        if coeffs.len() != self.n {
            return Err(PolyError::BadLength {
                got: coeffs.len(),
                n: self.n,
            });
        }
        ntt_in_place(&mut coeffs, self.omega);
        Ok(coeffs)
    }
}

/// In-place iterative radix-2 NTT with root `omega` (forward or inverse
/// depending on which root is passed).
fn ntt_in_place<F: Field>(a: &mut [F], omega: F) {
    let n = a.len();
    debug_assert!(n.is_power_of_two());
    let log_n = n.trailing_zeros();

    // Bit-reversal permutation.
    if log_n > 0 {
        for i in 0..n {
            let j = ((i as u32).reverse_bits() >> (32 - log_n)) as usize;
            if i < j {
                a.swap(i, j);
            }
        }
    }

    let mut len = 2;
    while len <= n {
        let w_len = omega.pow([(n / len) as u64]);
        for chunk in a.chunks_mut(len) {
            let mut w = F::one();
            for i in 0..len / 2 {
                let u = chunk[i];
                let v = chunk[i + len / 2] * w;
                chunk[i] = u + v;
                chunk[i + len / 2] = u - v;
                w *= w_len;
            }
        }
        len <<= 1;
    }
}

/// Horner evaluation of `Σ coeffs[i] · x^i`.
pub fn poly_eval<F: Field>(coeffs: &[F], x: F) -> F {
    let mut acc = F::zero();
    for c in coeffs.iter().rev() {
        acc = acc * x + c;
    }
    acc
}

/// Schoolbook product of two coefficient vectors.
pub fn poly_mul<F: Field>(a: &[F], b: &[F]) -> Vec<F> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![F::zero(); a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += *x * y;
        }
    }
    out
}

/// Componentwise sum of coefficient vectors of possibly different degrees.
pub fn poly_add<F: Field>(mut a: Vec<F>, b: &[F]) -> Vec<F> {
    if b.len() > a.len() {
        a.resize(b.len(), F::zero());
    }
    for (x, y) in a.iter_mut().zip(b) {
        *x += y;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field64;
    use ark_ff::UniformRand;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn ntt_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        for log_n in 0..6u32 {
            let n = 1usize << log_n;
            let d = EvalDomain::<Field64>::new(n).unwrap();
            let coeffs: Vec<Field64> = (0..n).map(|_| Field64::rand(&mut rng)).collect();
            let evals = d.evaluate(coeffs.clone()).unwrap();
            assert_eq!(d.interpolate(evals).unwrap(), coeffs);
        }
    }

    #[test]
    fn interpolation_matches_pointwise_eval() {
        let n = 8;
        let d = EvalDomain::<Field64>::new(n).unwrap();
        let evals: Vec<Field64> = (0..n as u64).map(Field64::from).collect();
        let coeffs = d.interpolate(evals.clone()).unwrap();
        for (k, want) in evals.iter().enumerate() {
            assert_eq!(poly_eval(&coeffs, d.element(k)), *want);
        }
    }

    #[test]
    fn product_degree_and_values() {
        let a = vec![Field64::from(1u64), Field64::from(2u64)];
        let b = vec![Field64::from(3u64), Field64::from(4u64), Field64::from(5u64)];
        let p = poly_mul(&a, &b);
        assert_eq!(p.len(), 4);
        let x = Field64::from(9u64);
        assert_eq!(poly_eval(&p, x), poly_eval(&a, x) * poly_eval(&b, x));
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(EvalDomain::<Field64>::new(0).is_err());
        assert!(EvalDomain::<Field64>::new(3).is_err());
        let d = EvalDomain::<Field64>::new(4).unwrap();
        assert!(d.interpolate(vec![Field64::from(1u64); 3]).is_err());
    }

    #[test]
    fn domain_membership() {
        let d = EvalDomain::<Field64>::new(8).unwrap();
        assert!(d.contains(&d.element(3)));
        assert!(!d.contains(&Field64::from(5u64)));
    }
}
