//! Extendable-output functions and domain separation
//!
//! Two XOFs drive all key expansion:
//!
//! - [`XofTurboShake128`] (32-byte seeds) is the workhorse for the VDAF layer:
//!   proof-share expansion, prove/query randomness, joint-randomness
//!   derivation. Every absorb is prefixed with a length-delimited
//!   domain-separation tag so independent usages can never collide.
//! - [`XofFixedKeyAes128`] (16-byte seeds) is the tree PRG inside the VIDPF.
//!   One AES key is derived per (tag, binder) pair; each output block is a
//!   Matyas–Meyer–Oseas compression of `seed ⊕ block_index` through the σ
//!   permutation, so extending a seed costs two AES block calls instead of a
//!   full hash.
//!
//! Field-element output uses rejection sampling: fixed-width little-endian
//! chunks are read until one decodes canonically.

#![forbid(unsafe_code)]

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::{TurboShake128, TurboShake128Core, TurboShake128Reader};

use crate::field::MasticField;

/// Seed size of [`XofTurboShake128`]; also the verification-key size.
pub const SEED_SIZE: usize = 32;

/// A 32-byte seed for the VDAF-layer XOF.
pub type Seed = [u8; SEED_SIZE];

/// TurboSHAKE domain-separation byte for direct XOF use.
const DS_XOF: u8 = 1;
/// TurboSHAKE domain-separation byte for fixed-AES-key derivation.
const DS_FIXED_KEY: u8 = 2;

/// Usage codes: each names one derivation and maps to a distinct 4-byte tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Usage {
    /// Expansion of the helper's proof share (also used for the seeded
    /// weight share, matching the original wiring).
    ProofShare = 1,
    /// Prover randomness for the FLP.
    ProveRand = 2,
    /// Verifier randomness for the FLP, keyed by the verification key.
    QueryRand = 3,
    /// One Aggregator's contribution to the joint randomness.
    JointRandPart = 4,
    /// Combination of the two joint-randomness parts.
    JointRandSeed = 5,
    /// Expansion of the joint-randomness seed into field elements.
    JointRand = 6,
    /// VIDPF node extension (two child seeds + control bits).
    Extend = 7,
    /// VIDPF node conversion (next seed + weight vector).
    Convert = 8,
}

impl Usage {
    /// The 4-byte big-endian tag for this usage.
    pub fn code(self) -> [u8; 4] {
        (self as u32).to_be_bytes()
    }
}

/// Domain-separation tag: 4-byte usage code followed by the application
/// context string.
pub fn dst(ctx: &[u8], usage: Usage) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + ctx.len());
    out.extend_from_slice(&usage.code());
    out.extend_from_slice(ctx);
    out
}

/// A seeded XOF stream.
pub trait Xof {
    /// Fill `out` with the next output bytes.
    fn fill(&mut self, out: &mut [u8]);

    /// Read `len` field elements by rejection sampling fixed-width
    /// little-endian chunks.
    fn next_vec<F: MasticField>(&mut self, len: usize) -> Vec<F> {
        let mut out = Vec::with_capacity(len);
        let mut buf = vec![0u8; F::ENCODED_SIZE];
        while out.len() < len {
            self.fill(&mut buf);
            if let Some(x) = F::from_random_bytes(&buf) {
                out.push(x);
            }
        }
        out
    }

    /// Read a 32-byte seed.
    fn next_seed(&mut self) -> Seed {
        let mut out = [0u8; SEED_SIZE];
        self.fill(&mut out);
        out
    }
}

/// TurboSHAKE128-based XOF with length-delimited domain separation.
pub struct XofTurboShake128 {
    reader: TurboShake128Reader,
}

impl XofTurboShake128 {
    /// Seed a stream. `dst` must be shorter than 256 bytes.
    pub fn init(seed: &[u8], dst: &[u8], binder: &[u8]) -> Self {
        assert!(dst.len() < 256, "domain-separation tag too long");
        assert!(seed.len() < 256, "seed too long");
        let mut h = TurboShake128::from_core(TurboShake128Core::new(DS_XOF));
        h.update(&[dst.len() as u8]);
        h.update(dst);
        h.update(&[seed.len() as u8]);
        h.update(seed);
        h.update(binder);
        Self {
            reader: h.finalize_xof(),
        }
    }

    /// One-shot seed derivation.
    pub fn derive_seed(seed: &Seed, dst: &[u8], binder: &[u8]) -> Seed {
        Self::init(seed, dst, binder).next_seed()
    }

    /// One-shot expansion into a field vector.
    pub fn expand_into_vec<F: MasticField>(
        seed: &Seed,
        dst: &[u8],
        binder: &[u8],
        len: usize,
    ) -> Vec<F> {
        Self::init(seed, dst, binder).next_vec(len)
    }
}

impl Xof for XofTurboShake128 {
    fn fill(&mut self, out: &mut [u8]) {
        self.reader.read(out);
    }
}

/// Seed size of [`XofFixedKeyAes128`].
pub const VIDPF_SEED_SIZE: usize = 16;

/// A 16-byte VIDPF tree seed.
pub type VidpfSeed = [u8; VIDPF_SEED_SIZE];

/// Fixed-key AES-128 XOF used by the VIDPF tree walk.
pub struct XofFixedKeyAes128 {
    cipher: Aes128,
    seed: VidpfSeed,
    block_index: u128,
    buf: [u8; 16],
    buf_used: usize,
}

impl XofFixedKeyAes128 {
    /// Seed a stream. The AES key depends only on `(dst, binder)`, the seed
    /// enters through the per-block compression input.
    pub fn init(seed: &VidpfSeed, dst: &[u8], binder: &[u8]) -> Self {
        assert!(dst.len() < 256, "domain-separation tag too long");
        let mut h = TurboShake128::from_core(TurboShake128Core::new(DS_FIXED_KEY));
        h.update(&[dst.len() as u8]);
        h.update(dst);
        h.update(binder);
        let mut key = [0u8; 16];
        h.finalize_xof().read(&mut key);
        Self {
            cipher: Aes128::new(GenericArray::from_slice(&key)),
            seed: *seed,
            block_index: 0,
            buf: [0u8; 16],
            buf_used: 16,
        }
    }

    /// MMO compression `E_k(σ(x)) ⊕ σ(x)` with `σ(x_lo ‖ x_hi) = x_hi ‖ (x_lo ⊕ x_hi)`.
    fn hash_block(&self, x: [u8; 16]) -> [u8; 16] {
        let mut sigma = [0u8; 16];
        sigma[..8].copy_from_slice(&x[8..]);
        for i in 0..8 {
            sigma[8 + i] = x[i] ^ x[8 + i];
        }
        let mut block = GenericArray::clone_from_slice(&sigma);
        self.cipher.encrypt_block(&mut block);
        let mut out = [0u8; 16];
        for i in 0..16 {
            out[i] = block[i] ^ sigma[i];
        }
        out
    }

    fn next_block(&mut self) -> [u8; 16] {
        let ctr = self.block_index.to_le_bytes();
        self.block_index += 1;
        let mut x = [0u8; 16];
        for i in 0..16 {
            x[i] = self.seed[i] ^ ctr[i];
        }
        self.hash_block(x)
    }

    /// Read a 16-byte seed.
    pub fn next_vidpf_seed(&mut self) -> VidpfSeed {
        let mut out = [0u8; VIDPF_SEED_SIZE];
        self.fill(&mut out);
        out
    }
}

impl Xof for XofFixedKeyAes128 {
    fn fill(&mut self, out: &mut [u8]) {
        let mut filled = 0;
        while filled < out.len() {
            if self.buf_used == 16 {
                self.buf = self.next_block();
                self.buf_used = 0;
            }
            let take = (16 - self.buf_used).min(out.len() - filled);
            out[filled..filled + take]
                .copy_from_slice(&self.buf[self.buf_used..self.buf_used + take]);
            self.buf_used += take;
            filled += take;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field64;
    use ark_ff::PrimeField;

    #[test]
    fn deterministic_streams() {
        let seed = [7u8; 32];
        let a = XofTurboShake128::derive_seed(&seed, b"tag", b"binder");
        let b = XofTurboShake128::derive_seed(&seed, b"tag", b"binder");
        assert_eq!(a, b);
    }

    #[test]
    fn domain_separation_changes_output() {
        let seed = [0u8; 32];
        let a = XofTurboShake128::derive_seed(&seed, &dst(b"app", Usage::ProveRand), b"");
        let b = XofTurboShake128::derive_seed(&seed, &dst(b"app", Usage::QueryRand), b"");
        let c = XofTurboShake128::derive_seed(&seed, &dst(b"app2", Usage::ProveRand), b"");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn binder_changes_output() {
        let seed = [1u8; 32];
        let a = XofTurboShake128::derive_seed(&seed, b"t", b"x");
        let b = XofTurboShake128::derive_seed(&seed, b"t", b"y");
        assert_ne!(a, b);
    }

    #[test]
    fn length_prefix_prevents_sliding() {
        // (dst="ab", seed starts "c…") must differ from (dst="a", seed "bc…").
        let mut s1 = [0u8; 32];
        s1[0] = b'c';
        let mut s2 = [0u8; 32];
        s2[0] = b'b';
        s2[1] = b'c';
        let a = XofTurboShake128::init(&s1, b"ab", b"").next_seed();
        let b = XofTurboShake128::init(&s2, b"a", b"").next_seed();
        assert_ne!(a, b);
    }

    #[test]
    fn expanded_elements_are_canonical() {
        let seed = [9u8; 32];
        let v: Vec<Field64> = XofTurboShake128::expand_into_vec(&seed, b"t", b"", 64);
        assert_eq!(v.len(), 64);
        for x in v {
            assert!(x.into_bigint() < Field64::MODULUS);
        }
    }

    #[test]
    fn fixed_key_xof_is_deterministic_and_separated() {
        let seed = [3u8; 16];
        let mut x1 = XofFixedKeyAes128::init(&seed, b"extend", b"nonce");
        let mut x2 = XofFixedKeyAes128::init(&seed, b"extend", b"nonce");
        let mut a = [0u8; 40];
        let mut b = [0u8; 40];
        x1.fill(&mut a);
        x2.fill(&mut b);
        assert_eq!(a, b);

        let mut x3 = XofFixedKeyAes128::init(&seed, b"convert", b"nonce");
        let mut c = [0u8; 40];
        x3.fill(&mut c);
        assert_ne!(a, c);

        let mut x4 = XofFixedKeyAes128::init(&[4u8; 16], b"extend", b"nonce");
        let mut d = [0u8; 40];
        x4.fill(&mut d);
        assert_ne!(a, d);
    }

    #[test]
    fn fixed_key_xof_split_reads_match_one_read(){
        let seed = [5u8; 16];
        let mut whole = XofFixedKeyAes128::init(&seed, b"t", b"");
        let mut split = XofFixedKeyAes128::init(&seed, b"t", b"");
        let mut a = [0u8; 33];
        whole.fill(&mut a);
        let mut b = [0u8; 33];
        split.fill(&mut b[..10]);
        split.fill(&mut b[10..26]);
        split.fill(&mut b[26..]);
        assert_eq!(a, b);
    }
}
