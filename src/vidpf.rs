//! Verifiable Incremental Distributed Point Function
//!
//! A VIDPF splits a point function `alpha ↦ beta` into two keys. Each key
//! expands, level by level, into a share of the binary prefix tree whose
//! node values reconstruct to `beta` on the `alpha` path and to zero
//! everywhere else. Public correction words steer both parties' seeds back
//! together off-path; per-level one-hot masks and a running transcript hash
//! let the two evaluators detect (by comparing 64 proof bytes) any key pair
//! whose tree is not one-hot or whose levels are inconsistent.
//!
//! Corrections conditioned on control bits are branch-free: byte masks for
//! seeds, field embeddings for weights. The transcript renders node indices
//! in decimal ASCII; this matches the existing deployments and must not be
//! changed.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::marker::PhantomData;

use ark_ff::One;
use sha3::{Digest, Sha3_256};

use crate::field::{
    correct_bit, encode_vec, vec_add, vec_neg, vec_sub, ControlBit, MasticField,
};
use crate::prefix::BitPath;
use crate::xof::{dst, Usage, Xof, XofFixedKeyAes128, VidpfSeed, VIDPF_SEED_SIZE};

/// Length in bytes of the evaluation proof (one-hot proof ‖ path proof).
pub const EVAL_PROOF_LEN: usize = 64;

/// Errors surfaced by key generation and evaluation.
#[allow(missing_docs)] // the display strings are the documentation
#[derive(Debug, thiserror::Error)]
pub enum VidpfError {
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),
    #[error("candidate prefixes contain a duplicate")]
    DuplicatePrefix,
}

/// Per-level public correction material.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrectionWord<F> {
    /// Seed correction, XORed into the losing child's seed.
    pub seed: VidpfSeed,
    /// Control-bit corrections for the left and right child.
    pub ctrl: [ControlBit; 2],
    /// Weight correction; reconstructs `beta` on-path, zero off-path.
    pub weight: Vec<F>,
}

/// The public share: correction words plus per-level one-hot proof masks.
#[derive(Clone, Debug, PartialEq)]
pub struct VidpfPublicShare<F> {
    /// One correction word per tree level.
    pub correction_words: Vec<CorrectionWord<F>>,
    /// One 32-byte one-hot mask per tree level.
    pub cs_proofs: Vec<[u8; 32]>,
}

/// Result of evaluating one key at a prefix set.
#[derive(Clone, Debug)]
pub struct VidpfEval<F> {
    /// This party's share of the tree value at level 0 (`y(0) + y(1)`),
    /// sign-adjusted so the two shares sum to `beta`.
    pub beta_share: Vec<F>,
    /// One share per candidate prefix, in the caller's prefix order.
    pub out_shares: Vec<Vec<F>>,
    /// One-hot proof ‖ path proof; equal on both parties iff the tree share
    /// pair is consistent.
    pub proof: [u8; EVAL_PROOF_LEN],
}

/// One memoized node of the prefix-tree share.
#[derive(Clone, Debug)]
struct NodeShare<F> {
    seed: VidpfSeed,
    ctrl: ControlBit,
    y: Vec<F>,
    proof: [u8; 32],
}

/// A VIDPF instance over field `F` with a fixed tree depth and value length.
#[derive(Clone, Debug)]
pub struct Vidpf<F> {
    bits: u16,
    value_len: usize,
    _field: PhantomData<F>,
}

impl<F: MasticField> Vidpf<F> {
    /// Random bytes consumed by [`Vidpf::gen`].
    pub const RAND_SIZE: usize = 2 * VIDPF_SEED_SIZE;

    /// Create an instance; `bits` is the depth (`alpha` length) and
    /// `value_len` the per-node vector length.
    pub fn new(bits: u16, value_len: usize) -> Result<Self, VidpfError> {
        if bits == 0 || bits > 128 {
            return Err(VidpfError::InvalidArg("tree depth must be in 1..=128"));
        }
        if value_len == 0 {
            return Err(VidpfError::InvalidArg("value length must be positive"));
        }
        Ok(Self {
            bits,
            value_len,
            _field: PhantomData,
        })
    }

    /// Tree depth in bits.
    pub fn bits(&self) -> u16 {
        self.bits
    }

    /// Per-node value vector length.
    pub fn value_len(&self) -> usize {
        self.value_len
    }

    /// Generate a key pair for the point function `alpha ↦ beta`.
    ///
    /// `rand` must be exactly [`Vidpf::RAND_SIZE`] bytes; the two halves
    /// become the parties' root seeds (and are returned as the keys).
    pub fn gen(
        &self,
        alpha: &BitPath,
        beta: &[F],
        binder: &[u8],
        rand: &[u8],
    ) -> Result<(VidpfPublicShare<F>, [VidpfSeed; 2]), VidpfError> {
        if alpha.len() != self.bits {
            return Err(VidpfError::InvalidArg("alpha length does not match tree depth"));
        }
        if beta.len() != self.value_len {
            return Err(VidpfError::InvalidArg("beta length does not match value length"));
        }
        if rand.len() != Self::RAND_SIZE {
            return Err(VidpfError::InvalidArg("randomness has incorrect length"));
        }

        let mut keys = [[0u8; VIDPF_SEED_SIZE]; 2];
        keys[0].copy_from_slice(&rand[..VIDPF_SEED_SIZE]);
        keys[1].copy_from_slice(&rand[VIDPF_SEED_SIZE..]);

        let mut seed = keys;
        let mut ctrl = [ControlBit::ZERO, ControlBit::ONE];
        let mut correction_words = Vec::with_capacity(usize::from(self.bits));
        let mut cs_proofs = Vec::with_capacity(usize::from(self.bits));

        for i in 0..self.bits {
            let node = alpha.truncated(i + 1).index();
            let bit = ControlBit::from_lsb(node as u8);
            let keep = usize::from(bit.as_u8());
            let lose = 1 - keep;

            let (s_0, t_0) = self.extend(&seed[0], binder);
            let (s_1, t_1) = self.extend(&seed[1], binder);
            let seed_cw = xor_seed(&s_0[lose], &s_1[lose]);
            let ctrl_cw = [
                t_0[0] + t_1[0] + ControlBit::ONE + bit,
                t_0[1] + t_1[1] + bit,
            ];

            let (next_0, w_0) =
                self.convert(&xor_seed(&s_0[keep], &ctrl[0].mask(&seed_cw)), binder);
            let (next_1, w_1) =
                self.convert(&xor_seed(&s_1[keep], &ctrl[1].mask(&seed_cw)), binder);
            seed = [next_0, next_1];
            ctrl = [
                correct_bit(t_0[keep], ctrl_cw[keep], ctrl[0]),
                correct_bit(t_1[keep], ctrl_cw[keep], ctrl[1]),
            ];

            // w_cw reconstructs beta on-path; the sign flip keeps the pair
            // additive when party 1 ends up with the set control bit.
            let mut w_cw = vec_add(vec_sub(beta.to_vec(), &w_0), &w_1);
            let flip = F::one() - F::from(2u64) * ctrl[1].to_field::<F>();
            for w in w_cw.iter_mut() {
                *w *= flip;
            }

            cs_proofs.push(xor_digest(
                &node_hash(node, i, &seed[0]),
                &node_hash(node, i, &seed[1]),
            ));
            correction_words.push(CorrectionWord {
                seed: seed_cw,
                ctrl: ctrl_cw,
                weight: w_cw,
            });
        }

        Ok((
            VidpfPublicShare {
                correction_words,
                cs_proofs,
            },
            keys,
        ))
    }

    /// Evaluate one key share at every prefix in `prefixes` (all of length
    /// `level + 1`), producing output shares and the evaluation proof.
    pub fn eval(
        &self,
        agg_id: u8,
        public: &VidpfPublicShare<F>,
        key: &VidpfSeed,
        level: u16,
        prefixes: &[BitPath],
        binder: &[u8],
    ) -> Result<VidpfEval<F>, VidpfError> {
        if agg_id > 1 {
            return Err(VidpfError::InvalidArg("aggregator id must be 0 or 1"));
        }
        if level >= self.bits {
            return Err(VidpfError::InvalidArg("level exceeds tree depth"));
        }
        if public.correction_words.len() != usize::from(self.bits)
            || public.cs_proofs.len() != usize::from(self.bits)
        {
            return Err(VidpfError::InvalidArg("public share has wrong depth"));
        }
        let mut seen = std::collections::HashSet::with_capacity(prefixes.len());
        for prefix in prefixes {
            if prefix.len() != level + 1 {
                return Err(VidpfError::InvalidArg("prefix length does not match level"));
            }
            if !seen.insert(prefix.index()) {
                return Err(VidpfError::DuplicatePrefix);
            }
        }

        // Prefix-tree share: one arena per level, sibling pairs inserted
        // together so the path proof always finds both children.
        let mut tree: Vec<HashMap<u128, NodeShare<F>>> =
            vec![HashMap::new(); usize::from(level) + 1];

        let root_proof = empty_hash();
        let mut pi = root_proof;
        for prefix in prefixes {
            let mut seed = *key;
            let mut ctrl = ControlBit::from_lsb(agg_id);
            let mut walk_pi = root_proof;
            for l in 0..=level {
                let node = prefix.truncated(l + 1).index();
                for child in [node & !1, node | 1] {
                    if !tree[usize::from(l)].contains_key(&child) {
                        let share = self.eval_next(
                            &seed,
                            ctrl,
                            &public.correction_words[usize::from(l)],
                            &public.cs_proofs[usize::from(l)],
                            l,
                            child,
                            &walk_pi,
                            binder,
                        );
                        tree[usize::from(l)].insert(child, share);
                    }
                }
                let entry = &tree[usize::from(l)][&node];
                seed = entry.seed;
                ctrl = entry.ctrl;
                walk_pi = entry.proof;
            }
            pi = walk_pi;
        }

        // Path proof: each intermediate node must equal the sum of its
        // children, so honest parties hash identical (zero-share) vectors.
        let mut hasher = Sha3_256::new();
        for prefix in prefixes {
            for l in 0..level {
                let node = prefix.truncated(l + 1).index();
                let parent = &tree[usize::from(l)][&node].y;
                let left = &tree[usize::from(l) + 1][&(node << 1)].y;
                let right = &tree[usize::from(l) + 1][&((node << 1) | 1)].y;
                let diff = vec_sub(parent.clone(), &vec_add(left.clone(), right));
                hasher.update(&encode_vec(&diff));
            }
        }
        let path_proof: [u8; 32] = hasher.finalize().into();

        let negate = agg_id == 1;
        let out_shares = prefixes
            .iter()
            .map(|prefix| {
                let y = tree[usize::from(level)][&prefix.index()].y.clone();
                if negate {
                    vec_neg(y)
                } else {
                    y
                }
            })
            .collect();

        let beta_share = {
            let y = vec_add(tree[0][&0].y.clone(), &tree[0][&1].y);
            if negate {
                vec_neg(y)
            } else {
                y
            }
        };

        let mut proof = [0u8; EVAL_PROOF_LEN];
        proof[..32].copy_from_slice(&pi);
        proof[32..].copy_from_slice(&path_proof);

        Ok(VidpfEval {
            beta_share,
            out_shares,
            proof,
        })
    }

    /// One step of the tree walk: expand the parent into the child `node`,
    /// applying corrections and extending the one-hot transcript.
    #[allow(clippy::too_many_arguments)]
    fn eval_next(
        &self,
        prev_seed: &VidpfSeed,
        prev_ctrl: ControlBit,
        cw: &CorrectionWord<F>,
        cs_proof: &[u8; 32],
        level: u16,
        node: u128,
        pi: &[u8; 32],
        binder: &[u8],
    ) -> NodeShare<F> {
        let (mut s, mut t) = self.extend(prev_seed, binder);
        let correction = prev_ctrl.mask(&cw.seed);
        s[0] = xor_seed(&s[0], &correction);
        s[1] = xor_seed(&s[1], &correction);
        t[0] += cw.ctrl[0] * prev_ctrl;
        t[1] += cw.ctrl[1] * prev_ctrl;

        let bit = usize::from(node as u8 & 1);
        let next_ctrl = t[bit];
        let (next_seed, w) = self.convert(&s[bit], binder);
        let scale = next_ctrl.to_field::<F>();
        let y: Vec<F> = w
            .iter()
            .zip(&cw.weight)
            .map(|(w_i, cw_i)| *w_i + *cw_i * scale)
            .collect();

        let pi_prime = node_hash(node, level, &next_seed);
        let masked_cs = next_ctrl.mask(cs_proof);
        let mut h = [0u8; 32];
        for i in 0..32 {
            h[i] = pi[i] ^ pi_prime[i] ^ masked_cs[i];
        }
        let digest: [u8; 32] = Sha3_256::digest(h).into();
        let mut next_pi = *pi;
        for i in 0..32 {
            next_pi[i] ^= digest[i];
        }

        NodeShare {
            seed: next_seed,
            ctrl: next_ctrl,
            y,
            proof: next_pi,
        }
    }

    /// Expand a seed into two child seeds and two control bits.
    fn extend(&self, seed: &VidpfSeed, binder: &[u8]) -> ([VidpfSeed; 2], [ControlBit; 2]) {
        let mut xof = XofFixedKeyAes128::init(seed, &dst(b"", Usage::Extend), binder);
        let s = [xof.next_vidpf_seed(), xof.next_vidpf_seed()];
        let mut bits = [0u8; 1];
        xof.fill(&mut bits);
        (
            s,
            [
                ControlBit::from_lsb(bits[0]),
                ControlBit::from_lsb(bits[0] >> 1),
            ],
        )
    }

    /// Convert a seed into the next-level seed and a weight vector.
    fn convert(&self, seed: &VidpfSeed, binder: &[u8]) -> (VidpfSeed, Vec<F>) {
        let mut xof = XofFixedKeyAes128::init(seed, &dst(b"", Usage::Convert), binder);
        let next = xof.next_vidpf_seed();
        let w = xof.next_vec(self.value_len);
        (next, w)
    }

    /// Byte-exact encoding of the public share (correction words, then
    /// one-hot masks); also the joint-randomness binding image.
    pub fn encode_public_share(public: &VidpfPublicShare<F>) -> Vec<u8> {
        let mut out = Vec::new();
        for cw in &public.correction_words {
            out.extend_from_slice(&cw.seed);
            out.push(cw.ctrl[0].as_u8() | (cw.ctrl[1].as_u8() << 1));
            out.extend_from_slice(&encode_vec(&cw.weight));
        }
        for cs in &public.cs_proofs {
            out.extend_from_slice(cs);
        }
        out
    }
}

/// `SHA3-256(decimal(node) ‖ level_LE16 ‖ seed)`.
fn node_hash(node: u128, level: u16, seed: &VidpfSeed) -> [u8; 32] {
    let mut h = Sha3_256::new();
    h.update(node.to_string().as_bytes());
    h.update(level.to_le_bytes());
    h.update(seed);
    h.finalize().into()
}

/// `SHA3-256("")`, the transcript's initial value.
fn empty_hash() -> [u8; 32] {
    Sha3_256::digest(b"").into()
}

fn xor_seed(a: &VidpfSeed, b: &VidpfSeed) -> VidpfSeed {
    let mut out = [0u8; VIDPF_SEED_SIZE];
    for i in 0..VIDPF_SEED_SIZE {
        out[i] = a[i] ^ b[i];
    }
    out
}

fn xor_digest(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{zeros, Field128};
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn gen_rand(rng: &mut StdRng) -> Vec<u8> {
        let mut rand = vec![0u8; Vidpf::<Field128>::RAND_SIZE];
        rng.fill_bytes(&mut rand);
        rand
    }

    /// Evaluate both keys, assert the proofs agree, and return the summed
    /// output shares.
    fn eval_and_reconstruct(
        vidpf: &Vidpf<Field128>,
        public: &VidpfPublicShare<Field128>,
        keys: &[VidpfSeed; 2],
        level: u16,
        prefixes: &[BitPath],
        binder: &[u8],
    ) -> Vec<Vec<Field128>> {
        let eval_0 = vidpf.eval(0, public, &keys[0], level, prefixes, binder).unwrap();
        let eval_1 = vidpf.eval(1, public, &keys[1], level, prefixes, binder).unwrap();
        assert_eq!(eval_0.proof, eval_1.proof, "evaluation proofs must agree");
        eval_0
            .out_shares
            .into_iter()
            .zip(eval_1.out_shares)
            .map(|(a, b)| vec_add(a, &b))
            .collect()
    }

    #[test]
    fn counts_at_first_level() {
        let vidpf = Vidpf::<Field128>::new(2, 1).unwrap();
        let binder = b"some nonce";
        let beta = vec![Field128::from(1u64)];
        let measurements = [0b10u128, 0b00, 0b11, 0b01, 0b11];
        let prefixes = [BitPath::new(0, 1).unwrap(), BitPath::new(1, 1).unwrap()];

        let mut rng = StdRng::seed_from_u64(1);
        let mut out = vec![zeros::<Field128>(1); prefixes.len()];
        for alpha in measurements {
            let alpha = BitPath::new(alpha, 2).unwrap();
            let (public, keys) = vidpf.gen(&alpha, &beta, binder, &gen_rand(&mut rng)).unwrap();
            let sums = eval_and_reconstruct(&vidpf, &public, &keys, 0, &prefixes, binder);
            for (acc, s) in out.iter_mut().zip(sums) {
                *acc = vec_add(acc.clone(), &s);
            }
        }
        assert_eq!(out[0], vec![Field128::from(2u64)]);
        assert_eq!(out[1], vec![Field128::from(3u64)]);
    }

    #[test]
    fn counts_at_level_five_of_sixteen() {
        let vidpf = Vidpf::<Field128>::new(16, 1).unwrap();
        let binder = b"some nonce";
        let beta = vec![Field128::from(1u64)];
        let measurements = [0xF0F0u128, 0xF0F1, 0xF0F2, 0x04F2];
        let prefixes = [
            BitPath::new(0b000001, 6).unwrap(),
            BitPath::new(0b111100, 6).unwrap(),
            BitPath::new(0b111101, 6).unwrap(),
        ];

        let mut rng = StdRng::seed_from_u64(2);
        let mut out = vec![zeros::<Field128>(1); prefixes.len()];
        for alpha in measurements {
            let alpha = BitPath::new(alpha, 16).unwrap();
            let (public, keys) = vidpf.gen(&alpha, &beta, binder, &gen_rand(&mut rng)).unwrap();
            let sums = eval_and_reconstruct(&vidpf, &public, &keys, 5, &prefixes, binder);
            for (acc, s) in out.iter_mut().zip(sums) {
                *acc = vec_add(acc.clone(), &s);
            }
        }
        assert_eq!(out[0], vec![Field128::from(1u64)]);
        assert_eq!(out[1], vec![Field128::from(3u64)]);
        assert_eq!(out[2], vec![Field128::from(0u64)]);
    }

    #[test]
    fn on_path_reconstructs_beta_at_every_level() {
        let bits = 8u16;
        let vidpf = Vidpf::<Field128>::new(bits, 3).unwrap();
        let binder = b"ctx and nonce";
        let beta: Vec<Field128> = [5u64, 6, 7].iter().map(|&x| Field128::from(x)).collect();
        let alpha = BitPath::new(0xAB, bits).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let (public, keys) = vidpf.gen(&alpha, &beta, binder, &gen_rand(&mut rng)).unwrap();

        for level in 0..bits {
            // The on-path prefix plus one off-path sibling.
            let on = alpha.truncated(level + 1);
            let off = BitPath::new(on.index() ^ 1, level + 1).unwrap();
            let sums = eval_and_reconstruct(&vidpf, &public, &keys, level, &[on, off], binder);
            assert_eq!(sums[0], beta, "level {level} on-path value");
            assert_eq!(sums[1], zeros::<Field128>(3), "level {level} off-path value");
        }
    }

    #[test]
    fn beta_share_reconstructs_beta() {
        let vidpf = Vidpf::<Field128>::new(4, 2).unwrap();
        let binder = b"b";
        let beta: Vec<Field128> = vec![Field128::from(9u64), Field128::from(11u64)];
        let alpha = BitPath::new(0b0110, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let (public, keys) = vidpf.gen(&alpha, &beta, binder, &gen_rand(&mut rng)).unwrap();

        let prefixes = [BitPath::new(0, 2).unwrap(), BitPath::new(1, 2).unwrap()];
        let eval_0 = vidpf.eval(0, &public, &keys[0], 1, &prefixes, binder).unwrap();
        let eval_1 = vidpf.eval(1, &public, &keys[1], 1, &prefixes, binder).unwrap();
        assert_eq!(vec_add(eval_0.beta_share, &eval_1.beta_share), beta);
    }

    #[test]
    fn tampered_key_changes_the_proof() {
        let vidpf = Vidpf::<Field128>::new(4, 1).unwrap();
        let binder = b"b";
        let beta = vec![Field128::from(1u64)];
        let alpha = BitPath::new(0b1010, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let (public, keys) = vidpf.gen(&alpha, &beta, binder, &gen_rand(&mut rng)).unwrap();

        let prefixes: Vec<BitPath> = (0..4u128).map(|i| BitPath::new(i, 2).unwrap()).collect();
        let eval_0 = vidpf.eval(0, &public, &keys[0], 1, &prefixes, binder).unwrap();

        let mut bad_key = keys[1];
        bad_key[0] ^= 0x01;
        let eval_bad = vidpf.eval(1, &public, &bad_key, 1, &prefixes, binder).unwrap();
        assert_ne!(eval_0.proof, eval_bad.proof);
    }

    #[test]
    fn tampered_correction_word_changes_the_proof() {
        let vidpf = Vidpf::<Field128>::new(4, 1).unwrap();
        let binder = b"b";
        let beta = vec![Field128::from(1u64)];
        let alpha = BitPath::new(0b1010, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(6);
        let (public, keys) = vidpf.gen(&alpha, &beta, binder, &gen_rand(&mut rng)).unwrap();

        let prefixes: Vec<BitPath> = (0..4u128).map(|i| BitPath::new(i, 2).unwrap()).collect();
        let eval_0 = vidpf.eval(0, &public, &keys[0], 1, &prefixes, binder).unwrap();

        let mut bad = public.clone();
        bad.correction_words[1].seed[3] ^= 0x80;
        let eval_bad = vidpf.eval(1, &bad, &keys[1], 1, &prefixes, binder).unwrap();
        assert_ne!(eval_0.proof, eval_bad.proof);
    }

    #[test]
    fn argument_validation() {
        let vidpf = Vidpf::<Field128>::new(4, 1).unwrap();
        let binder = b"b";
        let beta = vec![Field128::from(1u64)];
        let alpha = BitPath::new(0b1010, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let (public, keys) = vidpf.gen(&alpha, &beta, binder, &gen_rand(&mut rng)).unwrap();

        let p = BitPath::new(0, 2).unwrap();
        assert!(matches!(
            vidpf.eval(2, &public, &keys[0], 1, &[p], binder),
            Err(VidpfError::InvalidArg(_))
        ));
        assert!(matches!(
            vidpf.eval(0, &public, &keys[0], 4, &[p], binder),
            Err(VidpfError::InvalidArg(_))
        ));
        assert!(matches!(
            vidpf.eval(0, &public, &keys[0], 2, &[p], binder),
            Err(VidpfError::InvalidArg(_))
        ));
        assert!(matches!(
            vidpf.eval(0, &public, &keys[0], 1, &[p, p], binder),
            Err(VidpfError::DuplicatePrefix)
        ));
        assert!(matches!(
            vidpf.gen(&alpha, &beta, binder, &[0u8; 7]),
            Err(VidpfError::InvalidArg(_))
        ));
    }
}
