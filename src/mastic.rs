//! The Mastic VDAF: sharding, preparation, aggregation, unsharding
//!
//! A client holds a measurement `(alpha, weight)`. Sharding splits it into a
//! public share plus one input share per Aggregator: a VIDPF key pair whose
//! tree encodes `[1, encode(weight)]` at leaf `alpha`, an additively shared
//! validity proof for the encoded weight, and an additively shared copy of
//! the encoding itself. Preparation evaluates the VIDPF at the collector's
//! chosen prefix set, cross-checks the two tree shares byte-for-byte through
//! the evaluation proof, and (once per collection) verifies the weight proof.
//! Surviving output shares are summed into aggregate shares and decoded per
//! prefix.
//!
//! Two details are load-bearing:
//!
//! - The FLP joint randomness is bound to the VIDPF public share, so the
//!   weight a client proves valid is the weight its tree actually carries.
//! - The evaluation proof carries a sign-normalized digest of
//!   `vidpf beta share − [1, weight share]`. The two digests agree exactly
//!   when the VIDPF payload and the separately shared weight encoding are
//!   shares of the same value, so a report mixing two different weights
//!   fails preparation as a VIDPF mismatch.

#![forbid(unsafe_code)]

use ark_ff::One;
use rand::{CryptoRng, RngCore};
use sha3::{Digest, Sha3_256};
use subtle::ConstantTimeEq;

use crate::field::{encode_vec, vec_add, vec_neg, vec_sub, zeros, MasticField};
use crate::flp::{Flp, FlpError, Valid};
use crate::flp_types::{Count, Histogram, MultihotCountVec, Sum, SumVec};
use crate::prefix::BitPath;
use crate::vidpf::{Vidpf, VidpfError, VidpfPublicShare, EVAL_PROOF_LEN};
use crate::xof::{dst, Seed, Usage, VidpfSeed, XofTurboShake128, SEED_SIZE};
use crate::{Field128, Field64, NONCE_SIZE};

/// A report nonce.
pub type Nonce = [u8; NONCE_SIZE];

/// Length of the preparation proof: VIDPF evaluation proof plus the
/// weight-consistency digest.
pub const PREP_PROOF_LEN: usize = EVAL_PROOF_LEN + 32;

/// Errors surfaced by the VDAF layer.
#[allow(missing_docs)] // the display strings are the documentation
#[derive(Debug, thiserror::Error)]
pub enum MasticError {
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),
    #[error(transparent)]
    Vidpf(#[from] VidpfError),
    #[error(transparent)]
    Flp(#[from] FlpError),
    #[error("aggregation parameter violates the sequencing rules")]
    AggParamOrder,
    #[error("VIDPF evaluation proofs disagree")]
    VidpfMismatch,
    #[error("weight validity proof was rejected")]
    FlpReject,
    #[error("expected an FLP verifier share")]
    MissingVerifier,
    #[error("expected a joint-randomness part")]
    MissingJointRandPart,
    #[error("expected a joint-randomness confirmation")]
    MissingConfirmation,
    #[error("joint-randomness confirmation does not match")]
    JointRandMismatch,
}

/// The collector's per-round parameter: a tree level, the candidate prefixes
/// at that level, and whether this round performs the weight check.
#[derive(Clone, Debug, PartialEq)]
pub struct AggParam {
    /// Tree level; prefixes have length `level + 1`.
    pub level: u16,
    /// Candidate prefixes, in collector order.
    pub prefixes: Vec<BitPath>,
    /// Whether the FLP weight check runs in this round.
    pub do_weight_check: bool,
}

/// The client's public share.
#[derive(Clone, Debug)]
pub struct PublicShare<F> {
    /// VIDPF correction words and one-hot masks.
    pub vidpf: VidpfPublicShare<F>,
    /// Joint-randomness parts, present iff the weight type needs joint
    /// randomness.
    pub joint_rand_parts: Option<[Seed; 2]>,
}

/// One Aggregator's input share.
#[derive(Clone, Debug)]
pub enum InputShare<F> {
    /// Aggregator 0 holds its proof share explicitly.
    Leader {
        /// VIDPF key.
        key: VidpfSeed,
        /// Additive share of the FLP proof.
        proof_share: Vec<F>,
        /// Joint-randomness blinding seed, if the weight type needs it.
        seed: Option<Seed>,
        /// Additive share of the encoded weight.
        beta_share: Vec<F>,
    },
    /// Aggregator 1 expands its proof share from a seed.
    Helper {
        /// VIDPF key.
        key: VidpfSeed,
        /// Seed expanding to the proof share (and doubling as the
        /// joint-randomness blind).
        seed: Seed,
        /// Additive share of the encoded weight.
        beta_share: Vec<F>,
    },
}

/// Per-report state carried from `prep_init` to `prep_next`.
#[derive(Clone, Debug)]
pub struct PrepState<F> {
    truncated_out_share: Vec<F>,
    joint_rand_seed: Option<Seed>,
}

/// The broadcast part of one Aggregator's preparation step.
#[derive(Clone, Debug)]
pub struct PrepShare<F> {
    /// Evaluation proof plus weight-consistency digest.
    pub eval_proof: [u8; PREP_PROOF_LEN],
    /// FLP verifier share, present iff this round runs the weight check.
    pub verifier_share: Option<Vec<F>>,
    /// Recomputed joint-randomness part, present iff joint randomness is in
    /// use and this round runs the weight check.
    pub joint_rand_part: Option<Seed>,
}

/// The combined preparation message: the confirmed joint-randomness seed, or
/// nothing when no confirmation is needed.
pub type PrepMessage = Option<Seed>;

/// A Mastic instance: a VIDPF of depth `bits` carrying `[1, encode(weight)]`
/// and an FLP for the weight type.
#[derive(Clone, Debug)]
pub struct Mastic<V: Valid> {
    bits: u16,
    vidpf: Vidpf<V::Field>,
    flp: Flp<V>,
}

impl<V: Valid> Mastic<V> {
    /// Create an instance for `bits`-bit paths and the given weight type.
    pub fn new(bits: u16, valid: V) -> Result<Self, MasticError> {
        let flp = Flp::new(valid);
        let vidpf = Vidpf::new(bits, 1 + flp.meas_len())?;
        Ok(Self { bits, vidpf, flp })
    }

    /// Path length in bits.
    pub fn bits(&self) -> u16 {
        self.bits
    }

    /// The weight-validity proof system.
    pub fn flp(&self) -> &Flp<V> {
        &self.flp
    }

    /// Random bytes consumed by [`Mastic::shard`].
    pub fn rand_size(&self) -> usize {
        let seeds = if self.flp.joint_rand_len() > 0 { 4 } else { 3 };
        Vidpf::<V::Field>::RAND_SIZE + seeds * SEED_SIZE
    }

    // -----------------------------------------------------------------------
    // Sharding
    // -----------------------------------------------------------------------

    /// Split a measurement into a public share and two input shares.
    pub fn shard(
        &self,
        ctx: &[u8],
        measurement: &(BitPath, V::Measurement),
        nonce: &Nonce,
        rand: &[u8],
    ) -> Result<(PublicShare<V::Field>, [InputShare<V::Field>; 2]), MasticError> {
        if rand.len() != self.rand_size() {
            return Err(MasticError::InvalidArg("randomness has incorrect length"));
        }
        tracing::debug!(
            bits = self.bits,
            joint_rand = self.flp.joint_rand_len() > 0,
            "sharding report"
        );
        if self.flp.joint_rand_len() > 0 {
            self.shard_with_joint_rand(ctx, measurement, nonce, rand)
        } else {
            self.shard_without_joint_rand(ctx, measurement, nonce, rand)
        }
    }

    /// [`Mastic::shard`] with randomness drawn from a caller-supplied CSPRNG.
    pub fn shard_with_rng<R: RngCore + CryptoRng>(
        &self,
        ctx: &[u8],
        measurement: &(BitPath, V::Measurement),
        nonce: &Nonce,
        rng: &mut R,
    ) -> Result<(PublicShare<V::Field>, [InputShare<V::Field>; 2]), MasticError> {
        let mut rand = vec![0u8; self.rand_size()];
        rng.fill_bytes(&mut rand);
        self.shard(ctx, measurement, nonce, &rand)
    }

    fn shard_without_joint_rand(
        &self,
        ctx: &[u8],
        measurement: &(BitPath, V::Measurement),
        nonce: &Nonce,
        rand: &[u8],
    ) -> Result<(PublicShare<V::Field>, [InputShare<V::Field>; 2]), MasticError> {
        let (vidpf_rand, rest) = rand.split_at(Vidpf::<V::Field>::RAND_SIZE);
        let (prove_rand_seed, rest) = split_seed(rest);
        let (helper_seed, rest) = split_seed(rest);
        let (beta_helper_seed, rest) = split_seed(rest);
        debug_assert!(rest.is_empty());

        let (alpha, weight) = measurement;
        let beta = self.flp.encode(weight)?;
        let (public, keys) =
            self.vidpf
                .gen(alpha, &vidpf_beta(&beta), &binder(ctx, nonce), vidpf_rand)?;

        let prove_rand = self.prove_rand(ctx, &prove_rand_seed);
        let proof = self.flp.prove(&beta, &prove_rand, &[])?;
        let helper_proof_share = self.helper_proof_share(ctx, &helper_seed);
        let leader_proof_share = vec_sub(proof, &helper_proof_share);

        let beta_helper_share = self.beta_share_from_seed(ctx, &beta_helper_seed);
        let beta_leader_share = vec_sub(beta, &beta_helper_share);

        Ok((
            PublicShare {
                vidpf: public,
                joint_rand_parts: None,
            },
            [
                InputShare::Leader {
                    key: keys[0],
                    proof_share: leader_proof_share,
                    seed: None,
                    beta_share: beta_leader_share,
                },
                InputShare::Helper {
                    key: keys[1],
                    seed: helper_seed,
                    beta_share: beta_helper_share,
                },
            ],
        ))
    }

    fn shard_with_joint_rand(
        &self,
        ctx: &[u8],
        measurement: &(BitPath, V::Measurement),
        nonce: &Nonce,
        rand: &[u8],
    ) -> Result<(PublicShare<V::Field>, [InputShare<V::Field>; 2]), MasticError> {
        let (vidpf_rand, rest) = rand.split_at(Vidpf::<V::Field>::RAND_SIZE);
        let (prove_rand_seed, rest) = split_seed(rest);
        let (leader_seed, rest) = split_seed(rest);
        let (helper_seed, rest) = split_seed(rest);
        let (beta_helper_seed, rest) = split_seed(rest);
        debug_assert!(rest.is_empty());

        let (alpha, weight) = measurement;
        let beta = self.flp.encode(weight)?;
        let (public, keys) =
            self.vidpf
                .gen(alpha, &vidpf_beta(&beta), &binder(ctx, nonce), vidpf_rand)?;

        let joint_rand_parts = [
            self.joint_rand_part(ctx, 0, &leader_seed, &keys[0], &public, nonce),
            self.joint_rand_part(ctx, 1, &helper_seed, &keys[1], &public, nonce),
        ];
        let joint_rand = self.joint_rand(ctx, &self.joint_rand_seed(ctx, &joint_rand_parts));

        let prove_rand = self.prove_rand(ctx, &prove_rand_seed);
        let proof = self.flp.prove(&beta, &prove_rand, &joint_rand)?;
        let helper_proof_share = self.helper_proof_share(ctx, &helper_seed);
        let leader_proof_share = vec_sub(proof, &helper_proof_share);

        let beta_helper_share = self.beta_share_from_seed(ctx, &beta_helper_seed);
        let beta_leader_share = vec_sub(beta, &beta_helper_share);

        Ok((
            PublicShare {
                vidpf: public,
                joint_rand_parts: Some(joint_rand_parts),
            },
            [
                InputShare::Leader {
                    key: keys[0],
                    proof_share: leader_proof_share,
                    seed: Some(leader_seed),
                    beta_share: beta_leader_share,
                },
                InputShare::Helper {
                    key: keys[1],
                    seed: helper_seed,
                    beta_share: beta_helper_share,
                },
            ],
        ))
    }

    // -----------------------------------------------------------------------
    // Aggregation-parameter discipline
    // -----------------------------------------------------------------------

    /// Whether `agg_param` may follow `previous` for the same report set:
    /// the weight check runs exactly once (in the first round), and levels
    /// strictly increase.
    pub fn is_valid(&self, agg_param: &AggParam, previous: &[AggParam]) -> bool {
        let weight_checked = (agg_param.do_weight_check && previous.is_empty())
            || (!agg_param.do_weight_check && previous.iter().any(|p| p.do_weight_check));
        let level_increased = match previous.last() {
            None => true,
            Some(last) => agg_param.level > last.level,
        };
        weight_checked && level_increased
    }

    /// [`Mastic::is_valid`] as a checked operation.
    pub fn check_agg_param(
        &self,
        agg_param: &AggParam,
        previous: &[AggParam],
    ) -> Result<(), MasticError> {
        if self.is_valid(agg_param, previous) {
            Ok(())
        } else {
            Err(MasticError::AggParamOrder)
        }
    }

    // -----------------------------------------------------------------------
    // Preparation
    // -----------------------------------------------------------------------

    /// One Aggregator's first (and only) preparation step.
    pub fn prep_init(
        &self,
        verify_key: &Seed,
        ctx: &[u8],
        agg_id: u8,
        agg_param: &AggParam,
        nonce: &Nonce,
        public_share: &PublicShare<V::Field>,
        input_share: &InputShare<V::Field>,
    ) -> Result<(PrepState<V::Field>, PrepShare<V::Field>), MasticError> {
        if agg_id > 1 {
            return Err(MasticError::InvalidArg("aggregator id must be 0 or 1"));
        }
        let (key, proof_share, seed, beta_share) =
            self.expand_input_share(ctx, agg_id, input_share)?;
        if beta_share.len() != self.flp.meas_len() {
            return Err(MasticError::InvalidArg("weight share has wrong length"));
        }

        let eval = self.vidpf.eval(
            agg_id,
            &public_share.vidpf,
            &key,
            agg_param.level,
            &agg_param.prefixes,
            &binder(ctx, nonce),
        )?;
        tracing::trace!(
            agg_id,
            level = agg_param.level,
            prefixes = agg_param.prefixes.len(),
            "evaluated VIDPF"
        );

        // Weight-consistency digest: a sign-normalized share of
        // `vidpf beta − [1, beta]`. The two Aggregators produce equal bytes
        // exactly when the shares reconstruct to zero.
        let mut diff = eval.beta_share.clone();
        if agg_id == 0 {
            diff[0] -= V::Field::one();
        }
        for (d, b) in diff[1..].iter_mut().zip(&beta_share) {
            *d -= b;
        }
        if agg_id == 1 {
            diff = vec_neg(diff);
        }
        let consistency: [u8; 32] = Sha3_256::digest(encode_vec(&diff)).into();
        let mut eval_proof = [0u8; PREP_PROOF_LEN];
        eval_proof[..EVAL_PROOF_LEN].copy_from_slice(&eval.proof);
        eval_proof[EVAL_PROOF_LEN..].copy_from_slice(&consistency);

        let mut verifier_share = None;
        let mut joint_rand_part = None;
        let mut joint_rand_seed = None;
        if agg_param.do_weight_check {
            let query_rand = self.query_rand(verify_key, ctx, nonce, agg_param.level);
            let mut joint_rand = Vec::new();
            if self.flp.joint_rand_len() > 0 {
                let seed = seed.ok_or(MasticError::InvalidArg(
                    "input share is missing the joint-randomness seed",
                ))?;
                let published = public_share
                    .joint_rand_parts
                    .ok_or(MasticError::MissingJointRandPart)?;
                let own = self.joint_rand_part(ctx, agg_id, &seed, &key, &public_share.vidpf, nonce);
                let mut parts = published;
                parts[usize::from(agg_id)] = own;
                let jr_seed = self.joint_rand_seed(ctx, &parts);
                joint_rand = self.joint_rand(ctx, &jr_seed);
                joint_rand_part = Some(own);
                joint_rand_seed = Some(jr_seed);
            }
            verifier_share = Some(self.flp.query(
                &beta_share,
                &proof_share,
                &query_rand,
                &joint_rand,
                2,
            )?);
        }

        let mut truncated_out_share =
            Vec::with_capacity(agg_param.prefixes.len() * (1 + self.flp.output_len()));
        for val_share in eval.out_shares {
            truncated_out_share.push(val_share[0]);
            truncated_out_share.extend(self.flp.truncate(val_share[1..].to_vec()));
        }

        Ok((
            PrepState {
                truncated_out_share,
                joint_rand_seed,
            },
            PrepShare {
                eval_proof,
                verifier_share,
                joint_rand_part,
            },
        ))
    }

    /// Combine the two preparation shares into the (possibly empty)
    /// preparation message, verifying the VIDPF and the weight check.
    pub fn prep_shares_to_prep(
        &self,
        ctx: &[u8],
        agg_param: &AggParam,
        prep_shares: &[PrepShare<V::Field>],
    ) -> Result<PrepMessage, MasticError> {
        let [share_0, share_1]: &[PrepShare<V::Field>; 2] = prep_shares
            .try_into()
            .map_err(|_| MasticError::InvalidArg("expected exactly two prep shares"))?;

        if !bool::from(share_0.eval_proof[..].ct_eq(&share_1.eval_proof[..])) {
            return Err(MasticError::VidpfMismatch);
        }
        if !agg_param.do_weight_check {
            return Ok(None);
        }

        let verifier_0 = share_0
            .verifier_share
            .as_ref()
            .ok_or(MasticError::MissingVerifier)?;
        let verifier_1 = share_1
            .verifier_share
            .as_ref()
            .ok_or(MasticError::MissingVerifier)?;
        let verifier = vec_add(verifier_0.clone(), verifier_1);
        if !self.flp.decide(&verifier)? {
            return Err(MasticError::FlpReject);
        }

        if self.flp.joint_rand_len() == 0 {
            return Ok(None);
        }
        let part_0 = share_0
            .joint_rand_part
            .ok_or(MasticError::MissingJointRandPart)?;
        let part_1 = share_1
            .joint_rand_part
            .ok_or(MasticError::MissingJointRandPart)?;
        Ok(Some(self.joint_rand_seed(ctx, &[part_0, part_1])))
    }

    /// One Aggregator's final step: check the joint-randomness confirmation
    /// and release the output share.
    pub fn prep_next(
        &self,
        _ctx: &[u8],
        prep_state: PrepState<V::Field>,
        prep_msg: &PrepMessage,
    ) -> Result<Vec<V::Field>, MasticError> {
        if let Some(expected) = &prep_state.joint_rand_seed {
            let got = prep_msg.as_ref().ok_or(MasticError::MissingConfirmation)?;
            if !bool::from(got.ct_eq(expected)) {
                return Err(MasticError::JointRandMismatch);
            }
        }
        Ok(prep_state.truncated_out_share)
    }

    // -----------------------------------------------------------------------
    // Aggregation and unsharding
    // -----------------------------------------------------------------------

    /// The zero aggregate share for this parameter.
    pub fn agg_init(&self, agg_param: &AggParam) -> Vec<V::Field> {
        zeros(agg_param.prefixes.len() * (1 + self.flp.output_len()))
    }

    /// Add one output share into an aggregate share.
    pub fn agg_update(
        &self,
        agg_param: &AggParam,
        agg_share: Vec<V::Field>,
        out_share: &[V::Field],
    ) -> Result<Vec<V::Field>, MasticError> {
        let want = agg_param.prefixes.len() * (1 + self.flp.output_len());
        if agg_share.len() != want || out_share.len() != want {
            return Err(MasticError::InvalidArg("aggregate share has wrong length"));
        }
        Ok(vec_add(agg_share, out_share))
    }

    /// Sum a collection of aggregate shares.
    pub fn merge(
        &self,
        agg_param: &AggParam,
        agg_shares: &[Vec<V::Field>],
    ) -> Result<Vec<V::Field>, MasticError> {
        let mut agg = self.agg_init(agg_param);
        for share in agg_shares {
            if share.len() != agg.len() {
                return Err(MasticError::InvalidArg("aggregate share has wrong length"));
            }
            agg = vec_add(agg, share);
        }
        Ok(agg)
    }

    /// Merge the Aggregators' shares and decode one result per prefix, in
    /// the parameter's prefix order.
    pub fn unshard(
        &self,
        agg_param: &AggParam,
        agg_shares: &[Vec<V::Field>],
        _num_measurements: usize,
    ) -> Result<Vec<V::AggResult>, MasticError> {
        let agg = self.merge(agg_param, agg_shares)?;
        let chunk_len = 1 + self.flp.output_len();
        let mut results = Vec::with_capacity(agg_param.prefixes.len());
        for chunk in agg.chunks_exact(chunk_len) {
            let meas_count = chunk[0].to_unsigned();
            results.push(self.flp.decode(&chunk[1..], meas_count as usize));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Derivations
    // -----------------------------------------------------------------------

    fn expand_input_share(
        &self,
        ctx: &[u8],
        agg_id: u8,
        input_share: &InputShare<V::Field>,
    ) -> Result<(VidpfSeed, Vec<V::Field>, Option<Seed>, Vec<V::Field>), MasticError> {
        match input_share {
            InputShare::Leader {
                key,
                proof_share,
                seed,
                beta_share,
            } => {
                if agg_id != 0 {
                    return Err(MasticError::InvalidArg("leader share given to the helper"));
                }
                Ok((*key, proof_share.clone(), *seed, beta_share.clone()))
            }
            InputShare::Helper {
                key,
                seed,
                beta_share,
            } => {
                if agg_id != 1 {
                    return Err(MasticError::InvalidArg("helper share given to the leader"));
                }
                let proof_share = self.helper_proof_share(ctx, seed);
                Ok((*key, proof_share, Some(*seed), beta_share.clone()))
            }
        }
    }

    fn helper_proof_share(&self, ctx: &[u8], seed: &Seed) -> Vec<V::Field> {
        XofTurboShake128::expand_into_vec(
            seed,
            &dst(ctx, Usage::ProofShare),
            b"",
            self.flp.proof_len(),
        )
    }

    // Deliberately reuses the proof-share usage code; existing deployments
    // derive the seeded weight share under the same tag.
    fn beta_share_from_seed(&self, ctx: &[u8], seed: &Seed) -> Vec<V::Field> {
        XofTurboShake128::expand_into_vec(
            seed,
            &dst(ctx, Usage::ProofShare),
            b"",
            self.flp.meas_len(),
        )
    }

    fn prove_rand(&self, ctx: &[u8], seed: &Seed) -> Vec<V::Field> {
        XofTurboShake128::expand_into_vec(
            seed,
            &dst(ctx, Usage::ProveRand),
            b"",
            self.flp.prove_rand_len(),
        )
    }

    fn query_rand(&self, verify_key: &Seed, ctx: &[u8], nonce: &Nonce, level: u16) -> Vec<V::Field> {
        let mut binder = [0u8; NONCE_SIZE + 2];
        binder[..NONCE_SIZE].copy_from_slice(nonce);
        binder[NONCE_SIZE..].copy_from_slice(&level.to_le_bytes());
        XofTurboShake128::expand_into_vec(
            verify_key,
            &dst(ctx, Usage::QueryRand),
            &binder,
            self.flp.query_rand_len(),
        )
    }

    /// One party's joint-randomness contribution; bound to its VIDPF key and
    /// the full public share so the joint randomness commits to the tree.
    fn joint_rand_part(
        &self,
        ctx: &[u8],
        agg_id: u8,
        seed: &Seed,
        key: &VidpfSeed,
        public: &VidpfPublicShare<V::Field>,
        nonce: &Nonce,
    ) -> Seed {
        let encoded = Vidpf::encode_public_share(public);
        let mut binder = Vec::with_capacity(1 + NONCE_SIZE + key.len() + encoded.len());
        binder.push(agg_id);
        binder.extend_from_slice(nonce);
        binder.extend_from_slice(key);
        binder.extend_from_slice(&encoded);
        XofTurboShake128::derive_seed(seed, &dst(ctx, Usage::JointRandPart), &binder)
    }

    fn joint_rand_seed(&self, ctx: &[u8], parts: &[Seed; 2]) -> Seed {
        let mut binder = [0u8; 2 * SEED_SIZE];
        binder[..SEED_SIZE].copy_from_slice(&parts[0]);
        binder[SEED_SIZE..].copy_from_slice(&parts[1]);
        XofTurboShake128::derive_seed(&[0u8; SEED_SIZE], &dst(ctx, Usage::JointRandSeed), &binder)
    }

    fn joint_rand(&self, ctx: &[u8], seed: &Seed) -> Vec<V::Field> {
        XofTurboShake128::expand_into_vec(
            seed,
            &dst(ctx, Usage::JointRand),
            b"",
            self.flp.joint_rand_len(),
        )
    }
}

/// `[1, beta]`: the per-report VIDPF payload, a counter slot ahead of the
/// encoded weight.
fn vidpf_beta<F: MasticField>(beta: &[F]) -> Vec<F> {
    let mut out = Vec::with_capacity(1 + beta.len());
    out.push(F::one());
    out.extend_from_slice(beta);
    out
}

fn binder(ctx: &[u8], nonce: &Nonce) -> Vec<u8> {
    let mut out = Vec::with_capacity(ctx.len() + NONCE_SIZE);
    out.extend_from_slice(ctx);
    out.extend_from_slice(nonce);
    out
}

fn split_seed(rand: &[u8]) -> (Seed, &[u8]) {
    let (head, rest) = rand.split_at(SEED_SIZE);
    let mut seed = [0u8; SEED_SIZE];
    seed.copy_from_slice(head);
    (seed, rest)
}

// ---------------------------------------------------------------------------
// Instantiations
// ---------------------------------------------------------------------------

/// Mastic over the Count weight type.
pub fn new_mastic_count(bits: u16) -> Result<Mastic<Count<Field64>>, MasticError> {
    Mastic::new(bits, Count::new())
}

/// Mastic over the Sum weight type with values in `0..=max_measurement`.
pub fn new_mastic_sum(bits: u16, max_measurement: u64) -> Result<Mastic<Sum<Field64>>, MasticError> {
    Mastic::new(bits, Sum::new(max_measurement)?)
}

/// Mastic over the SumVec weight type.
pub fn new_mastic_sum_vec(
    bits: u16,
    length: usize,
    elem_bits: usize,
    chunk: usize,
) -> Result<Mastic<SumVec<Field128>>, MasticError> {
    Mastic::new(bits, SumVec::new(length, elem_bits, chunk)?)
}

/// Mastic over the Histogram weight type.
pub fn new_mastic_histogram(
    bits: u16,
    length: usize,
    chunk: usize,
) -> Result<Mastic<Histogram<Field128>>, MasticError> {
    Mastic::new(bits, Histogram::new(length, chunk)?)
}

/// Mastic over the MultihotCountVec weight type.
pub fn new_mastic_multihot_count_vec(
    bits: u16,
    length: usize,
    max_weight: u64,
    chunk: usize,
) -> Result<Mastic<MultihotCountVec<Field128>>, MasticError> {
    Mastic::new(bits, MultihotCountVec::new(length, max_weight, chunk)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const CTX: &[u8] = b"mastic tests";

    fn agg_param(level: u16, prefixes: &[u128], do_weight_check: bool) -> AggParam {
        AggParam {
            level,
            prefixes: prefixes
                .iter()
                .map(|&p| BitPath::new(p, level + 1).unwrap())
                .collect(),
            do_weight_check,
        }
    }

    /// Run the full per-report pipeline for every report and unshard.
    fn run_collection<V: Valid>(
        mastic: &Mastic<V>,
        reports: &[(BitPath, V::Measurement)],
        agg_param: &AggParam,
        rng: &mut StdRng,
    ) -> Result<Vec<V::AggResult>, MasticError> {
        let verify_key: Seed = rng.gen();
        let mut agg_shares = [mastic.agg_init(agg_param), mastic.agg_init(agg_param)];
        for measurement in reports {
            let nonce: Nonce = rng.gen();
            let (public_share, input_shares) =
                mastic.shard_with_rng(CTX, measurement, &nonce, rng)?;

            let (state_0, prep_0) = mastic.prep_init(
                &verify_key,
                CTX,
                0,
                agg_param,
                &nonce,
                &public_share,
                &input_shares[0],
            )?;
            let (state_1, prep_1) = mastic.prep_init(
                &verify_key,
                CTX,
                1,
                agg_param,
                &nonce,
                &public_share,
                &input_shares[1],
            )?;
            let prep_msg = mastic.prep_shares_to_prep(CTX, agg_param, &[prep_0, prep_1])?;

            let out_0 = mastic.prep_next(CTX, state_0, &prep_msg)?;
            let out_1 = mastic.prep_next(CTX, state_1, &prep_msg)?;
            agg_shares[0] = mastic.agg_update(agg_param, agg_shares[0].clone(), &out_0)?;
            agg_shares[1] = mastic.agg_update(agg_param, agg_shares[1].clone(), &out_1)?;
        }
        mastic.unshard(agg_param, &agg_shares, reports.len())
    }

    #[test]
    fn count_two_bit_paths() {
        let mastic = new_mastic_count(2).unwrap();
        let mut rng = StdRng::seed_from_u64(31);
        let reports: Vec<(BitPath, bool)> = [0b10u128, 0b00, 0b11, 0b01, 0b11]
            .iter()
            .map(|&alpha| (BitPath::new(alpha, 2).unwrap(), true))
            .collect();
        let param = agg_param(0, &[0b0, 0b1], true);
        let results = run_collection(&mastic, &reports, &param, &mut rng).unwrap();
        assert_eq!(results, vec![2u128, 3]);
    }

    #[test]
    fn count_sixteen_bit_paths() {
        let mastic = new_mastic_count(16).unwrap();
        let mut rng = StdRng::seed_from_u64(32);
        let reports: Vec<(BitPath, bool)> = [0xF0F0u128, 0xF0F1, 0xF0F2, 0x04F2]
            .iter()
            .map(|&alpha| (BitPath::new(alpha, 16).unwrap(), true))
            .collect();
        let param = agg_param(5, &[0b000001, 0b111100, 0b111101], true);
        let results = run_collection(&mastic, &reports, &param, &mut rng).unwrap();
        assert_eq!(results, vec![1u128, 3, 0]);
    }

    #[test]
    fn sum_with_weight_check_at_the_leaves() {
        let mastic = new_mastic_sum(8, 255).unwrap();
        let mut rng = StdRng::seed_from_u64(33);
        let reports = vec![(BitPath::new(0xAB, 8).unwrap(), 42u64)];
        let param = agg_param(7, &[0xAB], true);
        let results = run_collection(&mastic, &reports, &param, &mut rng).unwrap();
        assert_eq!(results, vec![42u128]);
    }

    #[test]
    fn histogram_over_all_leaves() {
        let mastic = new_mastic_histogram(2, 4, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(34);
        let reports: Vec<(BitPath, usize)> = (0..4u128)
            .map(|alpha| (BitPath::new(alpha, 2).unwrap(), 2usize))
            .collect();
        let param = agg_param(1, &[0, 1, 2, 3], true);
        let results = run_collection(&mastic, &reports, &param, &mut rng).unwrap();
        for leaf in results {
            assert_eq!(leaf, vec![0u128, 0, 1, 0]);
        }
    }

    #[test]
    fn multihot_collection() {
        let mastic = new_mastic_multihot_count_vec(4, 6, 2, 3).unwrap();
        let mut rng = StdRng::seed_from_u64(35);
        let m = vec![true, false, true, false, false, false];
        let reports = vec![
            (BitPath::new(0b0101, 4).unwrap(), m.clone()),
            (BitPath::new(0b0100, 4).unwrap(), m),
        ];
        let param = agg_param(2, &[0b010], true);
        let results = run_collection(&mastic, &reports, &param, &mut rng).unwrap();
        assert_eq!(results, vec![vec![2u128, 0, 2, 0, 0, 0]]);
    }

    #[test]
    fn sum_vec_without_weight_check_round() {
        // Second-round shape: weight check already done in an earlier round.
        let mastic = new_mastic_sum_vec(4, 2, 4, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(36);
        let reports = vec![
            (BitPath::new(0b1100, 4).unwrap(), vec![3u64, 9]),
            (BitPath::new(0b1101, 4).unwrap(), vec![2u64, 1]),
        ];
        let param = agg_param(3, &[0b1100, 0b1101, 0b0000], false);
        let results = run_collection(&mastic, &reports, &param, &mut rng).unwrap();
        assert_eq!(
            results,
            vec![vec![3u128, 9], vec![2u128, 1], vec![0u128, 0]]
        );
    }

    #[test]
    fn tampered_helper_key_is_rejected() {
        let mastic = new_mastic_count(2).unwrap();
        let mut rng = StdRng::seed_from_u64(37);
        let verify_key: Seed = rng.gen();
        let nonce: Nonce = rng.gen();
        let measurement = (BitPath::new(0b10, 2).unwrap(), true);
        let (public_share, mut input_shares) =
            mastic.shard_with_rng(CTX, &measurement, &nonce, &mut rng).unwrap();

        if let InputShare::Helper { key, .. } = &mut input_shares[1] {
            key[0] ^= 0x01;
        } else {
            panic!("share 1 must be the helper share");
        }

        let param = agg_param(0, &[0b0, 0b1], true);
        let (_, prep_0) = mastic
            .prep_init(&verify_key, CTX, 0, &param, &nonce, &public_share, &input_shares[0])
            .unwrap();
        let (_, prep_1) = mastic
            .prep_init(&verify_key, CTX, 1, &param, &nonce, &public_share, &input_shares[1])
            .unwrap();
        assert!(matches!(
            mastic.prep_shares_to_prep(CTX, &param, &[prep_0, prep_1]),
            Err(MasticError::VidpfMismatch)
        ));
    }

    #[test]
    fn tampered_weight_share_is_rejected() {
        // The separately shared weight no longer matches the VIDPF payload;
        // the consistency digest must catch it even without a weight check.
        let mastic = new_mastic_count(2).unwrap();
        let mut rng = StdRng::seed_from_u64(38);
        let verify_key: Seed = rng.gen();
        let nonce: Nonce = rng.gen();
        let measurement = (BitPath::new(0b01, 2).unwrap(), true);
        let (public_share, mut input_shares) =
            mastic.shard_with_rng(CTX, &measurement, &nonce, &mut rng).unwrap();

        if let InputShare::Leader { beta_share, .. } = &mut input_shares[0] {
            beta_share[0] += Field64::one();
        } else {
            panic!("share 0 must be the leader share");
        }

        let param = agg_param(0, &[0b0, 0b1], false);
        let (_, prep_0) = mastic
            .prep_init(&verify_key, CTX, 0, &param, &nonce, &public_share, &input_shares[0])
            .unwrap();
        let (_, prep_1) = mastic
            .prep_init(&verify_key, CTX, 1, &param, &nonce, &public_share, &input_shares[1])
            .unwrap();
        assert!(matches!(
            mastic.prep_shares_to_prep(CTX, &param, &[prep_0, prep_1]),
            Err(MasticError::VidpfMismatch)
        ));
    }

    #[test]
    fn joint_rand_confirmation_is_checked() {
        let mastic = new_mastic_sum(4, 15).unwrap();
        let mut rng = StdRng::seed_from_u64(39);
        let verify_key: Seed = rng.gen();
        let nonce: Nonce = rng.gen();
        let measurement = (BitPath::new(0b1001, 4).unwrap(), 7u64);
        let (public_share, input_shares) =
            mastic.shard_with_rng(CTX, &measurement, &nonce, &mut rng).unwrap();

        let param = agg_param(3, &[0b1001], true);
        let (state_0, prep_0) = mastic
            .prep_init(&verify_key, CTX, 0, &param, &nonce, &public_share, &input_shares[0])
            .unwrap();
        let (state_1, prep_1) = mastic
            .prep_init(&verify_key, CTX, 1, &param, &nonce, &public_share, &input_shares[1])
            .unwrap();
        let prep_msg = mastic
            .prep_shares_to_prep(CTX, &param, &[prep_0, prep_1])
            .unwrap();
        assert!(prep_msg.is_some(), "Sum uses joint randomness");

        assert!(matches!(
            mastic.prep_next(CTX, state_0.clone(), &None),
            Err(MasticError::MissingConfirmation)
        ));
        assert!(matches!(
            mastic.prep_next(CTX, state_0, &Some([0xFF; SEED_SIZE])),
            Err(MasticError::JointRandMismatch)
        ));
        assert!(mastic.prep_next(CTX, state_1, &prep_msg).is_ok());
    }

    #[test]
    fn weight_check_must_run_exactly_once() {
        let mastic = new_mastic_count(4).unwrap();
        let first = agg_param(0, &[0b0, 0b1], true);
        let second_checked = agg_param(1, &[0b01], true);
        let second_unchecked = agg_param(1, &[0b01], false);

        assert!(mastic.is_valid(&first, &[]));
        assert!(!mastic.is_valid(&second_checked, &[first.clone()]));
        assert!(mastic.is_valid(&second_unchecked, &[first.clone()]));
        // Skipping the check in the first round leaves it undone forever.
        let first_unchecked = agg_param(0, &[0b0], false);
        assert!(!mastic.is_valid(&first_unchecked, &[]));
        assert!(matches!(
            mastic.check_agg_param(&second_checked, &[first]),
            Err(MasticError::AggParamOrder)
        ));
    }

    #[test]
    fn levels_must_strictly_increase() {
        let mastic = new_mastic_count(4).unwrap();
        let first = agg_param(1, &[0b00], true);
        let same_level = agg_param(1, &[0b01], false);
        let deeper = agg_param(3, &[0b0100], false);

        assert!(!mastic.is_valid(&same_level, &[first.clone()]));
        assert!(mastic.is_valid(&deeper, &[first.clone()]));
        assert!(!mastic.is_valid(&first, &[first.clone(), deeper]));
    }

    #[test]
    fn aggregation_is_commutative_and_associative() {
        let mastic = new_mastic_count(2).unwrap();
        let mut rng = StdRng::seed_from_u64(40);
        let param = agg_param(1, &[0b00, 0b01, 0b10, 0b11], true);
        let verify_key: Seed = rng.gen();

        // Collect the leader's output shares for three reports.
        let mut out_shares = Vec::new();
        for alpha in [0b00u128, 0b10, 0b10] {
            let nonce: Nonce = rng.gen();
            let measurement = (BitPath::new(alpha, 2).unwrap(), true);
            let (public_share, input_shares) =
                mastic.shard_with_rng(CTX, &measurement, &nonce, &mut rng).unwrap();
            let (state, prep_0) = mastic
                .prep_init(&verify_key, CTX, 0, &param, &nonce, &public_share, &input_shares[0])
                .unwrap();
            let (_, prep_1) = mastic
                .prep_init(&verify_key, CTX, 1, &param, &nonce, &public_share, &input_shares[1])
                .unwrap();
            let prep_msg = mastic
                .prep_shares_to_prep(CTX, &param, &[prep_0, prep_1])
                .unwrap();
            out_shares.push(mastic.prep_next(CTX, state, &prep_msg).unwrap());
        }

        let mut forward = mastic.agg_init(&param);
        for share in &out_shares {
            forward = mastic.agg_update(&param, forward, share).unwrap();
        }
        let mut reverse = mastic.agg_init(&param);
        for share in out_shares.iter().rev() {
            reverse = mastic.agg_update(&param, reverse, share).unwrap();
        }
        assert_eq!(forward, reverse);

        // Merging partial aggregates equals one flat merge.
        let a = mastic
            .agg_update(&param, mastic.agg_init(&param), &out_shares[0])
            .unwrap();
        let mut b = mastic.agg_init(&param);
        for share in &out_shares[1..] {
            b = mastic.agg_update(&param, b, share).unwrap();
        }
        assert_eq!(mastic.merge(&param, &[a, b]).unwrap(), forward);
    }

    #[test]
    fn prep_share_cardinality_is_checked() {
        let mastic = new_mastic_count(2).unwrap();
        let param = agg_param(0, &[0b0], false);
        assert!(matches!(
            mastic.prep_shares_to_prep(CTX, &param, &[]),
            Err(MasticError::InvalidArg(_))
        ));
    }

    #[test]
    fn duplicate_prefixes_are_rejected() {
        let mastic = new_mastic_count(2).unwrap();
        let mut rng = StdRng::seed_from_u64(41);
        let verify_key: Seed = rng.gen();
        let nonce: Nonce = rng.gen();
        let measurement = (BitPath::new(0b10, 2).unwrap(), true);
        let (public_share, input_shares) =
            mastic.shard_with_rng(CTX, &measurement, &nonce, &mut rng).unwrap();
        let param = agg_param(0, &[0b1, 0b1], true);
        assert!(matches!(
            mastic.prep_init(&verify_key, CTX, 0, &param, &nonce, &public_share, &input_shares[0]),
            Err(MasticError::Vidpf(VidpfError::DuplicatePrefix))
        ));
    }

    #[test]
    fn rand_size_is_enforced() {
        let mastic = new_mastic_sum(4, 15).unwrap();
        let measurement = (BitPath::new(0b1001, 4).unwrap(), 7u64);
        let nonce = [0u8; NONCE_SIZE];
        let rand = vec![0u8; mastic.rand_size() - 1];
        assert!(matches!(
            mastic.shard(CTX, &measurement, &nonce, &rand),
            Err(MasticError::InvalidArg(_))
        ));
        // Sum uses joint randomness, so it needs one extra seed.
        assert_eq!(
            mastic.rand_size(),
            Vidpf::<Field64>::RAND_SIZE + 4 * SEED_SIZE
        );
        let count = new_mastic_count(4).unwrap();
        assert_eq!(
            count.rand_size(),
            Vidpf::<Field64>::RAND_SIZE + 3 * SEED_SIZE
        );
    }
}
