//! Wire and artifact encodings
//!
//! Two byte formats live here:
//!
//! - the aggregation-parameter wire format (big-endian header, MSB-first
//!   packed prefixes), with a strict decoder so the encoding is a bijection
//!   on its domain;
//! - the byte-exact share encodings used for conformance artifacts, plus a
//!   JSON test-vector container that records a full collection run in hex.
//!
//! Nothing here is needed on the hot path; the VDAF layer hands structured
//! values around and callers serialize only at the edges.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::field::{encode_vec, MasticField};
use crate::flp::Valid;
use crate::mastic::{
    AggParam, InputShare, Mastic, Nonce, PrepMessage, PrepShare, PublicShare,
};
use crate::prefix::{BitPath, PathError};
use crate::vidpf::Vidpf;
use crate::xof::Seed;

/// Errors surfaced by the aggregation-parameter codec.
#[allow(missing_docs)] // the display strings are the documentation
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("too many prefixes for the wire format")]
    TooManyPrefixes,
    #[error("prefix length does not match the level")]
    PrefixLevelMismatch,
    #[error("input ends before the encoding is complete")]
    Truncated,
    #[error("trailing bytes after the encoding")]
    TrailingBytes,
    #[error("weight-check flag must be 0 or 1 (got {0})")]
    BadFlag(u8),
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Encode an aggregation parameter: `level_BE16 ‖ count_BE32 ‖ flag ‖
/// packed prefixes`.
pub fn encode_agg_param(param: &AggParam) -> Result<Vec<u8>, CodecError> {
    let count = u32::try_from(param.prefixes.len()).map_err(|_| CodecError::TooManyPrefixes)?;
    let prefix_bytes = usize::from(param.level + 1).div_ceil(8);
    let mut out = Vec::with_capacity(7 + prefix_bytes * param.prefixes.len());
    out.extend_from_slice(&param.level.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out.push(u8::from(param.do_weight_check));
    for prefix in &param.prefixes {
        if prefix.len() != param.level + 1 {
            return Err(CodecError::PrefixLevelMismatch);
        }
        out.extend_from_slice(&prefix.to_packed_bytes());
    }
    Ok(out)
}

/// Decode an aggregation parameter; strict about padding and length.
pub fn decode_agg_param(bytes: &[u8]) -> Result<AggParam, CodecError> {
    if bytes.len() < 7 {
        return Err(CodecError::Truncated);
    }
    let level = u16::from_be_bytes([bytes[0], bytes[1]]);
    let count = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
    let do_weight_check = match bytes[6] {
        0 => false,
        1 => true,
        other => return Err(CodecError::BadFlag(other)),
    };
    if level == u16::MAX {
        // level + 1 must stay a representable prefix length.
        return Err(CodecError::Truncated);
    }

    let prefix_bytes = usize::from(level + 1).div_ceil(8);
    let body = &bytes[7..];
    if body.len() != prefix_bytes * count {
        return Err(if body.len() < prefix_bytes * count {
            CodecError::Truncated
        } else {
            CodecError::TrailingBytes
        });
    }
    let prefixes = body
        .chunks_exact(prefix_bytes)
        .map(|chunk| BitPath::from_packed_bytes(chunk, level + 1))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AggParam {
        level,
        prefixes,
        do_weight_check,
    })
}

/// Byte-exact public-share encoding: the VIDPF public share, then the
/// joint-randomness parts when present.
pub fn encode_public_share<F: MasticField>(public_share: &PublicShare<F>) -> Vec<u8> {
    let mut out = Vidpf::encode_public_share(&public_share.vidpf);
    if let Some(parts) = &public_share.joint_rand_parts {
        for part in parts {
            out.extend_from_slice(part);
        }
    }
    out
}

/// Byte-exact input-share encoding: key, then any explicit proof share,
/// then any seed, then the weight share.
pub fn encode_input_share<F: MasticField>(input_share: &InputShare<F>) -> Vec<u8> {
    let mut out = Vec::new();
    match input_share {
        InputShare::Leader {
            key,
            proof_share,
            seed,
            beta_share,
        } => {
            out.extend_from_slice(key);
            out.extend_from_slice(&encode_vec(proof_share));
            if let Some(seed) = seed {
                out.extend_from_slice(seed);
            }
            out.extend_from_slice(&encode_vec(beta_share));
        }
        InputShare::Helper {
            key,
            seed,
            beta_share,
        } => {
            out.extend_from_slice(key);
            out.extend_from_slice(seed);
            out.extend_from_slice(&encode_vec(beta_share));
        }
    }
    out
}

/// Byte-exact aggregate-share encoding.
pub fn encode_agg_share<F: MasticField>(agg_share: &[F]) -> Vec<u8> {
    encode_vec(agg_share)
}

/// Byte-exact prep-share encoding: proof bytes, then any verifier share,
/// then any joint-randomness part.
pub fn encode_prep_share<F: MasticField>(prep_share: &PrepShare<F>) -> Vec<u8> {
    let mut out = prep_share.eval_proof.to_vec();
    if let Some(verifier) = &prep_share.verifier_share {
        out.extend_from_slice(&encode_vec(verifier));
    }
    if let Some(part) = &prep_share.joint_rand_part {
        out.extend_from_slice(part);
    }
    out
}

/// Byte-exact prep-message encoding (empty when there is no confirmation).
pub fn encode_prep_msg(prep_msg: &PrepMessage) -> Vec<u8> {
    match prep_msg {
        Some(seed) => seed.to_vec(),
        None => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// JSON test vectors
// ---------------------------------------------------------------------------

/// One report's recorded run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVector {
    /// Report nonce, hex.
    pub nonce: String,
    /// Sharding randomness, hex.
    pub rand: String,
    /// Encoded public share, hex.
    pub public_share: String,
    /// Encoded input shares, hex, leader first.
    pub input_shares: Vec<String>,
    /// Encoded prep shares, hex, leader first.
    pub prep_shares: Vec<String>,
    /// Encoded prep message, hex (possibly empty).
    pub prep_msg: String,
    /// Encoded output shares, hex, leader first.
    pub out_shares: Vec<String>,
}

/// A recorded collection run: everything an implementation needs to replay
/// one aggregation round byte for byte.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestVector {
    /// Application context, hex.
    pub ctx: String,
    /// Verification key, hex.
    pub verify_key: String,
    /// Encoded aggregation parameter, hex.
    pub agg_param: String,
    /// Per-report transcripts.
    pub reports: Vec<ReportVector>,
    /// Encoded aggregate shares, hex, leader first.
    pub agg_shares: Vec<String>,
}

impl TestVector {
    /// Run a full collection and record every encoding.
    pub fn generate<V: Valid>(
        mastic: &Mastic<V>,
        ctx: &[u8],
        verify_key: &Seed,
        agg_param: &AggParam,
        measurements: &[(BitPath, V::Measurement)],
        rng: &mut (impl rand::RngCore + rand::CryptoRng),
    ) -> anyhow::Result<Self> {
        let mut reports = Vec::with_capacity(measurements.len());
        let mut agg_shares = [mastic.agg_init(agg_param), mastic.agg_init(agg_param)];

        for measurement in measurements {
            let nonce: Nonce = {
                let mut n = [0u8; crate::NONCE_SIZE];
                rng.fill_bytes(&mut n);
                n
            };
            let mut rand = vec![0u8; mastic.rand_size()];
            rng.fill_bytes(&mut rand);

            let (public_share, input_shares) = mastic.shard(ctx, measurement, &nonce, &rand)?;
            let (state_0, prep_0) = mastic.prep_init(
                verify_key,
                ctx,
                0,
                agg_param,
                &nonce,
                &public_share,
                &input_shares[0],
            )?;
            let (state_1, prep_1) = mastic.prep_init(
                verify_key,
                ctx,
                1,
                agg_param,
                &nonce,
                &public_share,
                &input_shares[1],
            )?;
            let prep_msg = mastic.prep_shares_to_prep(ctx, agg_param, &[prep_0.clone(), prep_1.clone()])?;
            let out_0 = mastic.prep_next(ctx, state_0, &prep_msg)?;
            let out_1 = mastic.prep_next(ctx, state_1, &prep_msg)?;

            reports.push(ReportVector {
                nonce: hex::encode(nonce),
                rand: hex::encode(&rand),
                public_share: hex::encode(encode_public_share(&public_share)),
                input_shares: input_shares.iter().map(|s| hex::encode(encode_input_share(s))).collect(),
                prep_shares: [&prep_0, &prep_1]
                    .iter()
                    .map(|s| hex::encode(encode_prep_share(s)))
                    .collect(),
                prep_msg: hex::encode(encode_prep_msg(&prep_msg)),
                out_shares: [&out_0, &out_1]
                    .iter()
                    .map(|s| hex::encode(encode_agg_share(s)))
                    .collect(),
            });

            agg_shares[0] = mastic.agg_update(agg_param, agg_shares[0].clone(), &out_0)?;
            agg_shares[1] = mastic.agg_update(agg_param, agg_shares[1].clone(), &out_1)?;
        }

        Ok(TestVector {
            ctx: hex::encode(ctx),
            verify_key: hex::encode(verify_key),
            agg_param: hex::encode(encode_agg_param(agg_param)?),
            reports,
            agg_shares: agg_shares.iter().map(|s| hex::encode(encode_agg_share(s))).collect(),
        })
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mastic::{new_mastic_count, new_mastic_sum};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn param(level: u16, prefixes: &[u128], do_weight_check: bool) -> AggParam {
        AggParam {
            level,
            prefixes: prefixes
                .iter()
                .map(|&p| BitPath::new(p, level + 1).unwrap())
                .collect(),
            do_weight_check,
        }
    }

    #[test]
    fn agg_param_round_trip() {
        for p in [
            param(0, &[0, 1], true),
            param(5, &[0b000001, 0b111100, 0b111101], false),
            param(15, &[0xABCD, 0x1234], true),
            param(7, &[], false),
        ] {
            let bytes = encode_agg_param(&p).unwrap();
            assert_eq!(decode_agg_param(&bytes).unwrap(), p);
        }
    }

    #[test]
    fn agg_param_encoding_is_injective_on_samples() {
        let inputs = [
            param(0, &[0, 1], true),
            param(0, &[0, 1], false),
            param(0, &[1, 0], true),
            param(0, &[0], true),
            param(1, &[0, 1], true),
            param(1, &[2, 1], true),
        ];
        let encoded: Vec<Vec<u8>> = inputs.iter().map(|p| encode_agg_param(p).unwrap()).collect();
        for i in 0..encoded.len() {
            for j in i + 1..encoded.len() {
                assert_ne!(encoded[i], encoded[j], "params {i} and {j} collide");
            }
        }
    }

    #[test]
    fn agg_param_decoder_is_strict() {
        let p = param(2, &[0b101, 0b010], true);
        let bytes = encode_agg_param(&p).unwrap();

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(matches!(
            decode_agg_param(&trailing),
            Err(CodecError::TrailingBytes)
        ));

        assert!(matches!(
            decode_agg_param(&bytes[..bytes.len() - 1]),
            Err(CodecError::Truncated)
        ));

        let mut bad_flag = bytes.clone();
        bad_flag[6] = 2;
        assert!(matches!(
            decode_agg_param(&bad_flag),
            Err(CodecError::BadFlag(2))
        ));

        // Non-zero padding bits below a 3-bit prefix.
        let mut bad_padding = bytes;
        bad_padding[7] |= 0x1F;
        assert!(decode_agg_param(&bad_padding).is_err());
    }

    #[test]
    fn agg_param_rejects_mismatched_prefix_length() {
        let p = AggParam {
            level: 3,
            prefixes: vec![BitPath::new(0b01, 2).unwrap()],
            do_weight_check: false,
        };
        assert!(matches!(
            encode_agg_param(&p),
            Err(CodecError::PrefixLevelMismatch)
        ));
    }

    #[test]
    fn input_share_encodings_have_expected_layout() {
        let mastic = new_mastic_sum(4, 15).unwrap();
        let mut rng = StdRng::seed_from_u64(51);
        let nonce = rng.gen();
        let measurement = (BitPath::new(0b1001, 4).unwrap(), 7u64);
        let (public_share, input_shares) = mastic
            .shard_with_rng(b"ctx", &measurement, &nonce, &mut rng)
            .unwrap();

        let flp = mastic.flp();
        let leader = encode_input_share(&input_shares[0]);
        // key ‖ proof share ‖ joint-rand seed ‖ weight share
        assert_eq!(
            leader.len(),
            16 + 8 * flp.proof_len() + 32 + 8 * flp.meas_len()
        );
        let helper = encode_input_share(&input_shares[1]);
        // key ‖ seed ‖ weight share
        assert_eq!(helper.len(), 16 + 32 + 8 * flp.meas_len());

        // Public share: per-level correction material, then the two
        // joint-randomness parts.
        let encoded_public = encode_public_share(&public_share);
        let per_level = 16 + 1 + 8 * (1 + flp.meas_len());
        assert_eq!(encoded_public.len(), 4 * per_level + 4 * 32 + 2 * 32);
    }

    #[test]
    fn test_vector_json_round_trip() {
        let mastic = new_mastic_count(2).unwrap();
        let mut rng = StdRng::seed_from_u64(52);
        let verify_key: Seed = rng.gen();
        let p = param(0, &[0, 1], true);
        let measurements: Vec<(BitPath, bool)> = [0b10u128, 0b00, 0b11]
            .iter()
            .map(|&alpha| (BitPath::new(alpha, 2).unwrap(), true))
            .collect();

        let vector = TestVector::generate(
            &mastic,
            b"test vector ctx",
            &verify_key,
            &p,
            &measurements,
            &mut rng,
        )
        .unwrap();
        assert_eq!(vector.reports.len(), 3);

        let json = vector.to_json().unwrap();
        let back = TestVector::from_json(&json).unwrap();
        assert_eq!(vector, back);

        // The recorded prep shares must agree pairwise on the proof bytes.
        for report in &vector.reports {
            let a = &report.prep_shares[0];
            let b = &report.prep_shares[1];
            assert_eq!(a[..2 * crate::mastic::PREP_PROOF_LEN], b[..2 * crate::mastic::PREP_PROOF_LEN]);
        }
    }
}
