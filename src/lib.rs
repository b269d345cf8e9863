//! Crate root: public surface, core aliases, and protocol-wide constants
//!
//! Mastic is a two-party Verifiable Distributed Aggregation Function for
//! heavy hitters and weighted prefix aggregation. A client splits a
//! measurement — a bit-path `alpha` and a weight — into two shares; two
//! non-colluding Aggregators can then, for any prefix set chosen after
//! collection, compute shares of the summed weights under each prefix while
//! cryptographically verifying that every report was honestly generated
//! (VIDPF one-hot and path proofs) and that its weight satisfies the
//! declared validity predicate (FLP).
//!
//! ## Invariants
//!
//! - **Fields.** Aggregation runs over an NTT-friendly prime field of size
//!   ≥ 2^63 ([`Field64`] or [`Field128`] depending on the weight type); we
//!   **forbid unsafe** throughout the crate.
//! - **Determinism.** The core never samples randomness on its own: sharding
//!   consumes a caller-supplied byte slice of exactly
//!   [`mastic::Mastic::rand_size`] bytes, and every derived value flows from
//!   the XOFs with explicit domain separation.
//! - **One round.** Preparation is a single exchange: `prep_init` on each
//!   Aggregator, one combine step, `prep_next` to release output shares. A
//!   failed report is dropped whole; no partial outputs exist.
//! - **Secret-dependent control flow.** Corrections steered by control bits
//!   are branch-free (byte masks, field embeddings); proof comparisons are
//!   constant-time.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Prime fields, field vectors, and the GF(2) control bit.
pub mod field;
/// Radix-2 NTT, interpolation, and small polynomial helpers.
pub mod poly;
/// XOFs (TurboSHAKE128, fixed-key AES-128) and domain-separation tags.
pub mod xof;
/// MSB-first bit-strings for paths and prefixes.
pub mod prefix;
/// The Verifiable Incremental Distributed Point Function.
pub mod vidpf;
/// Fully Linear Proofs over validity circuits.
pub mod flp;
/// The concrete weight types: Count, Sum, SumVec, Histogram,
/// MultihotCountVec.
pub mod flp_types;
/// The VDAF: shard, prepare, aggregate, unshard.
pub mod mastic;
/// Wire formats and JSON test-vector artifacts.
pub mod codec;

// ============================================================================
// Canonical aliases and root-level re-exports
// ============================================================================

pub use crate::field::{Field128, Field64, MasticField};
pub use crate::flp::{Flp, FlpError, Valid};
pub use crate::mastic::{
    new_mastic_count, new_mastic_histogram, new_mastic_multihot_count_vec, new_mastic_sum,
    new_mastic_sum_vec, AggParam, InputShare, Mastic, MasticError, Nonce, PrepMessage, PrepShare,
    PrepState, PublicShare,
};
pub use crate::prefix::BitPath;
pub use crate::vidpf::{Vidpf, VidpfError, VidpfPublicShare};
pub use crate::xof::{Seed, SEED_SIZE};

/// Number of Aggregators.
pub const SHARES: usize = 2;

/// Number of preparation rounds.
pub const ROUNDS: usize = 1;

/// Size in bytes of a report nonce.
pub const NONCE_SIZE: usize = 16;

/// Size in bytes of the Aggregators' shared verification key.
pub const VERIFY_KEY_SIZE: usize = SEED_SIZE;

/// Four-byte algorithm identifiers, used by callers for domain separation
/// when embedding Mastic in a larger protocol.
pub mod algorithm_id {
    /// Mastic over Count.
    pub const COUNT: u32 = 0xFFFF0001;
    /// Mastic over Sum.
    pub const SUM: u32 = 0xFFFF0002;
    /// Mastic over SumVec.
    pub const SUM_VEC: u32 = 0xFFFF0003;
    /// Mastic over Histogram.
    pub const HISTOGRAM: u32 = 0xFFFF0004;
    /// Mastic over MultihotCountVec.
    pub const MULTIHOT_COUNT_VEC: u32 = 0xFFFF0005;
}
