use alloy::primitives::Bytes;
use serde::{Deserialize, Serialize};

use crate::{primitives::Timestamp, signatures::SignatureTally};

/// Percentage of the validator set that has to sign a message before it is confirmed.
pub const QUORUM_PERCENT: u128 = 70;

/// Concatenated validator signatures, as expected by the destination chain's verifier.
pub type Proof = Bytes;

/// Whether `signatures` distinct validators out of `validators` make a quorum.
///
/// Note that an empty validator set is trivially satisfied; callers must reject it before getting
/// here.
pub fn reached(signatures: usize, validators: usize) -> bool {
    (signatures as u128) * 100 >= (validators as u128) * QUORUM_PERCENT
}

/// Concatenate the tally's signatures in insertion order, with no delimiter.
pub fn build_proof(tally: &SignatureTally) -> Proof {
    concat_signatures(tally.records().iter().map(|r| &r.signature))
}

pub fn concat_signatures<'a>(signatures: impl IntoIterator<Item = &'a Bytes>) -> Proof {
    let proof: Vec<u8> = signatures
        .into_iter()
        .flat_map(|s| s.iter().copied())
        .collect();
    proof.into()
}

/// The outcome of a successful confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub proof: Proof,
    /// The newest block timestamp among the signatures that made up the quorum.
    pub timestamp: Timestamp,
}

impl Confirmation {
    /// A confirmation from a tally, or `None` if it has no records to take a timestamp from.
    pub fn from_tally(tally: &SignatureTally) -> Option<Self> {
        Some(Confirmation {
            proof: build_proof(tally),
            timestamp: tally.latest_timestamp()?,
        })
    }
}
