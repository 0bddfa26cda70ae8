//! Identifiers shared by the coordination chain and the confirmation engine.

use std::collections::HashSet;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

/// Hash of a cross-chain message. Every signature lookup is keyed by it.
pub type MessageFingerprint = B256;
/// Account id of a validator on the coordination chain.
pub type ValidatorId = B256;
pub type BlockHash = B256;
pub type BlockNumber = u64;
/// Identifies a connected chain within the protocol.
pub type ChainSelector = u64;
/// Milliseconds since the unix epoch, as set by the chain's timestamp extrinsic.
pub type Timestamp = u64;

/// The validators authorised to sign attestations at some block. Order is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet(HashSet<ValidatorId>);

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, validator: &ValidatorId) -> bool {
        self.0.contains(validator)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatorId> {
        self.0.iter()
    }
}

impl FromIterator<ValidatorId> for ValidatorSet {
    fn from_iter<I: IntoIterator<Item = ValidatorId>>(iter: I) -> Self {
        ValidatorSet(iter.into_iter().collect())
    }
}
