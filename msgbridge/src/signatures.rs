use std::collections::HashSet;

use alloy::primitives::Bytes;
use tracing::{trace, warn};

use crate::{
    chain::StoredSignature,
    primitives::{MessageFingerprint, Timestamp, ValidatorId, ValidatorSet},
};

/// One validator's signature over a message, as observed at some block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub validator: ValidatorId,
    pub fingerprint: MessageFingerprint,
    pub signature: Bytes,
    pub block_timestamp: Timestamp,
}

/// At most one record per validator, kept in the order they were first seen.
///
/// The order matters: proofs concatenate signatures in this order and the destination verifier
/// does not re-sort them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureTally {
    records: Vec<SignatureRecord>,
    validators: HashSet<ValidatorId>,
}

impl SignatureTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless its validator already has one. The first record wins.
    fn insert(&mut self, record: SignatureRecord) -> bool {
        if !self.validators.insert(record.validator) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, validator: &ValidatorId) -> bool {
        self.validators.contains(validator)
    }

    pub fn records(&self) -> &[SignatureRecord] {
        &self.records
    }

    /// The newest block timestamp among the records.
    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.records.iter().map(|r| r.block_timestamp).max()
    }
}

/// Keep the first stored signature of each member of `validators`, in storage order.
pub fn filter_stored(
    validators: &ValidatorSet,
    stored: impl IntoIterator<Item = StoredSignature>,
) -> Vec<StoredSignature> {
    let mut seen = HashSet::new();
    stored
        .into_iter()
        .filter(|s| {
            if !validators.contains(&s.validator) {
                trace!(
                    validator = %s.validator,
                    "ignoring signature from outside the validator set"
                );
                return false;
            }
            seen.insert(s.validator)
        })
        .collect()
}

/// Accumulates signatures for a single message during one confirmation attempt.
#[derive(Debug, Clone)]
pub struct SignatureAggregator {
    fingerprint: MessageFingerprint,
    tally: SignatureTally,
}

impl SignatureAggregator {
    pub fn new(fingerprint: MessageFingerprint) -> Self {
        SignatureAggregator {
            fingerprint,
            tally: SignatureTally::new(),
        }
    }

    /// Seed an aggregator from the signatures stored at a single block, ignoring anyone outside
    /// `validators`.
    pub fn from_stored(
        fingerprint: MessageFingerprint,
        validators: &ValidatorSet,
        stored: impl IntoIterator<Item = StoredSignature>,
        block_timestamp: Timestamp,
    ) -> Self {
        let mut aggregator = SignatureAggregator::new(fingerprint);
        for StoredSignature {
            validator,
            signature,
        } in filter_stored(validators, stored)
        {
            aggregator.record(SignatureRecord {
                validator,
                fingerprint,
                signature,
                block_timestamp,
            });
        }
        aggregator
    }

    pub fn fingerprint(&self) -> MessageFingerprint {
        self.fingerprint
    }

    /// Returns true if the record was added. Records for another message, or from a validator that
    /// already signed, leave the tally untouched.
    pub fn record(&mut self, record: SignatureRecord) -> bool {
        if record.fingerprint != self.fingerprint {
            warn!(
                expected = %self.fingerprint,
                got = %record.fingerprint,
                "signature record for another message"
            );
            return false;
        }
        self.tally.insert(record)
    }

    pub fn tally(&self) -> &SignatureTally {
        &self.tally
    }

    pub fn into_tally(self) -> SignatureTally {
        self.tally
    }
}
