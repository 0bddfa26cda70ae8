//! Historical confirmation: scan the blocks following a point in time for a quorum of stored
//! signatures.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    chain::{CoordinationChain, fetch_block_timestamp, fetch_validators},
    error::ConfirmationError,
    primitives::{BlockNumber, ChainSelector, MessageFingerprint, Timestamp},
    quorum::{self, Confirmation, Proof},
    signatures::SignatureAggregator,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillConfirmation {
    pub proof: Proof,
    /// Timestamp of the block in which quorum was found.
    pub timestamp: Timestamp,
    pub block: BlockNumber,
    /// Where the scan started. Equal to `block` when the first block checked already had a quorum.
    pub start_block: BlockNumber,
    pub start_timestamp: Timestamp,
}

impl From<BackfillConfirmation> for Confirmation {
    fn from(c: BackfillConfirmation) -> Self {
        Confirmation {
            proof: c.proof,
            timestamp: c.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillRequest {
    pub fingerprint: MessageFingerprint,
    pub chain_selector: ChainSelector,
    /// Start near the block produced at this time (ms). `None` starts at the latest finalized
    /// block.
    pub from_timestamp: Option<Timestamp>,
    pub max_blocks: u64,
    /// Expected block interval in milliseconds, used to turn `from_timestamp` into a block number.
    pub estimated_block_time: NonZeroU64,
}

/// Estimate the block produced at `from_timestamp`, counting back from the latest block.
///
/// Rounds towards older blocks, so the estimate is never later than the true block for a chain
/// producing at the expected rate. A timestamp in the future estimates the latest block.
pub fn estimate_start_block(
    latest_block: BlockNumber,
    latest_timestamp: Timestamp,
    from_timestamp: Timestamp,
    block_time: NonZeroU64,
) -> Result<BlockNumber, ConfirmationError> {
    let elapsed = latest_timestamp.saturating_sub(from_timestamp);
    let blocks_back = elapsed.div_ceil(block_time.get());
    latest_block
        .checked_sub(blocks_back)
        .ok_or(ConfirmationError::TimestampTooOld {
            from_timestamp,
            latest_timestamp,
        })
}

/// Check up to `request.max_blocks` blocks, one at a time, for a quorum of stored signatures.
///
/// `live` only answers for the finalized head. Every query at a specific block goes to `archive`.
pub async fn confirm_from<C: CoordinationChain + ?Sized>(
    live: &C,
    archive: &C,
    request: &BackfillRequest,
) -> Result<BackfillConfirmation, ConfirmationError> {
    let BackfillRequest {
        fingerprint,
        chain_selector,
        from_timestamp,
        max_blocks,
        estimated_block_time,
    } = *request;

    let mut head = live.finalized_head().await?;
    let start = match from_timestamp {
        Some(from) => {
            let latest_timestamp = fetch_block_timestamp(archive, head).await?;
            estimate_start_block(head, latest_timestamp, from, estimated_block_time)?
        }
        None => head,
    };
    info!(%fingerprint, start, head, max_blocks, "searching for a stored proof");

    let mut start_timestamp = None;
    for checked in 0..max_blocks {
        let mut candidate = start.saturating_add(checked);
        if candidate > head {
            head = live.finalized_head().await?;
            candidate = candidate.min(head);
        }

        let timestamp = fetch_block_timestamp(archive, candidate).await?;
        let start_timestamp = *start_timestamp.get_or_insert(timestamp);
        let validators = fetch_validators(archive, chain_selector, Some(candidate)).await?;
        let stored = archive.signatures(fingerprint, Some(candidate)).await?;

        let aggregator =
            SignatureAggregator::from_stored(fingerprint, &validators, stored, timestamp);
        let tally = aggregator.tally();
        debug!(
            block = candidate,
            signatures = tally.len(),
            validators = validators.len(),
            "checked block"
        );

        if quorum::reached(tally.len(), validators.len()) {
            info!(%fingerprint, block = candidate, "found stored proof");
            return Ok(BackfillConfirmation {
                proof: quorum::build_proof(tally),
                timestamp,
                block: candidate,
                start_block: start,
                start_timestamp,
            });
        }
    }

    Err(ConfirmationError::NoProofFound {
        fingerprint,
        from_timestamp,
        max_blocks,
    })
}
