//! The coordination chain as seen by the confirmation engine.
//!
//! Everything here is implemented by an RPC adapter outside this crate. The engine only relies on
//! the typed views below, so adapters are free to decode runtime storage and extrinsics however
//! their runtime requires.

use alloy::primitives::{Address, Bytes};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfirmationError,
    primitives::{
        BlockHash, BlockNumber, ChainSelector, MessageFingerprint, Timestamp, ValidatorId,
        ValidatorSet,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: BlockNumber,
    pub hash: BlockHash,
}

/// The extrinsics the engine cares about. Anything else is carried as its pallet and call name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extrinsic {
    /// `timestamp.set`, the inherent that fixes a block's time.
    TimestampSet { now: Timestamp },
    Other { section: String, method: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub extrinsics: Vec<Extrinsic>,
}

impl Block {
    /// The time set by this block's timestamp inherent, if it has one.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.extrinsics.iter().find_map(|x| match x {
            Extrinsic::TimestampSet { now } => Some(*now),
            Extrinsic::Other { .. } => None,
        })
    }
}

/// When, during block execution, an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// While applying the extrinsic at this index.
    ApplyExtrinsic(u32),
    Finalization,
    Initialization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeEvent {
    /// A validator stored its signature over a message.
    SignatureSubmitted {
        who: ValidatorId,
        message: MessageFingerprint,
        signature: Bytes,
    },
    Other { section: String, method: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub phase: Phase,
    pub event: RuntimeEvent,
}

/// A signature as kept in the coordination chain's storage, keyed by the validator that submitted
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSignature {
    pub validator: ValidatorId,
    pub signature: Bytes,
}

/// A live subscription to new block headers.
///
/// The engine calls [HeadSubscription::unsubscribe] exactly once when an attempt finishes. If the
/// attempt is cancelled instead (its future dropped, or its task aborted), the subscription is
/// dropped without that call, so implementations must also release the node-side subscription in
/// their `Drop`.
#[async_trait]
pub trait HeadSubscription: Send {
    /// The next header, in arrival order. `None` once the node closes the subscription.
    async fn next_head(&mut self) -> Option<Result<BlockHeader>>;

    /// Tear the subscription down. Consumes it, so it can only happen once.
    async fn unsubscribe(self: Box<Self>) -> Result<()>;
}

/// The node queries a confirmation attempt depends on.
///
/// Methods taking an `at` block query state as of that block; `None` means the latest state.
#[async_trait]
pub trait CoordinationChain: Send + Sync {
    /// The active session validators.
    async fn validators(
        &self,
        chain_selector: ChainSelector,
        at: Option<BlockNumber>,
    ) -> Result<ValidatorSet>;

    /// The validators queued for the next session.
    async fn next_validators(&self) -> Result<ValidatorSet>;

    /// The router contract registered for a connected chain. May be the zero address if none is
    /// registered.
    async fn router(&self, chain_selector: ChainSelector) -> Result<Option<Address>>;

    async fn block_hash(&self, number: BlockNumber) -> Result<Option<BlockHash>>;

    async fn block(&self, hash: BlockHash) -> Result<Option<Block>>;

    /// All runtime events emitted in the block with this hash.
    async fn events(&self, at: BlockHash) -> Result<Vec<EventRecord>>;

    /// Signatures stored for a message.
    async fn signatures(
        &self,
        fingerprint: MessageFingerprint,
        at: Option<BlockNumber>,
    ) -> Result<Vec<StoredSignature>>;

    async fn finalized_head(&self) -> Result<BlockNumber>;

    async fn subscribe_new_heads(&self) -> Result<Box<dyn HeadSubscription>>;
}

/// Resolve a block by number.
pub async fn fetch_block<C: CoordinationChain + ?Sized>(
    chain: &C,
    number: BlockNumber,
) -> Result<Block, ConfirmationError> {
    let hash = chain
        .block_hash(number)
        .await?
        .ok_or(ConfirmationError::BlockNotFound { block: number })?;
    chain
        .block(hash)
        .await?
        .ok_or(ConfirmationError::BlockNotFound { block: number })
}

pub async fn fetch_block_timestamp<C: CoordinationChain + ?Sized>(
    chain: &C,
    number: BlockNumber,
) -> Result<Timestamp, ConfirmationError> {
    fetch_block(chain, number)
        .await?
        .timestamp()
        .ok_or(ConfirmationError::TimestampNotFound { block: number })
}

/// Fetch the active validator set, treating an empty set as missing. A quorum of an empty set
/// would be vacuous.
pub async fn fetch_validators<C: CoordinationChain + ?Sized>(
    chain: &C,
    chain_selector: ChainSelector,
    at: Option<BlockNumber>,
) -> Result<ValidatorSet, ConfirmationError> {
    let validators = chain.validators(chain_selector, at).await?;
    if validators.is_empty() {
        return Err(ConfirmationError::EmptyValidatorSet { block: at });
    }
    Ok(validators)
}
