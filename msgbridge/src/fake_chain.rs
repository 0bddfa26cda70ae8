//! A scripted, in-memory [CoordinationChain]. Every query is answered from state set up by the
//! test, and every call is counted so tests can assert on how the engine talked to the node.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use alloy::primitives::{Address, B256, Bytes};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::future;
use parking_lot::Mutex;

use crate::{
    chain::{
        Block, BlockHeader, CoordinationChain, EventRecord, Extrinsic, HeadSubscription, Phase,
        RuntimeEvent, StoredSignature,
    },
    primitives::{
        BlockHash, BlockNumber, ChainSelector, MessageFingerprint, Timestamp, ValidatorId,
        ValidatorSet,
    },
};

/// Deterministic hash for a block number.
pub fn fake_block_hash(number: BlockNumber) -> BlockHash {
    let mut hash = [0xbb; 32];
    hash[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(hash)
}

/// A `SignatureSubmitted` event emitted while applying extrinsic `index`.
pub fn signature_submitted(
    index: u32,
    who: ValidatorId,
    message: MessageFingerprint,
    signature: impl Into<Bytes>,
) -> EventRecord {
    EventRecord {
        phase: Phase::ApplyExtrinsic(index),
        event: RuntimeEvent::SignatureSubmitted {
            who,
            message,
            signature: signature.into(),
        },
    }
}

#[derive(Debug, Default)]
struct Calls {
    validators: AtomicUsize,
    router: AtomicUsize,
    signatures: AtomicUsize,
    events: AtomicUsize,
    subscriptions: AtomicUsize,
    unsubscribes: AtomicUsize,
    /// Subscriptions handed out and not yet dropped.
    open_subscriptions: AtomicUsize,
    heads_delivered: AtomicUsize,
}

#[derive(Debug, Default)]
struct State {
    validators: ValidatorSet,
    validators_at: HashMap<BlockNumber, ValidatorSet>,
    next_validators: ValidatorSet,
    routers: HashMap<ChainSelector, Address>,
    blocks: BTreeMap<BlockNumber, Block>,
    events: HashMap<BlockHash, Vec<EventRecord>>,
    failing_events: HashSet<BlockHash>,
    signatures: HashMap<(MessageFingerprint, BlockNumber), Vec<StoredSignature>>,
    heads: Vec<BlockNumber>,
    hold_open: bool,
    finalized: BlockNumber,
}

#[derive(Debug, Default)]
pub struct FakeChain {
    state: Mutex<State>,
    calls: Arc<Calls>,
}

impl FakeChain {
    pub fn new(validators: impl IntoIterator<Item = ValidatorId>) -> Self {
        let chain = FakeChain::default();
        chain.state.lock().validators = validators.into_iter().collect();
        chain
    }

    pub fn set_validators(&self, validators: impl IntoIterator<Item = ValidatorId>) {
        self.state.lock().validators = validators.into_iter().collect();
    }

    /// Validators as of `block`. Blocks without an override use the default set.
    pub fn set_validators_at(
        &self,
        block: BlockNumber,
        validators: impl IntoIterator<Item = ValidatorId>,
    ) {
        self.state
            .lock()
            .validators_at
            .insert(block, validators.into_iter().collect());
    }

    pub fn set_next_validators(&self, validators: impl IntoIterator<Item = ValidatorId>) {
        self.state.lock().next_validators = validators.into_iter().collect();
    }

    pub fn set_router(&self, chain_selector: ChainSelector, router: Address) {
        self.state.lock().routers.insert(chain_selector, router);
    }

    /// Add a block with a timestamp inherent (if `timestamp` is set) followed by enough extrinsics
    /// for every `ApplyExtrinsic` index in `events`. Moves the finalized head up to it.
    pub fn add_block(
        &self,
        number: BlockNumber,
        timestamp: Option<Timestamp>,
        events: Vec<EventRecord>,
    ) -> BlockHash {
        let applied = events
            .iter()
            .filter_map(|e| match e.phase {
                Phase::ApplyExtrinsic(i) => Some(i as usize + 1),
                Phase::Finalization | Phase::Initialization => None,
            })
            .max()
            .unwrap_or(0);

        let mut extrinsics: Vec<_> = timestamp
            .map(|now| Extrinsic::TimestampSet { now })
            .into_iter()
            .collect();
        while extrinsics.len() < applied {
            extrinsics.push(Extrinsic::Other {
                section: "attestation".to_owned(),
                method: "submitSignature".to_owned(),
            });
        }
        self.add_block_with_extrinsics(number, extrinsics, events)
    }

    pub fn add_block_with_extrinsics(
        &self,
        number: BlockNumber,
        extrinsics: Vec<Extrinsic>,
        events: Vec<EventRecord>,
    ) -> BlockHash {
        let hash = fake_block_hash(number);
        let mut state = self.state.lock();
        state.blocks.insert(
            number,
            Block {
                header: BlockHeader { number, hash },
                extrinsics,
            },
        );
        state.events.insert(hash, events);
        state.finalized = state.finalized.max(number);
        hash
    }

    /// Make event queries for `block` fail.
    pub fn fail_events_at(&self, block: BlockNumber) {
        self.state.lock().failing_events.insert(fake_block_hash(block));
    }

    pub fn set_signatures(
        &self,
        fingerprint: MessageFingerprint,
        block: BlockNumber,
        signatures: Vec<StoredSignature>,
    ) {
        self.state
            .lock()
            .signatures
            .insert((fingerprint, block), signatures);
    }

    /// Headers delivered, in order, to each new head subscription. The subscription closes after
    /// the last one.
    pub fn set_heads(&self, heads: Vec<BlockNumber>) {
        self.state.lock().heads = heads;
    }

    /// Keep subscriptions open after the scripted heads run out, waiting forever for the next one.
    pub fn hold_subscriptions_open(&self) {
        self.state.lock().hold_open = true;
    }

    pub fn set_finalized(&self, block: BlockNumber) {
        self.state.lock().finalized = block;
    }

    pub fn validator_queries(&self) -> usize {
        self.calls.validators.load(Ordering::SeqCst)
    }

    pub fn router_queries(&self) -> usize {
        self.calls.router.load(Ordering::SeqCst)
    }

    pub fn signature_queries(&self) -> usize {
        self.calls.signatures.load(Ordering::SeqCst)
    }

    pub fn event_queries(&self) -> usize {
        self.calls.events.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.calls.subscriptions.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.calls.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn open_subscriptions(&self) -> usize {
        self.calls.open_subscriptions.load(Ordering::SeqCst)
    }

    pub fn heads_delivered(&self) -> usize {
        self.calls.heads_delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationChain for FakeChain {
    async fn validators(
        &self,
        _chain_selector: ChainSelector,
        at: Option<BlockNumber>,
    ) -> Result<ValidatorSet> {
        self.calls.validators.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let validators = at
            .and_then(|block| state.validators_at.get(&block))
            .unwrap_or(&state.validators);
        Ok(validators.clone())
    }

    async fn next_validators(&self) -> Result<ValidatorSet> {
        Ok(self.state.lock().next_validators.clone())
    }

    async fn router(&self, chain_selector: ChainSelector) -> Result<Option<Address>> {
        self.calls.router.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().routers.get(&chain_selector).copied())
    }

    async fn block_hash(&self, number: BlockNumber) -> Result<Option<BlockHash>> {
        Ok(self
            .state
            .lock()
            .blocks
            .get(&number)
            .map(|b| b.header.hash))
    }

    async fn block(&self, hash: BlockHash) -> Result<Option<Block>> {
        Ok(self
            .state
            .lock()
            .blocks
            .values()
            .find(|b| b.header.hash == hash)
            .cloned())
    }

    async fn events(&self, at: BlockHash) -> Result<Vec<EventRecord>> {
        self.calls.events.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.failing_events.contains(&at) {
            return Err(anyhow!("state for block {at} is unavailable"));
        }
        Ok(state.events.get(&at).cloned().unwrap_or_default())
    }

    async fn signatures(
        &self,
        fingerprint: MessageFingerprint,
        at: Option<BlockNumber>,
    ) -> Result<Vec<StoredSignature>> {
        self.calls.signatures.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let block = at.unwrap_or(state.finalized);
        Ok(state
            .signatures
            .get(&(fingerprint, block))
            .cloned()
            .unwrap_or_default())
    }

    async fn finalized_head(&self) -> Result<BlockNumber> {
        Ok(self.state.lock().finalized)
    }

    async fn subscribe_new_heads(&self) -> Result<Box<dyn HeadSubscription>> {
        self.calls.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.calls.open_subscriptions.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let heads = state
            .heads
            .iter()
            .map(|&number| BlockHeader {
                number,
                hash: fake_block_hash(number),
            })
            .collect();
        Ok(Box::new(FakeHeads {
            heads,
            hold_open: state.hold_open,
            calls: self.calls.clone(),
        }))
    }
}

struct FakeHeads {
    heads: VecDeque<BlockHeader>,
    hold_open: bool,
    calls: Arc<Calls>,
}

impl Drop for FakeHeads {
    fn drop(&mut self) {
        self.calls.open_subscriptions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HeadSubscription for FakeHeads {
    async fn next_head(&mut self) -> Option<Result<BlockHeader>> {
        let Some(header) = self.heads.pop_front() else {
            if self.hold_open {
                future::pending::<()>().await;
            }
            return None;
        };
        self.calls.heads_delivered.fetch_add(1, Ordering::SeqCst);
        Some(Ok(header))
    }

    async fn unsubscribe(self: Box<Self>) -> Result<()> {
        self.calls.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
