//! Streaming confirmation: follow new heads until enough validators have signed a message.
//!
//! Heads are handled strictly one after another, in the order the node delivers them. Each attempt
//! owns its validator set snapshot and its tally, so concurrent attempts for different messages
//! never share state.

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::{
    chain::{
        Block, BlockHeader, CoordinationChain, EventRecord, HeadSubscription, Phase, RuntimeEvent,
        fetch_block,
    },
    error::ConfirmationError,
    primitives::{MessageFingerprint, Timestamp, ValidatorSet},
    quorum::{self, Confirmation},
    signatures::{SignatureAggregator, SignatureRecord, SignatureTally},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    /// Subscribed, no head processed yet.
    Waiting,
    Accumulating,
    Confirmed,
    TimedOut,
    Failed,
}

impl ListenState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ListenState::Confirmed | ListenState::TimedOut | ListenState::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadOutcome {
    Pending,
    Confirmed(Confirmation),
    TimedOut,
}

/// The state of one streaming confirmation attempt.
#[derive(Debug)]
pub struct ListenAttempt {
    aggregator: SignatureAggregator,
    /// Snapshot taken when the attempt started. Never refreshed mid-attempt.
    validators: ValidatorSet,
    timeout: u64,
    heads: u64,
    state: ListenState,
}

impl ListenAttempt {
    pub fn new(fingerprint: MessageFingerprint, validators: ValidatorSet, timeout: u64) -> Self {
        ListenAttempt {
            aggregator: SignatureAggregator::new(fingerprint),
            validators,
            timeout,
            heads: 0,
            state: ListenState::Waiting,
        }
    }

    pub fn state(&self) -> ListenState {
        self.state
    }

    /// Number of heads seen so far, including skipped ones.
    pub fn heads(&self) -> u64 {
        self.heads
    }

    pub fn tally(&self) -> &SignatureTally {
        self.aggregator.tally()
    }

    /// Process a new head. Any error moves the attempt to [ListenState::Failed].
    pub async fn handle_head<C: CoordinationChain + ?Sized>(
        &mut self,
        chain: &C,
        header: BlockHeader,
    ) -> Result<HeadOutcome, ConfirmationError> {
        if self.state.is_terminal() {
            return Err(anyhow!("head #{} delivered to a finished attempt", header.number).into());
        }
        self.heads += 1;
        self.state = ListenState::Accumulating;

        match self.accumulate(chain, header).await {
            Ok(outcome) => {
                match outcome {
                    HeadOutcome::Confirmed(_) => self.state = ListenState::Confirmed,
                    HeadOutcome::TimedOut => self.state = ListenState::TimedOut,
                    HeadOutcome::Pending => {}
                }
                Ok(outcome)
            }
            Err(e) => {
                self.state = ListenState::Failed;
                Err(e)
            }
        }
    }

    async fn accumulate<C: CoordinationChain + ?Sized>(
        &mut self,
        chain: &C,
        header: BlockHeader,
    ) -> Result<HeadOutcome, ConfirmationError> {
        let block = fetch_block(chain, header.number).await?;

        // A block without a timestamp is skipped entirely. It still counts as a head, so the
        // timeout fires on the next block that is evaluated.
        let Some(timestamp) = block.timestamp() else {
            debug!(block = header.number, "no timestamp in block, skipping");
            return Ok(HeadOutcome::Pending);
        };

        let events = chain.events(block.header.hash).await?;
        let added = self.collect(&block, &events, timestamp);
        let tally = self.aggregator.tally();
        debug!(
            block = header.number,
            added,
            signatures = tally.len(),
            validators = self.validators.len(),
            "processed head"
        );

        if quorum::reached(tally.len(), self.validators.len()) {
            if let Some(confirmation) = Confirmation::from_tally(tally) {
                return Ok(HeadOutcome::Confirmed(confirmation));
            }
        }

        if self.heads > self.timeout {
            return Ok(HeadOutcome::TimedOut);
        }
        Ok(HeadOutcome::Pending)
    }

    /// Record every signature over our message that a validator submitted in this block, extrinsic
    /// by extrinsic.
    fn collect(&mut self, block: &Block, events: &[EventRecord], timestamp: Timestamp) -> usize {
        let fingerprint = self.aggregator.fingerprint();
        let mut added = 0;

        for (index, _) in (0u32..).zip(&block.extrinsics) {
            let applied = events
                .iter()
                .filter(|record| record.phase == Phase::ApplyExtrinsic(index));
            for record in applied {
                match &record.event {
                    RuntimeEvent::SignatureSubmitted {
                        who,
                        message,
                        signature,
                    } if *message == fingerprint && self.validators.contains(who) => {
                        let accepted = self.aggregator.record(SignatureRecord {
                            validator: *who,
                            fingerprint,
                            signature: signature.clone(),
                            block_timestamp: timestamp,
                        });
                        if accepted {
                            debug!(
                                validator = %who,
                                block = block.header.number,
                                "signature accepted"
                            );
                            added += 1;
                        }
                    }
                    RuntimeEvent::SignatureSubmitted { .. } | RuntimeEvent::Other { .. } => {}
                }
            }
        }

        added
    }

    /// Feed heads from the subscription until the attempt finishes.
    async fn run<C: CoordinationChain + ?Sized>(
        &mut self,
        chain: &C,
        subscription: &mut dyn HeadSubscription,
    ) -> Result<Confirmation, ConfirmationError> {
        loop {
            let header = match subscription.next_head().await {
                Some(Ok(header)) => header,
                Some(Err(e)) => {
                    self.state = ListenState::Failed;
                    return Err(e.into());
                }
                None => {
                    self.state = ListenState::Failed;
                    return Err(anyhow!("head subscription closed by the node").into());
                }
            };

            match self.handle_head(chain, header).await? {
                HeadOutcome::Confirmed(confirmation) => return Ok(confirmation),
                HeadOutcome::TimedOut => {
                    return Err(ConfirmationError::ListenTimeout {
                        fingerprint: self.aggregator.fingerprint(),
                        heads: self.heads,
                    });
                }
                HeadOutcome::Pending => {}
            }
        }
    }
}

/// Subscribe to new heads and wait for `fingerprint` to reach quorum among `validators`.
///
/// The subscription is torn down exactly once, before the result is returned, whatever the
/// outcome. Dropping the returned future instead drops the subscription, which adapters must treat
/// as a teardown too (see [HeadSubscription]).
pub async fn listen<C: CoordinationChain + ?Sized>(
    chain: &C,
    fingerprint: MessageFingerprint,
    validators: ValidatorSet,
    timeout: u64,
) -> Result<Confirmation, ConfirmationError> {
    let mut subscription = chain.subscribe_new_heads().await?;
    info!(
        %fingerprint,
        validators = validators.len(),
        timeout,
        "listening for signatures"
    );

    let mut attempt = ListenAttempt::new(fingerprint, validators, timeout);
    let result = attempt.run(chain, subscription.as_mut()).await;

    if let Err(e) = subscription.unsubscribe().await {
        warn!(%fingerprint, "failed to unsubscribe from new heads: {e:?}");
    }

    match &result {
        Ok(confirmation) => info!(
            %fingerprint,
            timestamp = confirmation.timestamp,
            signatures = attempt.tally().len(),
            heads = attempt.heads(),
            "message confirmed"
        ),
        Err(e) => warn!(
            %fingerprint,
            heads = attempt.heads(),
            state = ?attempt.state(),
            "confirmation failed: {e}"
        ),
    }
    result
}
