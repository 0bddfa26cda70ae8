//! The SDK entry point: queries against the coordination chain plus both ways of confirming a
//! message.

use std::{collections::HashMap, fmt, sync::Arc};

use alloy::primitives::Address;
use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    backfill::{self, BackfillConfirmation, BackfillRequest},
    cfg::Config,
    chain::{CoordinationChain, fetch_block_timestamp, fetch_validators},
    error::ConfirmationError,
    listener,
    primitives::{BlockNumber, ChainSelector, MessageFingerprint, Timestamp, ValidatorSet},
    quorum::{self, Confirmation, Proof},
    signatures::filter_stored,
};

type OnConfirm = Box<dyn FnOnce(Confirmation) -> BoxFuture<'static, ()> + Send>;
type OnError = Box<dyn FnOnce(ConfirmationError) + Send>;

/// Callbacks and overrides for [Client::spawn_listener].
pub struct ListenArgs {
    on_confirm: OnConfirm,
    on_error: Option<OnError>,
    timeout: Option<u64>,
}

impl ListenArgs {
    pub fn new<F, Fut>(on_confirm: F) -> Self
    where
        F: FnOnce(Confirmation) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        ListenArgs {
            on_confirm: Box::new(move |c| on_confirm(c).boxed()),
            on_error: None,
            timeout: None,
        }
    }

    /// Receive failures here instead of through the task's join handle.
    pub fn on_error(mut self, on_error: impl FnOnce(ConfirmationError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Override the configured listen timeout, in blocks.
    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for ListenArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenArgs")
            .field("on_error", &self.on_error.is_some())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetConfirmationArgs {
    pub from_timestamp: Option<Timestamp>,
    /// Overrides [Config::max_blocks_checked].
    pub max_blocks: Option<u64>,
}

/// A handle to the coordination chain. Cheap to clone; clones share the router cache.
pub struct Client<C> {
    live: Arc<C>,
    /// Answers queries at historical blocks. The live node is used when there is none.
    archive: Option<Arc<C>>,
    config: Config,
    routers: Arc<Mutex<HashMap<ChainSelector, Address>>>,
}

impl<C> Clone for Client<C> {
    fn clone(&self) -> Self {
        Client {
            live: self.live.clone(),
            archive: self.archive.clone(),
            config: self.config.clone(),
            routers: self.routers.clone(),
        }
    }
}

impl<C> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("archive", &self.archive.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: CoordinationChain + 'static> Client<C> {
    pub fn new(live: C, config: Config) -> Self {
        Self::from_shared(Arc::new(live), None, config)
    }

    pub fn with_archive(live: C, archive: C, config: Config) -> Self {
        Self::from_shared(Arc::new(live), Some(Arc::new(archive)), config)
    }

    pub fn from_shared(live: Arc<C>, archive: Option<Arc<C>>, config: Config) -> Self {
        Client {
            live,
            archive,
            config,
            routers: Arc::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn archive(&self) -> &C {
        self.archive.as_deref().unwrap_or(self.live.as_ref())
    }

    /// The node to ask for state as of `at`.
    fn chain_at(&self, at: Option<BlockNumber>) -> &C {
        match at {
            Some(_) => self.archive(),
            None => self.live.as_ref(),
        }
    }

    /// The router contract registered for `chain_selector`. Found routers are cached for the life
    /// of the client.
    pub async fn router(
        &self,
        chain_selector: ChainSelector,
    ) -> Result<Address, ConfirmationError> {
        let cached = self.routers.lock().get(&chain_selector).copied();
        if let Some(router) = cached {
            return Ok(router);
        }

        let router = self
            .live
            .router(chain_selector)
            .await?
            .filter(|r| !r.is_zero())
            .ok_or(ConfirmationError::RouterNotFound { chain_selector })?;
        debug!(chain_selector, %router, "found router");
        self.routers.lock().insert(chain_selector, router);
        Ok(router)
    }

    pub async fn validators(
        &self,
        chain_selector: ChainSelector,
        at: Option<BlockNumber>,
    ) -> Result<ValidatorSet, ConfirmationError> {
        fetch_validators(self.chain_at(at), chain_selector, at).await
    }

    pub async fn next_validators(&self) -> Result<ValidatorSet, ConfirmationError> {
        Ok(self.live.next_validators().await?)
    }

    pub async fn block_timestamp(
        &self,
        number: BlockNumber,
    ) -> Result<Timestamp, ConfirmationError> {
        fetch_block_timestamp(self.archive(), number).await
    }

    /// The proof currently stored for a message, failing unless it already has a quorum.
    pub async fn proof(
        &self,
        fingerprint: MessageFingerprint,
        chain_selector: ChainSelector,
        at: Option<BlockNumber>,
    ) -> Result<Proof, ConfirmationError> {
        let chain = self.chain_at(at);
        let validators = fetch_validators(chain, chain_selector, at).await?;
        let signatures = filter_stored(&validators, chain.signatures(fingerprint, at).await?);

        if !quorum::reached(signatures.len(), validators.len()) {
            return Err(ConfirmationError::InsufficientSignatures {
                fingerprint,
                signatures: signatures.len(),
                validators: validators.len(),
            });
        }
        Ok(quorum::concat_signatures(signatures.iter().map(|s| &s.signature)))
    }

    /// Follow new heads until `fingerprint` reaches quorum, or `timeout` heads (the configured
    /// default if `None`) have passed.
    pub async fn listen_for_confirmation(
        &self,
        fingerprint: MessageFingerprint,
        chain_selector: ChainSelector,
        timeout: Option<u64>,
    ) -> Result<Confirmation, ConfirmationError> {
        let validators = fetch_validators(self.live.as_ref(), chain_selector, None).await?;
        let timeout = timeout.unwrap_or(self.config.listen_timeout);
        listener::listen(self.live.as_ref(), fingerprint, validators, timeout).await
    }

    /// Run [Client::listen_for_confirmation] in the background and report through the callbacks in
    /// `args`.
    ///
    /// The task resolves to `Ok(())` once a callback has run. Without an `on_error` callback,
    /// failures are returned through the join handle instead. Aborting the task drops the head
    /// subscription without an explicit unsubscribe.
    pub fn spawn_listener(
        &self,
        fingerprint: MessageFingerprint,
        chain_selector: ChainSelector,
        args: ListenArgs,
    ) -> JoinHandle<Result<(), ConfirmationError>> {
        let client = self.clone();
        tokio::spawn(async move {
            let ListenArgs {
                on_confirm,
                on_error,
                timeout,
            } = args;
            match client
                .listen_for_confirmation(fingerprint, chain_selector, timeout)
                .await
            {
                Ok(confirmation) => {
                    on_confirm(confirmation).await;
                    Ok(())
                }
                Err(e) => match on_error {
                    Some(on_error) => {
                        on_error(e);
                        Ok(())
                    }
                    None => {
                        warn!(%fingerprint, "listener failed with no error callback");
                        Err(e)
                    }
                },
            }
        })
    }

    /// Look for a stored quorum in the blocks following `args.from_timestamp`.
    pub async fn get_confirmation(
        &self,
        fingerprint: MessageFingerprint,
        chain_selector: ChainSelector,
        args: GetConfirmationArgs,
    ) -> Result<BackfillConfirmation, ConfirmationError> {
        let request = BackfillRequest {
            fingerprint,
            chain_selector,
            from_timestamp: args.from_timestamp,
            max_blocks: args.max_blocks.unwrap_or(self.config.max_blocks_checked),
            estimated_block_time: self.config.estimated_block_time,
        };
        backfill::confirm_from(self.live.as_ref(), self.archive(), &request).await
    }
}
