use crate::primitives::{BlockNumber, ChainSelector, MessageFingerprint, Timestamp};

/// Coarse classification of a [ConfirmationError].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A router, validator set, block or timestamp is absent for the requested context.
    NotFound,
    /// The block-count budget ran out before quorum was reached.
    Timeout,
    /// A timestamp-derived starting block would precede genesis.
    OutOfRange,
    /// Any other failure reported by the coordination chain.
    Upstream,
}

/// An error from a confirmation attempt or one of the client's queries.
#[derive(thiserror::Error, Debug)]
pub enum ConfirmationError {
    #[error("router contract not found for chain {chain_selector}")]
    RouterNotFound { chain_selector: ChainSelector },
    #[error("validator set is empty{}", fmt_at(.block))]
    EmptyValidatorSet { block: Option<BlockNumber> },
    #[error("block #{block} not found")]
    BlockNotFound { block: BlockNumber },
    #[error("block #{block} timestamp not found")]
    TimestampNotFound { block: BlockNumber },
    #[error(
        "not enough signatures for message {fingerprint}: {signatures} of {validators} validators"
    )]
    InsufficientSignatures {
        fingerprint: MessageFingerprint,
        signatures: usize,
        validators: usize,
    },
    #[error("timeout listening for signatures of message {fingerprint} after {heads} heads")]
    ListenTimeout {
        fingerprint: MessageFingerprint,
        heads: u64,
    },
    #[error(
        "no proof found for message {fingerprint} from timestamp {} in the last {max_blocks} blocks",
        .from_timestamp.map_or_else(|| "latest".to_owned(), |t| t.to_string())
    )]
    NoProofFound {
        fingerprint: MessageFingerprint,
        from_timestamp: Option<Timestamp>,
        max_blocks: u64,
    },
    #[error(
        "'from_timestamp' {from_timestamp} is too old (latest block timestamp is {latest_timestamp})"
    )]
    TimestampTooOld {
        from_timestamp: Timestamp,
        latest_timestamp: Timestamp,
    },
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

fn fmt_at(block: &Option<BlockNumber>) -> String {
    block.map(|b| format!(" at block #{b}")).unwrap_or_default()
}

impl ConfirmationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfirmationError::RouterNotFound { .. }
            | ConfirmationError::EmptyValidatorSet { .. }
            | ConfirmationError::BlockNotFound { .. }
            | ConfirmationError::TimestampNotFound { .. }
            | ConfirmationError::InsufficientSignatures { .. } => ErrorKind::NotFound,
            ConfirmationError::ListenTimeout { .. } | ConfirmationError::NoProofFound { .. } => {
                ErrorKind::Timeout
            }
            ConfirmationError::TimestampTooOld { .. } => ErrorKind::OutOfRange,
            ConfirmationError::Upstream(_) => ErrorKind::Upstream,
        }
    }
}
