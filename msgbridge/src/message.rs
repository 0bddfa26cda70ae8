use alloy::{
    primitives::{B256, U256, keccak256},
    sol_types::SolValue,
};
use serde::{Deserialize, Serialize};

use crate::primitives::{ChainSelector, MessageFingerprint};

/// An address on any connected chain, split into two 32-byte words so that non-EVM addresses fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainAddress {
    pub lower: B256,
    pub upper: B256,
}

/// A message submitted to a source chain's router, as emitted in its `MessageSendRequested` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainMessage {
    pub block_number: u64,
    pub source_chain_selector: ChainSelector,
    pub sender: ChainAddress,
    pub destination_chain_selector: ChainSelector,
    pub receiver: ChainAddress,
    /// Hash of the message payload, which travels separately.
    pub hashed_data: B256,
}

impl CrossChainMessage {
    /// keccak256 over the ABI encoding of
    /// `(uint256, uint256, bytes32, bytes32, uint256, bytes32, bytes32, bytes32)`, in field order.
    /// Validators sign this value, so it must match the router contract bit for bit.
    pub fn fingerprint(&self) -> MessageFingerprint {
        let encoded = (
            U256::from(self.block_number),
            U256::from(self.source_chain_selector),
            self.sender.lower,
            self.sender.upper,
            U256::from(self.destination_chain_selector),
            self.receiver.lower,
            self.receiver.upper,
            self.hashed_data,
        )
            .abi_encode_params();
        keccak256(encoded)
    }
}
