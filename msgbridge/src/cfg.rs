use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

/// Tuning for confirmation attempts. Both budgets are counted in blocks, never in wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of new heads a streaming attempt may observe before it times out. Defaults to 20.
    #[serde(default = "listen_timeout_default")]
    pub listen_timeout: u64,
    /// Number of finalized blocks a backfill attempt may check before giving up. Defaults to 5.
    #[serde(default = "max_blocks_checked_default")]
    pub max_blocks_checked: u64,
    /// Expected interval between blocks on the coordination chain, in milliseconds. Only used to
    /// estimate which block to start a backfill from. Must not be zero. Defaults to 6 seconds.
    #[serde(default = "estimated_block_time_default")]
    pub estimated_block_time: NonZeroU64,
}

pub fn listen_timeout_default() -> u64 {
    20
}

pub fn max_blocks_checked_default() -> u64 {
    5
}

pub fn estimated_block_time_default() -> NonZeroU64 {
    const DEFAULT: NonZeroU64 = NonZeroU64::new(6_000).unwrap();
    DEFAULT
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_timeout: listen_timeout_default(),
            max_blocks_checked: max_blocks_checked_default(),
            estimated_block_time: estimated_block_time_default(),
        }
    }
}
