use std::{fs, path::Path};

use anyhow::{Context, Result, anyhow};

pub mod backfill;
pub mod cfg;
pub mod chain;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "fake_chain"))]
pub mod fake_chain;
pub mod listener;
pub mod message;
pub mod primitives;
pub mod quorum;
pub mod signatures;

pub fn read_config(config_file: &Path) -> Result<cfg::Config> {
    if !config_file.exists() {
        return Err(anyhow!("config file {} does not exist", config_file.display()));
    }
    let config_content = fs::read_to_string(config_file)
        .with_context(|| format!("failed to read {}", config_file.display()))?;

    toml::from_str(&config_content)
        .with_context(|| format!("invalid config in {}", config_file.display()))
}
