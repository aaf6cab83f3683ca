use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cid::Cid;

/// Largest total shard count the erasure code supports.
pub const MAX_TOTAL_SHARDS: usize = 256;

/// A storage policy violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Desired storage state for one Cid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidConfig {
    pub cid: Cid,
    pub hot: HotConfig,
    pub cold: ColdConfig,
    /// Whether background repair of lost shards is allowed.
    #[serde(default)]
    pub repairable: bool,
}

impl CidConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.hot.validate()?;
        self.cold.validate()
    }

    /// Whether any tier is still enabled, i.e. the Cid cannot be removed.
    pub fn is_active(&self) -> bool {
        self.hot.enabled || self.cold.enabled
    }
}

/// Per-instance template applied to Cids pushed without an explicit config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DefaultCidConfig {
    pub hot: HotConfig,
    pub cold: ColdConfig,
    pub repairable: bool,
}

impl DefaultCidConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.hot.validate()?;
        self.cold.validate()
    }

    /// Materialize the template for `cid`.
    pub fn for_cid(&self, cid: Cid) -> CidConfig {
        CidConfig {
            cid,
            hot: self.hot.clone(),
            cold: self.cold.clone(),
            repairable: self.repairable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotConfig {
    pub enabled: bool,
    /// Allow pulling the data back from cold storage when it is missing from hot storage.
    pub allow_unfreeze: bool,
    pub ipfs: IpfsConfig,
}

impl HotConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.ipfs.add_timeout == 0 {
            return Err(ValidationError::new(
                "hot storage add timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for HotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_unfreeze: false,
            ipfs: IpfsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpfsConfig {
    /// Seconds allowed for making the data available in hot storage.
    pub add_timeout: u64,
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self { add_timeout: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ColdConfig {
    pub enabled: bool,
    pub filecoin: FilConfig,
}

impl ColdConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled {
            self.filecoin.validate()?;
        }
        Ok(())
    }
}

/// Durable-tier parameters: erasure code shape, deal terms and miner filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilConfig {
    pub data_shards: usize,
    pub parity_shards: usize,
    /// Deal duration in epochs.
    pub deal_duration: u64,
    pub excluded_miners: Vec<String>,
    pub country_codes: Vec<String>,
    pub renew: FilRenew,
}

impl FilConfig {
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.data_shards == 0 {
            return Err(ValidationError::new("data shards must be greater than zero"));
        }
        if self.parity_shards == 0 {
            return Err(ValidationError::new(
                "parity shards must be greater than zero",
            ));
        }
        if self.total_shards() > MAX_TOTAL_SHARDS {
            return Err(ValidationError(format!(
                "total shard count {} exceeds {MAX_TOTAL_SHARDS}",
                self.total_shards()
            )));
        }
        if self.deal_duration == 0 {
            return Err(ValidationError::new("deal duration must be greater than zero"));
        }
        if self.excluded_miners.iter().any(|m| m.trim().is_empty()) {
            return Err(ValidationError::new("excluded miners can't be empty strings"));
        }
        if self.country_codes.iter().any(|c| c.trim().is_empty()) {
            return Err(ValidationError::new("country codes can't be empty strings"));
        }
        if self.renew.enabled && self.renew.threshold == 0 {
            return Err(ValidationError::new(
                "renew threshold must be greater than zero when renewal is enabled",
            ));
        }
        Ok(())
    }
}

impl Default for FilConfig {
    fn default() -> Self {
        Self {
            data_shards: 4,
            parity_shards: 2,
            deal_duration: 1000,
            excluded_miners: Vec::new(),
            country_codes: Vec::new(),
            renew: FilRenew::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilRenew {
    pub enabled: bool,
    /// Renew a deal once fewer than this many epochs remain.
    pub threshold: u64,
}
