//! Wallet and miner-selection contracts plus their local implementations.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MinerConfig;
use crate::error::BackendError;
use crate::storage::{KvStore, KvStoreExt};

#[async_trait]
pub trait WalletManager: Send + Sync {
    /// Create a new address of the given type (`bls` or `secp256k1`).
    async fn new_address(&self, address_type: &str) -> Result<String, BackendError>;

    async fn balance(&self, address: &str) -> Result<u64, BackendError>;
}

/// A miner offer returned by a [`MinerSelector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerProposal {
    pub addr: String,
    pub epoch_price: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinerSelectorFilter {
    pub excluded_miners: Vec<String>,
    /// When non-empty, only miners located in one of these countries qualify.
    pub country_codes: Vec<String>,
}

#[async_trait]
pub trait MinerSelector: Send + Sync {
    /// Return up to `count` miners matching `filter`, cheapest first.
    async fn get_miners(
        &self,
        count: usize,
        filter: MinerSelectorFilter,
    ) -> Result<Vec<MinerProposal>, BackendError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct WalletRecord {
    address_type: String,
    balance: u64,
}

/// Wallet that mints addresses locally and funds each with a fixed balance.
pub struct LocalWallet {
    kv: Arc<dyn KvStore>,
    initial_balance: u64,
}

impl LocalWallet {
    pub fn new(kv: Arc<dyn KvStore>, initial_balance: u64) -> Self {
        Self {
            kv,
            initial_balance,
        }
    }

    fn key(address: &str) -> String {
        format!("wallet/{address}")
    }
}

#[async_trait]
impl WalletManager for LocalWallet {
    async fn new_address(&self, address_type: &str) -> Result<String, BackendError> {
        let protocol = match address_type {
            "secp256k1" => 1,
            "bls" => 3,
            other => {
                return Err(BackendError::InvalidInput(format!(
                    "unsupported address type '{other}'"
                )));
            }
        };

        let payload: [u8; 20] = rand::rng().random();
        let address = format!("f{protocol}{}", hex::encode(payload));
        self.kv
            .put_json(
                &Self::key(&address),
                &WalletRecord {
                    address_type: address_type.to_string(),
                    balance: self.initial_balance,
                },
            )
            .await?;

        debug!(address = %address, "Created wallet address");
        Ok(address)
    }

    async fn balance(&self, address: &str) -> Result<u64, BackendError> {
        let record: WalletRecord = self.kv.get_json(&Self::key(address)).await?;
        Ok(record.balance)
    }
}

/// Miner selector over a fixed, configured set of miners.
pub struct StaticMinerSelector {
    miners: Vec<MinerConfig>,
}

impl StaticMinerSelector {
    pub fn new(miners: Vec<MinerConfig>) -> Self {
        Self { miners }
    }
}

#[async_trait]
impl MinerSelector for StaticMinerSelector {
    async fn get_miners(
        &self,
        count: usize,
        filter: MinerSelectorFilter,
    ) -> Result<Vec<MinerProposal>, BackendError> {
        let mut candidates: Vec<&MinerConfig> = self
            .miners
            .iter()
            .filter(|m| !filter.excluded_miners.contains(&m.addr))
            .filter(|m| filter.country_codes.is_empty() || filter.country_codes.contains(&m.country))
            .collect();

        if candidates.is_empty() {
            return Err(BackendError::NoMiners);
        }

        candidates.sort_by(|a, b| a.epoch_price.cmp(&b.epoch_price).then(a.addr.cmp(&b.addr)));
        Ok(candidates
            .into_iter()
            .take(count)
            .map(|m| MinerProposal {
                addr: m.addr.clone(),
                epoch_price: m.epoch_price,
            })
            .collect())
    }
}
