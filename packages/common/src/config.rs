use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cid_config::{ColdConfig, DefaultCidConfig, FilConfig};
use crate::dag::DEFAULT_CHUNK_SIZE;

/// Location of the node's persistent state.
#[derive(Debug, Deserialize, Clone)]
pub struct RepoConfig {
    /// Root directory for block and record stores. Default: "~/.strata".
    #[serde(default = "default_repo_path")]
    pub path: PathBuf,
}

fn default_repo_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".strata"))
        .unwrap_or_else(|| PathBuf::from(".strata"))
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            path: default_repo_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Jobs executing at the same time. Default: 4.
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,
    /// Seconds between renewal sweeps; 0 disables the loop. Default: 0.
    #[serde(default)]
    pub renewal_interval_secs: u64,
}

fn default_max_parallel_jobs() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: default_max_parallel_jobs(),
            renewal_interval_secs: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HotStorageConfig {
    /// Leaf size used when importing content. Default: 256 KiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Largest block accepted by the block store. Default: 4 MiB.
    #[serde(default = "default_max_block_size")]
    pub max_block_size: u64,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_max_block_size() -> u64 {
    4 * 1024 * 1024
}

impl Default for HotStorageConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_block_size: default_max_block_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ColdStorageConfig {
    /// Wall-clock length of one deal epoch. Default: 30.
    #[serde(default = "default_epoch_secs")]
    pub epoch_secs: u64,
    /// Chance that a single shard fetch succeeds. Default: 1.0.
    #[serde(default = "default_retrieval_success_prob")]
    pub retrieval_success_prob: f64,
}

fn default_epoch_secs() -> u64 {
    30
}
fn default_retrieval_success_prob() -> f64 {
    1.0
}

impl Default for ColdStorageConfig {
    fn default() -> Self {
        Self {
            epoch_secs: default_epoch_secs(),
            retrieval_success_prob: default_retrieval_success_prob(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalletConfig {
    /// Address type for new instance wallets. Default: "bls".
    #[serde(default = "default_address_type")]
    pub address_type: String,
    /// Balance credited to each new address. Default: 4000000000.
    #[serde(default = "default_initial_balance")]
    pub initial_balance: u64,
}

fn default_address_type() -> String {
    "bls".into()
}
fn default_initial_balance() -> u64 {
    4_000_000_000
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            address_type: default_address_type(),
            initial_balance: default_initial_balance(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct MinerConfig {
    pub addr: String,
    pub epoch_price: u64,
    #[serde(default)]
    pub country: String,
}

fn default_miners() -> Vec<MinerConfig> {
    [("f01000", 500_000, "US"), ("f01001", 600_000, "CN"), ("f01002", 750_000, "DE")]
        .into_iter()
        .map(|(addr, epoch_price, country)| MinerConfig {
            addr: addr.into(),
            epoch_price,
            country: country.into(),
        })
        .collect()
}

/// Template for new instances: hot enabled, cold enabled with the default
/// erasure shape.
fn default_cid_config() -> DefaultCidConfig {
    DefaultCidConfig {
        cold: ColdConfig {
            enabled: true,
            filecoin: FilConfig::default(),
        },
        ..Default::default()
    }
}

/// Node configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub repo: RepoConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub hot: HotStorageConfig,
    #[serde(default)]
    pub cold: ColdStorageConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default = "default_miners")]
    pub miners: Vec<MinerConfig>,
    #[serde(default = "default_cid_config")]
    pub defaults: DefaultCidConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            repo: RepoConfig::default(),
            scheduler: SchedulerConfig::default(),
            hot: HotStorageConfig::default(),
            cold: ColdStorageConfig::default(),
            wallet: WalletConfig::default(),
            miners: default_miners(),
            defaults: default_cid_config(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("STRATA_CONFIG").unwrap_or_else(|_| "config/strata".to_string());

        let s = Config::builder()
            .set_default("scheduler.max_parallel_jobs", 4_i64)?
            .set_default("hot.chunk_size", DEFAULT_CHUNK_SIZE as i64)?
            .set_default("cold.epoch_secs", 30_i64)?
            .set_default("wallet.address_type", "bls")?
            // Load from config/strata.{toml,json,yaml}
            .add_source(File::with_name(&config_path).required(false))
            // Override from environment (e.g., STRATA__REPO__PATH)
            .add_source(Environment::with_prefix("STRATA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
