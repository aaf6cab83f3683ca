use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use api::Manager;
use cold::LocalColdStorage;
use common::config::AppConfig;
use common::hot::BlockHotStorage;
use common::market::{LocalWallet, StaticMinerSelector};
use common::storage::filesystem::{FilesystemBlockStore, FilesystemKv};
use common::storage::{BlockStore, KvStore};
use scheduler::Scheduler;
use tokio::task::JoinHandle;
use tracing::{info, info_span};

/// Every component of a local node, backed by the repo directory.
pub struct Node {
    pub hot: Arc<BlockHotStorage>,
    pub scheduler: Scheduler,
    pub manager: Manager,
    renewals: Option<JoinHandle<()>>,
}

impl Node {
    pub async fn open(config: &AppConfig) -> anyhow::Result<Self> {
        let root = &config.repo.path;
        info!(repo = %root.display(), "Opening repo");

        let blocks: Arc<dyn BlockStore> = Arc::new(
            FilesystemBlockStore::new(root.join("blocks"), config.hot.max_block_size)
                .await
                .context("Failed to open block store")?,
        );
        // Shards grow with the content, so they are not held to the block limit.
        let shards: Arc<dyn BlockStore> = Arc::new(
            FilesystemBlockStore::new(root.join("shards"), u64::MAX)
                .await
                .context("Failed to open shard store")?,
        );
        let kv: Arc<dyn KvStore> = Arc::new(
            FilesystemKv::new(root.join("kv"))
                .await
                .context("Failed to open record store")?,
        );

        let hot = Arc::new(BlockHotStorage::new(
            blocks.clone(),
            kv.clone(),
            config.hot.chunk_size,
        ));
        let miners = Arc::new(StaticMinerSelector::new(config.miners.clone()));
        let cold = Arc::new(
            LocalColdStorage::new(blocks, shards, kv.clone(), miners)
                .with_epoch_secs(config.cold.epoch_secs)
                .with_retrieval_success_prob(config.cold.retrieval_success_prob),
        );

        let scheduler = Scheduler::new(
            hot.clone(),
            cold,
            kv.clone(),
            &config.scheduler,
            info_span!("scheduler"),
        );
        let renewals = (config.scheduler.renewal_interval_secs > 0).then(|| {
            scheduler.spawn_renewal_loop(Duration::from_secs(config.scheduler.renewal_interval_secs))
        });

        let wallet = Arc::new(LocalWallet::new(kv.clone(), config.wallet.initial_balance));
        let manager = Manager::new(
            kv,
            scheduler.clone(),
            wallet,
            config.wallet.address_type.clone(),
            config.defaults.clone(),
        )
        .context("Invalid default cid config")?;

        Ok(Self {
            hot,
            scheduler,
            manager,
            renewals,
        })
    }

    pub async fn shutdown(self) {
        self.manager.close();
        self.scheduler.close();
        if let Some(handle) = self.renewals {
            let _ = handle.await;
        }
    }
}
