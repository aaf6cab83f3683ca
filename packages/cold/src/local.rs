use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::block::Block;
use common::cid::Cid;
use common::cid_config::FilConfig;
use common::cid_info::{FilInfo, FilStorage};
use common::dag;
use common::error::BackendError;
use common::market::{MinerProposal, MinerSelector, MinerSelectorFilter};
use common::storage::memory::MemoryBlockStore;
use common::storage::{BlockSink, BlockStore, KvStore, KvStoreExt};
use common::tiers::ColdStorage;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::car;
use crate::codec::ErasureCodec;
use crate::reconstruct::{self, BlockShardSource, FlakyShardSource, ShardSource};

const DEAL_PREFIX: &str = "cold/deals/";
const INDEX_PREFIX: &str = "cold/index/";

/// A storage commitment for one shard with one miner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealRecord {
    pub proposal_cid: Cid,
    pub shard_cid: Cid,
    pub miner: String,
    pub wallet_addr: String,
    pub epoch_price: u64,
    pub start_epoch: u64,
    pub end_epoch: u64,
}

#[derive(Serialize)]
struct ProposalPayload<'a> {
    shard_cid: &'a Cid,
    miner: &'a str,
    wallet_addr: &'a str,
    start_epoch: u64,
    nonce: u64,
}

/// Cold tier that keeps erasure-coded shards in a local block store and
/// tracks one simulated deal per shard.
pub struct LocalColdStorage {
    /// Where the DAG being stored is read from.
    source: Arc<dyn BlockStore>,
    shards: Arc<dyn BlockStore>,
    kv: Arc<dyn KvStore>,
    miners: Arc<dyn MinerSelector>,
    epoch_secs: u64,
    retrieval_success_prob: f64,
}

impl LocalColdStorage {
    pub fn new(
        source: Arc<dyn BlockStore>,
        shards: Arc<dyn BlockStore>,
        kv: Arc<dyn KvStore>,
        miners: Arc<dyn MinerSelector>,
    ) -> Self {
        Self {
            source,
            shards,
            kv,
            miners,
            epoch_secs: 30,
            retrieval_success_prob: 1.0,
        }
    }

    pub fn with_epoch_secs(mut self, epoch_secs: u64) -> Self {
        self.epoch_secs = epoch_secs.max(1);
        self
    }

    pub fn with_retrieval_success_prob(mut self, prob: f64) -> Self {
        self.retrieval_success_prob = prob;
        self
    }

    fn epoch_at(&self, at: DateTime<Utc>) -> u64 {
        at.timestamp().max(0) as u64 / self.epoch_secs
    }

    fn current_epoch(&self) -> u64 {
        self.epoch_at(Utc::now())
    }

    fn deal_key(proposal_cid: &Cid) -> String {
        format!("{DEAL_PREFIX}{proposal_cid}")
    }

    fn index_key(cid: &Cid) -> String {
        format!("{INDEX_PREFIX}{cid}")
    }

    /// The last stored shard layout for `cid`.
    pub async fn fil_info(&self, cid: &Cid) -> Result<FilInfo, BackendError> {
        Ok(self.kv.get_json(&Self::index_key(cid)).await?)
    }

    pub async fn deal(&self, proposal_cid: &Cid) -> Result<DealRecord, BackendError> {
        Ok(self.kv.get_json(&Self::deal_key(proposal_cid)).await?)
    }

    async fn make_deal(
        &self,
        shard_cid: Cid,
        miner: &MinerProposal,
        wallet_addr: &str,
        duration: u64,
    ) -> Result<DealRecord, BackendError> {
        let start_epoch = self.current_epoch();
        let end_epoch = start_epoch.checked_add(duration).ok_or_else(|| {
            BackendError::InvalidInput(format!(
                "deal duration of {duration} epochs runs past the last epoch"
            ))
        })?;
        let nonce: u64 = rand::rng().random();
        let payload = serde_json::to_vec(&ProposalPayload {
            shard_cid: &shard_cid,
            miner: &miner.addr,
            wallet_addr,
            start_epoch,
            nonce,
        })
        .map_err(|e| BackendError::Internal(format!("encoding deal proposal: {e}")))?;

        let deal = DealRecord {
            proposal_cid: Cid::raw(&payload),
            shard_cid,
            miner: miner.addr.clone(),
            wallet_addr: wallet_addr.to_string(),
            epoch_price: miner.epoch_price,
            start_epoch,
            end_epoch,
        };
        self.kv.put_json(&Self::deal_key(&deal.proposal_cid), &deal).await?;
        Ok(deal)
    }

    fn shard_source(&self) -> Box<dyn ShardSource> {
        let source = BlockShardSource::new(self.shards.clone());
        if self.retrieval_success_prob < 1.0 {
            Box::new(FlakyShardSource::new(source, self.retrieval_success_prob))
        } else {
            Box::new(source)
        }
    }
}

#[async_trait]
impl ColdStorage for LocalColdStorage {
    async fn store(
        &self,
        cid: &Cid,
        wallet_addr: &str,
        cfg: &FilConfig,
    ) -> Result<FilInfo, BackendError> {
        let blocks = dag::collect_blocks(self.source.as_ref(), cid).await?;
        let archive = car::write_car(&[*cid], &blocks)
            .map_err(|e| BackendError::Internal(format!("building archive for {cid}: {e}")))?;

        let codec = ErasureCodec::new(cfg.data_shards, cfg.parity_shards)
            .map_err(|e| BackendError::InvalidInput(e.to_string()))?;
        let encoded = codec
            .encode(&archive)
            .map_err(|e| BackendError::Internal(format!("encoding {cid}: {e}")))?;

        let miners = self
            .miners
            .get_miners(
                codec.total_shards(),
                MinerSelectorFilter {
                    excluded_miners: cfg.excluded_miners.clone(),
                    country_codes: cfg.country_codes.clone(),
                },
            )
            .await?;
        if miners.is_empty() {
            return Err(BackendError::NoMiners);
        }

        let mut proposals = Vec::with_capacity(encoded.len());
        for (shard_number, shard) in encoded.into_iter().enumerate() {
            let block = Block::raw(shard);
            let shard_cid = *block.cid();
            self.shards.put(block).await?;

            let miner = &miners[shard_number % miners.len()];
            let deal = self
                .make_deal(shard_cid, miner, wallet_addr, cfg.deal_duration)
                .await?;
            proposals.push(FilStorage {
                proposal_cid: deal.proposal_cid,
                failed: false,
                shard_number,
                shard_cid,
                miner: deal.miner,
            });
        }

        let info = FilInfo {
            duration: cfg.deal_duration,
            data_shards: cfg.data_shards,
            parity_shards: cfg.parity_shards,
            car_size: archive.len() as u64,
            proposals,
        };
        self.kv.put_json(&Self::index_key(cid), &info).await?;

        info!(
            cid = %cid,
            shards = info.proposals.len(),
            miners = miners.len(),
            car_size = info.car_size,
            "Stored cid in cold storage"
        );
        Ok(info)
    }

    async fn retrieve(
        &self,
        cid: &Cid,
        sink: &dyn BlockSink,
        wallet_addr: &str,
    ) -> Result<Cid, BackendError> {
        let info = self.fil_info(cid).await?;
        let staging = MemoryBlockStore::new();
        let source = self.shard_source();

        let file = reconstruct::reconstruct(source.as_ref(), &info, cid, wallet_addr, &staging).await?;
        for block in dag::collect_blocks(&staging, &file.cid).await? {
            sink.put_block(block).await?;
        }

        debug!(cid = %cid, size = file.size(), "Retrieved cid from cold storage");
        Ok(file.cid)
    }

    async fn ensure_renewals(
        &self,
        cid: &Cid,
        mut info: FilInfo,
        wallet_addr: &str,
        cfg: &FilConfig,
    ) -> Result<FilInfo, BackendError> {
        let now = self.current_epoch();
        let mut renewed = 0usize;

        for proposal in info.proposals.iter_mut().filter(|p| !p.failed) {
            let deal = match self.deal(&proposal.proposal_cid).await {
                Ok(deal) => deal,
                Err(e) if e.is_not_found() => {
                    warn!(cid = %cid, shard = proposal.shard_number, "Deal is gone, flagging shard");
                    proposal.failed = true;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if deal.end_epoch <= now {
                warn!(cid = %cid, shard = proposal.shard_number, "Deal expired, flagging shard");
                proposal.failed = true;
                continue;
            }

            if cfg.renew.enabled && deal.end_epoch - now <= cfg.renew.threshold {
                let miner = MinerProposal {
                    addr: deal.miner.clone(),
                    epoch_price: deal.epoch_price,
                };
                let renewal = self
                    .make_deal(deal.shard_cid, &miner, wallet_addr, cfg.deal_duration)
                    .await?;
                proposal.proposal_cid = renewal.proposal_cid;
                renewed += 1;
            }
        }

        info.duration = cfg.deal_duration;
        self.kv.put_json(&Self::index_key(cid), &info).await?;
        if renewed > 0 {
            info!(cid = %cid, renewed, "Renewed cold storage deals");
        }
        Ok(info)
    }

    async fn is_deal_active(&self, proposal_cid: &Cid) -> Result<bool, BackendError> {
        match self.deal(proposal_cid).await {
            Ok(deal) => Ok(deal.end_epoch > self.current_epoch()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
