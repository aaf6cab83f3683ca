//! Contracts for the two storage tiers the scheduler reconciles against.

use async_trait::async_trait;

use crate::block::Block;
use crate::cid::Cid;
use crate::cid_config::FilConfig;
use crate::cid_info::FilInfo;
use crate::error::BackendError;
use crate::storage::{BlockSink, BoxReader};

/// Fast cache tier serving reads.
#[async_trait]
pub trait HotStorage: Send + Sync {
    /// Import a byte stream without pinning it. Returns the root identifier.
    async fn add(&self, reader: BoxReader) -> Result<Cid, BackendError>;

    /// Unpin `cid` and release blocks no other pinned content references.
    async fn remove(&self, cid: &Cid) -> Result<(), BackendError>;

    /// Open the file addressed by `cid`.
    async fn get(&self, cid: &Cid) -> Result<BoxReader, BackendError>;

    /// Pin `cid`, whose blocks must already be available. Returns the stored size in bytes.
    async fn store(&self, cid: &Cid) -> Result<u64, BackendError>;

    /// Pin `new` and unpin `old` in one step. Returns the stored size of `new`.
    async fn replace(&self, old: &Cid, new: &Cid) -> Result<u64, BackendError>;

    /// Make a single block available without pinning anything.
    async fn put(&self, block: Block) -> Result<(), BackendError>;

    /// Whether `cid` is pinned.
    async fn is_stored(&self, cid: &Cid) -> Result<bool, BackendError>;
}

/// Durable tier backed by storage deals.
#[async_trait]
pub trait ColdStorage: Send + Sync {
    /// Erasure-code the DAG rooted at `cid` and make one deal per shard.
    async fn store(
        &self,
        cid: &Cid,
        wallet_addr: &str,
        cfg: &FilConfig,
    ) -> Result<FilInfo, BackendError>;

    /// Rebuild the DAG rooted at `cid` into `sink`. Returns the resolved file root.
    async fn retrieve(
        &self,
        cid: &Cid,
        sink: &dyn BlockSink,
        wallet_addr: &str,
    ) -> Result<Cid, BackendError>;

    /// Renew deals close to expiry and flag proposals whose deal is gone.
    async fn ensure_renewals(
        &self,
        cid: &Cid,
        info: FilInfo,
        wallet_addr: &str,
        cfg: &FilConfig,
    ) -> Result<FilInfo, BackendError>;

    async fn is_deal_active(&self, proposal_cid: &Cid) -> Result<bool, BackendError>;
}
