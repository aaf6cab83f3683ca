//! Rebuilds a Cid's content from its erasure-coded shards.
//!
//! Shards are fetched in proposal order until `data_shards` of them succeed.
//! Failed fetches are skipped. Parity is only decoded when a data shard is
//! missing. The joined data shards, cut at `car_size`, form a content archive
//! that is loaded into a block store and resolved as a file.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::cid::Cid;
use common::cid_info::FilInfo;
use common::dag::{self, DagError, DagFile};
use common::error::BackendError;
use common::storage::BlockStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};

use crate::car::{self, CarError};
use crate::codec::{CodecError, ErasureCodec};

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("insufficient shards: obtained {obtained}, required {required}")]
    InsufficientShards { obtained: usize, required: usize },

    #[error("{0} is a directory, not a file")]
    NotAFile(Cid),

    #[error("decoding shards: {0}")]
    Codec(#[from] CodecError),

    #[error("loading archive: {0}")]
    Car(#[from] CarError),

    #[error("resolving file: {0}")]
    Dag(DagError),
}

impl From<DagError> for RetrievalError {
    fn from(err: DagError) -> Self {
        match err {
            DagError::NotAFile(cid) => Self::NotAFile(cid),
            other => Self::Dag(other),
        }
    }
}

impl From<RetrievalError> for BackendError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::InsufficientShards { obtained, required } => {
                Self::InsufficientShards { obtained, required }
            }
            RetrievalError::NotAFile(cid) => Self::NotAFile(cid),
            RetrievalError::Dag(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Where individual shards are fetched from.
#[async_trait]
pub trait ShardSource: Send + Sync {
    async fn fetch_shard(&self, shard_cid: &Cid, wallet_addr: &str) -> Result<Vec<u8>, BackendError>;
}

#[async_trait]
impl<S: ShardSource + ?Sized> ShardSource for Arc<S> {
    async fn fetch_shard(&self, shard_cid: &Cid, wallet_addr: &str) -> Result<Vec<u8>, BackendError> {
        (**self).fetch_shard(shard_cid, wallet_addr).await
    }
}

/// Shards stored as raw blocks, addressed by their own identifier.
pub struct BlockShardSource {
    shards: Arc<dyn BlockStore>,
}

impl BlockShardSource {
    pub fn new(shards: Arc<dyn BlockStore>) -> Self {
        Self { shards }
    }
}

#[async_trait]
impl ShardSource for BlockShardSource {
    async fn fetch_shard(&self, shard_cid: &Cid, _wallet_addr: &str) -> Result<Vec<u8>, BackendError> {
        Ok(self.shards.get(shard_cid).await?.into_data())
    }
}

/// Wraps a source so each fetch fails with probability `1 - success_prob`,
/// standing in for unreliable retrieval from the market.
pub struct FlakyShardSource<S> {
    inner: S,
    success_prob: f64,
    rng: Mutex<StdRng>,
}

impl<S> FlakyShardSource<S> {
    pub fn new(inner: S, success_prob: f64) -> Self {
        Self::with_rng(inner, success_prob, StdRng::from_os_rng())
    }

    /// Deterministic variant for reproducible trials.
    pub fn with_seed(inner: S, success_prob: f64, seed: u64) -> Self {
        Self::with_rng(inner, success_prob, StdRng::seed_from_u64(seed))
    }

    fn with_rng(inner: S, success_prob: f64, rng: StdRng) -> Self {
        Self {
            inner,
            success_prob: success_prob.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
        }
    }

    fn roll(&self) -> bool {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.random_bool(self.success_prob)
    }
}

#[async_trait]
impl<S: ShardSource> ShardSource for FlakyShardSource<S> {
    async fn fetch_shard(&self, shard_cid: &Cid, wallet_addr: &str) -> Result<Vec<u8>, BackendError> {
        if !self.roll() {
            return Err(BackendError::Internal(format!(
                "simulated retrieval failure for shard {shard_cid}"
            )));
        }
        self.inner.fetch_shard(shard_cid, wallet_addr).await
    }
}

/// Fetch shards in proposal order until `data_shards` succeed.
///
/// Returns one slot per proposal; slots that were skipped or failed are `None`.
pub async fn fetch_shards(
    source: &dyn ShardSource,
    info: &FilInfo,
    wallet_addr: &str,
) -> Result<Vec<Option<Vec<u8>>>, RetrievalError> {
    let required = info.data_shards;
    let mut slots: Vec<Option<Vec<u8>>> = vec![None; info.proposals.len()];
    let mut obtained = 0usize;

    for (index, proposal) in info.proposals.iter().enumerate() {
        if obtained >= required {
            break;
        }
        if proposal.failed {
            debug!(shard = index, "Skipping shard with failed deal");
            continue;
        }
        match source.fetch_shard(&proposal.shard_cid, wallet_addr).await {
            Ok(data) => {
                slots[index] = Some(data);
                obtained += 1;
            }
            Err(e) => debug!(shard = index, error = %e, "Shard retrieval failed"),
        }
    }

    if obtained < required {
        return Err(RetrievalError::InsufficientShards { obtained, required });
    }
    Ok(slots)
}

/// Rebuild the serialized archive from fetched shard slots.
pub fn assemble_archive(
    info: &FilInfo,
    mut slots: Vec<Option<Vec<u8>>>,
) -> Result<Vec<u8>, RetrievalError> {
    let codec = ErasureCodec::new(info.data_shards, info.parity_shards)?;
    let data_used = slots[..info.data_shards.min(slots.len())]
        .iter()
        .filter(|s| s.is_some())
        .count();
    let parity_used = slots.iter().filter(|s| s.is_some()).count() - data_used;

    info!(data_used, parity_used, "Reconstructing archive from shards");
    codec.reconstruct(&mut slots)?;
    Ok(codec.join(&slots, info.car_size as usize)?)
}

/// Full read path: fetch, decode, load the archive into `store`, resolve `cid`.
pub async fn reconstruct<S: BlockStore>(
    source: &dyn ShardSource,
    info: &FilInfo,
    cid: &Cid,
    wallet_addr: &str,
    store: &S,
) -> Result<DagFile, RetrievalError> {
    let slots = fetch_shards(source, info, wallet_addr).await?;
    let archive = assemble_archive(info, slots)?;

    let header = car::load_car(&archive, store).await?;
    debug!(cid = %cid, roots = header.roots.len(), bytes = archive.len(), "Loaded archive");

    Ok(dag::open_file(store, cid).await?)
}
