use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::block::Block;
use crate::cid::Cid;
use crate::dag;
use crate::error::BackendError;
use crate::storage::{BlockStore, BoxReader, KvStore, KvStoreExt};
use crate::tiers::HotStorage;

const PIN_PREFIX: &str = "hot/pins/";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PinRecord {
    size: u64,
    pinned_at: DateTime<Utc>,
}

/// Hot tier over a local block store. Pins are kept as records so they
/// survive restarts; unpinned blocks are collected when content is removed.
pub struct BlockHotStorage {
    blocks: Arc<dyn BlockStore>,
    pins: Arc<dyn KvStore>,
    chunk_size: usize,
    // Serializes pin/unpin with the garbage collection that follows them.
    gc_lock: Mutex<()>,
}

impl BlockHotStorage {
    pub fn new(blocks: Arc<dyn BlockStore>, pins: Arc<dyn KvStore>, chunk_size: usize) -> Self {
        Self {
            blocks,
            pins,
            chunk_size,
            gc_lock: Mutex::new(()),
        }
    }

    fn pin_key(cid: &Cid) -> String {
        format!("{PIN_PREFIX}{cid}")
    }

    async fn pin(&self, cid: &Cid) -> Result<u64, BackendError> {
        let size = dag::collect_blocks(self.blocks.as_ref(), cid)
            .await?
            .iter()
            .map(|b| b.len() as u64)
            .sum();
        self.pins
            .put_json(
                &Self::pin_key(cid),
                &PinRecord {
                    size,
                    pinned_at: Utc::now(),
                },
            )
            .await?;
        Ok(size)
    }

    /// Drop the pin on `cid` and delete its blocks that no remaining pin reaches.
    async fn unpin_and_collect(&self, cid: &Cid) -> Result<(), BackendError> {
        if !self.pins.delete(&Self::pin_key(cid)).await? {
            return Err(BackendError::NotFound(format!("pin {cid}")));
        }

        let mut retained = HashSet::new();
        for key in self.pins.list(PIN_PREFIX).await? {
            let Ok(root) = key[PIN_PREFIX.len()..].parse::<Cid>() else {
                continue;
            };
            for block in dag::collect_blocks(self.blocks.as_ref(), &root).await? {
                retained.insert(*block.cid());
            }
        }

        let released = match dag::collect_blocks(self.blocks.as_ref(), cid).await {
            Ok(blocks) => blocks,
            // Already partially collected; nothing more to release.
            Err(dag::DagError::Storage(e)) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut deleted = 0usize;
        for block in released {
            if !retained.contains(block.cid()) && self.blocks.delete(block.cid()).await? {
                deleted += 1;
            }
        }
        debug!(cid = %cid, deleted, "Collected unpinned blocks");
        Ok(())
    }
}

#[async_trait]
impl HotStorage for BlockHotStorage {
    async fn add(&self, reader: BoxReader) -> Result<Cid, BackendError> {
        Ok(dag::import_reader(self.blocks.as_ref(), reader, self.chunk_size).await?)
    }

    async fn remove(&self, cid: &Cid) -> Result<(), BackendError> {
        let _guard = self.gc_lock.lock().await;
        self.unpin_and_collect(cid).await
    }

    async fn get(&self, cid: &Cid) -> Result<BoxReader, BackendError> {
        let file = dag::open_file(self.blocks.as_ref(), cid).await?;
        Ok(file.into_reader())
    }

    async fn store(&self, cid: &Cid) -> Result<u64, BackendError> {
        let _guard = self.gc_lock.lock().await;
        self.pin(cid).await
    }

    async fn replace(&self, old: &Cid, new: &Cid) -> Result<u64, BackendError> {
        let _guard = self.gc_lock.lock().await;
        let size = self.pin(new).await?;
        if old != new {
            self.unpin_and_collect(old).await?;
        }
        Ok(size)
    }

    async fn put(&self, block: Block) -> Result<(), BackendError> {
        Ok(self.blocks.put(block).await?)
    }

    async fn is_stored(&self, cid: &Cid) -> Result<bool, BackendError> {
        match self.pins.get(&Self::pin_key(cid)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
