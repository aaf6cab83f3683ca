use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::error::StorageError;
use super::traits::{BlockStore, KvStore};
use crate::block::Block;
use crate::cid::Cid;

/// In-memory block store.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<Cid, Block>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn put(&self, block: Block) -> Result<(), StorageError> {
        self.blocks.entry(*block.cid()).or_insert(block);
        Ok(())
    }

    async fn get(&self, cid: &Cid) -> Result<Block, StorageError> {
        self.blocks
            .get(cid)
            .map(|b| b.value().clone())
            .ok_or_else(|| StorageError::NotFound(cid.to_string()))
    }

    async fn has(&self, cid: &Cid) -> Result<bool, StorageError> {
        Ok(self.blocks.contains_key(cid))
    }

    async fn delete(&self, cid: &Cid) -> Result<bool, StorageError> {
        Ok(self.blocks.remove(cid).is_some())
    }
}

/// In-memory record store, ordered so listings are deterministic.
#[derive(Default)]
pub struct MemoryKv {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.records.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.records.write().await.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
