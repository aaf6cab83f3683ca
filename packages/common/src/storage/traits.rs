use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;

use super::error::StorageError;
use crate::block::Block;
use crate::cid::Cid;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Content-addressed block storage.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Store a block. Storing a block that is already present is a no-op.
    async fn put(&self, block: Block) -> Result<(), StorageError>;

    /// Retrieve a block by its identifier.
    async fn get(&self, cid: &Cid) -> Result<Block, StorageError>;

    /// Check whether a block exists.
    async fn has(&self, cid: &Cid) -> Result<bool, StorageError>;

    /// Delete a block.
    ///
    /// Returns `true` if the block was deleted, `false` if it did not exist.
    async fn delete(&self, cid: &Cid) -> Result<bool, StorageError>;
}

/// Write-only destination for blocks, e.g. the target of an archive import.
#[async_trait]
pub trait BlockSink: Send + Sync {
    async fn put_block(&self, block: Block) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: BlockStore + ?Sized> BlockSink for T {
    async fn put_block(&self, block: Block) -> Result<(), StorageError> {
        self.put(block).await
    }
}

/// Crash-consistent key/value storage for records.
///
/// Keys are `/`-separated paths made of `[A-Za-z0-9_.-]` segments.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// List the keys directly under `prefix` (which must end in `/`).
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// JSON helpers for record stores built on [`KvStore`].
#[async_trait]
pub trait KvStoreExt: KvStore {
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StorageError> {
        let bytes = self.get(key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, bytes).await
    }
}

impl<T: KvStore + ?Sized> KvStoreExt for T {}
