use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::error::StorageError;
use super::traits::{BlockStore, KvStore};
use crate::block::Block;
use crate::cid::Cid;

/// Filesystem-backed content-addressed block store.
///
/// Blocks are stored in a Git-style sharded directory layout:
/// `{base_path}/{first 2 hex chars}/{codec prefix}{remaining 62 hex chars}`
pub struct FilesystemBlockStore {
    base_path: PathBuf,
    max_size: u64,
}

impl FilesystemBlockStore {
    /// Create a new filesystem block store.
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(".tmp")).await?;
        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Compute the filesystem path for a given block.
    fn block_path(&self, cid: &Cid) -> PathBuf {
        self.base_path
            .join(cid.shard_prefix())
            .join(cid.shard_suffix())
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self) -> PathBuf {
        temp_path_in(&self.base_path)
    }
}

fn temp_path_in(base: &Path) -> PathBuf {
    base.join(".tmp").join(uuid::Uuid::new_v4().to_string())
}

/// Write `data` to `target` through a temporary file and an atomic rename.
async fn write_atomic(temp_path: PathBuf, target: &Path, data: &[u8]) -> Result<(), StorageError> {
    if let Err(e) = fs::write(&temp_path, data).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    if let Err(e) = fs::rename(&temp_path, target).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    Ok(())
}

#[async_trait]
impl BlockStore for FilesystemBlockStore {
    async fn put(&self, block: Block) -> Result<(), StorageError> {
        if block.len() as u64 > self.max_size {
            return Err(StorageError::SizeLimitExceeded {
                actual: block.len() as u64,
                limit: self.max_size,
            });
        }

        let block_path = self.block_path(block.cid());
        if fs::try_exists(&block_path).await? {
            return Ok(());
        }

        write_atomic(self.temp_path(), &block_path, block.data()).await
    }

    async fn get(&self, cid: &Cid) -> Result<Block, StorageError> {
        let block_path = self.block_path(cid);
        let data = match fs::read(&block_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(cid.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Block::verified(*cid, data).ok_or_else(|| StorageError::Corrupted(cid.to_string()))
    }

    async fn has(&self, cid: &Cid) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.block_path(cid)).await?)
    }

    async fn delete(&self, cid: &Cid) -> Result<bool, StorageError> {
        match fs::remove_file(self.block_path(cid)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Filesystem-backed record store: one file per key under `base_path`.
pub struct FilesystemKv {
    base_path: PathBuf,
}

impl FilesystemKv {
    pub async fn new(base_path: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(".tmp")).await?;
        Ok(Self { base_path })
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key.split('/').all(|segment| {
                !segment.is_empty()
                    && segment != "."
                    && segment != ".."
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            });
        if !valid {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid record key '{key}'"),
            )));
        }
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl KvStore for FilesystemKv {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        match fs::read(self.key_path(key)?).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let path = self.key_path(key)?;
        write_atomic(temp_path_in(&self.base_path), &path, &value).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.key_path(key)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.key_path(prefix.trim_end_matches('/'))?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                keys.push(format!("{prefix}{name}"));
            }
        }
        keys.sort();
        Ok(keys)
    }
}
