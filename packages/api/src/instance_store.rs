use std::sync::Arc;

use async_trait::async_trait;
use common::cid::Cid;
use common::cid_config::{CidConfig, DefaultCidConfig};
use common::job::ApiId;
use common::storage::{KvStore, KvStoreExt, StorageError};
use serde::{Deserialize, Serialize};

/// Persisted identity and policy template of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: ApiId,
    pub wallet_addr: String,
    pub default_cid_config: DefaultCidConfig,
}

/// Durable state of a single instance. Missing records are reported as
/// [`StorageError::NotFound`].
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get_config(&self) -> Result<InstanceConfig, StorageError>;

    async fn put_config(&self, config: &InstanceConfig) -> Result<(), StorageError>;

    async fn get_cid_config(&self, cid: &Cid) -> Result<CidConfig, StorageError>;

    async fn put_cid_config(&self, config: &CidConfig) -> Result<(), StorageError>;

    async fn remove_cid_config(&self, cid: &Cid) -> Result<(), StorageError>;

    /// Every Cid with a config.
    async fn get_cids(&self) -> Result<Vec<Cid>, StorageError>;
}

/// [`InstanceStore`] scoped to `instance/<id>/` of a shared key/value store.
pub struct KvInstanceStore {
    kv: Arc<dyn KvStore>,
    prefix: String,
}

impl KvInstanceStore {
    pub fn new(kv: Arc<dyn KvStore>, id: &ApiId) -> Self {
        Self {
            kv,
            prefix: format!("instance/{id}/"),
        }
    }

    fn config_key(&self) -> String {
        format!("{}config", self.prefix)
    }

    fn cids_prefix(&self) -> String {
        format!("{}cid/", self.prefix)
    }

    fn cid_key(&self, cid: &Cid) -> String {
        format!("{}{cid}", self.cids_prefix())
    }
}

#[async_trait]
impl InstanceStore for KvInstanceStore {
    async fn get_config(&self) -> Result<InstanceConfig, StorageError> {
        self.kv.get_json(&self.config_key()).await
    }

    async fn put_config(&self, config: &InstanceConfig) -> Result<(), StorageError> {
        self.kv.put_json(&self.config_key(), config).await
    }

    async fn get_cid_config(&self, cid: &Cid) -> Result<CidConfig, StorageError> {
        self.kv.get_json(&self.cid_key(cid)).await
    }

    async fn put_cid_config(&self, config: &CidConfig) -> Result<(), StorageError> {
        self.kv.put_json(&self.cid_key(&config.cid), config).await
    }

    async fn remove_cid_config(&self, cid: &Cid) -> Result<(), StorageError> {
        let key = self.cid_key(cid);
        if self.kv.delete(&key).await? {
            Ok(())
        } else {
            Err(StorageError::NotFound(key))
        }
    }

    async fn get_cids(&self) -> Result<Vec<Cid>, StorageError> {
        let prefix = self.cids_prefix();
        let mut cids = Vec::new();
        for key in self.kv.list(&prefix).await? {
            let name = key.strip_prefix(&prefix).unwrap_or(&key);
            match name.parse() {
                Ok(cid) => cids.push(cid),
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping malformed cid config key"),
            }
        }
        cids.sort();
        Ok(cids)
    }
}
