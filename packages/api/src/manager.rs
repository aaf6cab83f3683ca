use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::cid_config::DefaultCidConfig;
use common::job::ApiId;
use common::market::WalletManager;
use common::storage::{KvStore, KvStoreExt};
use dashmap::DashMap;
use scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{ApiError, ErrorContext, Result};
use crate::instance::Instance;
use crate::instance_store::KvInstanceStore;

const AUTH_PREFIX: &str = "auth/";

#[derive(Debug, Serialize, Deserialize)]
struct AuthRecord {
    api_id: ApiId,
}

/// Creates instances, hands out their auth tokens and keeps loaded
/// instances cached.
pub struct Manager {
    kv: Arc<dyn KvStore>,
    scheduler: Scheduler,
    wallet: Arc<dyn WalletManager>,
    address_type: String,
    default_cid_config: DefaultCidConfig,
    instances: DashMap<ApiId, Arc<Instance>>,
    // Serializes cache misses so one instance is loaded only once.
    load_lock: Mutex<()>,
    closed: AtomicBool,
}

impl Manager {
    pub fn new(
        kv: Arc<dyn KvStore>,
        scheduler: Scheduler,
        wallet: Arc<dyn WalletManager>,
        address_type: impl Into<String>,
        default_cid_config: DefaultCidConfig,
    ) -> Result<Self> {
        default_cid_config.validate()?;
        Ok(Self {
            kv,
            scheduler,
            wallet,
            address_type: address_type.into(),
            default_cid_config,
            instances: DashMap::new(),
            load_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    fn auth_key(token: &str) -> String {
        format!("{AUTH_PREFIX}{token}")
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ApiError::Closed);
        }
        Ok(())
    }

    /// Create a new instance and the token that grants access to it.
    pub async fn create(&self) -> Result<(ApiId, String)> {
        self.ensure_open()?;

        let id = ApiId::new();
        let store = Arc::new(KvInstanceStore::new(self.kv.clone(), &id));
        let instance = Instance::new(
            id.clone(),
            store,
            self.scheduler.clone(),
            self.wallet.clone(),
            self.default_cid_config.clone(),
            &self.address_type,
        )
        .await?;

        let token = uuid::Uuid::new_v4().to_string();
        self.kv
            .put_json(&Self::auth_key(&token), &AuthRecord { api_id: id.clone() })
            .await
            .context(|| format!("saving auth token of instance {id}"))?;

        self.instances.insert(id.clone(), Arc::new(instance));
        info!(api_id = %id, "Created instance");
        Ok((id, token))
    }

    /// The instance `token` grants access to.
    pub async fn get_by_token(&self, token: &str) -> Result<Arc<Instance>> {
        self.ensure_open()?;

        let record: AuthRecord = match self.kv.get_json(&Self::auth_key(token)).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Err(ApiError::InvalidToken),
            // Tokens that aren't valid record keys can't have been issued.
            Err(common::storage::StorageError::Io(e))
                if e.kind() == std::io::ErrorKind::InvalidInput =>
            {
                return Err(ApiError::InvalidToken);
            }
            Err(e) => return Err(e).context(|| "checking auth token".to_string()),
        };

        if let Some(instance) = self.instances.get(&record.api_id) {
            return Ok(instance.value().clone());
        }

        let _guard = self.load_lock.lock().await;
        if let Some(instance) = self.instances.get(&record.api_id) {
            return Ok(instance.value().clone());
        }
        let store = Arc::new(KvInstanceStore::new(self.kv.clone(), &record.api_id));
        let instance = Arc::new(
            Instance::load(store, self.scheduler.clone(), self.wallet.clone()).await?,
        );
        self.instances.insert(record.api_id, instance.clone());
        Ok(instance)
    }

    /// Close every loaded instance. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in self.instances.iter() {
            entry.value().close();
        }
        info!(instances = self.instances.len(), "Closed manager");
    }
}
