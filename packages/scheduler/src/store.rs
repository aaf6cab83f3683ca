//! Persisted scheduler state: observed Cid info, tracked Cids and jobs.

use std::sync::Arc;

use common::cid::Cid;
use common::cid_config::CidConfig;
use common::cid_info::CidInfo;
use common::job::{ApiId, Job, JobId};
use common::storage::{KvStore, KvStoreExt, StorageError};
use serde::{Deserialize, Serialize};

const CID_INFO_PREFIX: &str = "scheduler/cidinfo/";
const TRACKED_PREFIX: &str = "scheduler/tracked/";
const JOB_PREFIX: &str = "scheduler/jobs/";

/// A Cid under active management, as last pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedCid {
    pub api_id: ApiId,
    pub wallet_addr: String,
    pub config: CidConfig,
}

#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KvStore>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get_cid_info(&self, cid: &Cid) -> Result<CidInfo, StorageError> {
        self.kv.get_json(&format!("{CID_INFO_PREFIX}{cid}")).await
    }

    pub async fn put_cid_info(&self, info: &CidInfo) -> Result<(), StorageError> {
        self.kv
            .put_json(&format!("{CID_INFO_PREFIX}{}", info.cid), info)
            .await
    }

    pub async fn get_tracked(&self, cid: &Cid) -> Result<TrackedCid, StorageError> {
        self.kv.get_json(&format!("{TRACKED_PREFIX}{cid}")).await
    }

    pub async fn put_tracked(&self, tracked: &TrackedCid) -> Result<(), StorageError> {
        self.kv
            .put_json(&format!("{TRACKED_PREFIX}{}", tracked.config.cid), tracked)
            .await
    }

    pub async fn delete_tracked(&self, cid: &Cid) -> Result<bool, StorageError> {
        self.kv.delete(&format!("{TRACKED_PREFIX}{cid}")).await
    }

    pub async fn list_tracked(&self) -> Result<Vec<TrackedCid>, StorageError> {
        let mut out = Vec::new();
        for key in self.kv.list(TRACKED_PREFIX).await? {
            match self.kv.get_json(&key).await {
                Ok(tracked) => out.push(tracked),
                // untracked between list and get
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Job, StorageError> {
        self.kv.get_json(&format!("{JOB_PREFIX}{id}")).await
    }

    pub async fn put_job(&self, job: &Job) -> Result<(), StorageError> {
        self.kv.put_json(&format!("{JOB_PREFIX}{}", job.id), job).await
    }
}
