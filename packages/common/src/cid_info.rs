use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cid::Cid;
use crate::job::JobId;

/// Observed storage state of a Cid, written by the scheduler after execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidInfo {
    pub job_id: JobId,
    pub cid: Cid,
    pub created: DateTime<Utc>,
    pub hot: HotInfo,
    pub cold: ColdInfo,
}

impl CidInfo {
    pub fn new(job_id: JobId, cid: Cid) -> Self {
        Self {
            job_id,
            cid,
            created: Utc::now(),
            hot: HotInfo::default(),
            cold: ColdInfo::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HotInfo {
    pub enabled: bool,
    pub size: u64,
    pub ipfs: IpfsHotInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IpfsHotInfo {
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ColdInfo {
    pub filecoin: FilInfo,
}

/// Result of storing a Cid in the durable tier as an erasure-coded set of shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FilInfo {
    /// Deal duration in epochs.
    pub duration: u64,
    pub data_shards: usize,
    pub parity_shards: usize,
    /// Exact size of the serialized archive before padding into shards.
    pub car_size: u64,
    /// One entry per shard, in shard order.
    pub proposals: Vec<FilStorage>,
}

impl FilInfo {
    pub fn is_stored(&self) -> bool {
        !self.proposals.is_empty()
    }
}

/// A durable-tier storage commitment for one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilStorage {
    pub proposal_cid: Cid,
    pub failed: bool,
    pub shard_number: usize,
    pub shard_cid: Cid,
    pub miner: String,
}

/// Human-readable event emitted while executing a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub cid: Cid,
    pub jid: JobId,
    pub msg: String,
    pub timestamp: DateTime<Utc>,
}
