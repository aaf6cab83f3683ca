pub mod block;
pub mod cid;
pub mod cid_config;
pub mod cid_info;
pub mod config;
pub mod dag;
pub mod error;
pub mod hot;
pub mod job;
pub mod market;
pub mod storage;
pub mod tiers;

pub use block::Block;
pub use cid::{Cid, CidError, Codec};
pub use cid_config::{
    CidConfig, ColdConfig, DefaultCidConfig, FilConfig, FilRenew, HotConfig, IpfsConfig,
    ValidationError,
};
pub use cid_info::{CidInfo, ColdInfo, FilInfo, FilStorage, HotInfo, IpfsHotInfo, LogEntry};
pub use error::BackendError;
pub use job::{ApiId, Job, JobId, JobStatus};
pub use tiers::{ColdStorage, HotStorage};
