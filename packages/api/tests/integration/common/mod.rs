use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use api::{Instance, Manager, PushConfigOptions};
use cold::LocalColdStorage;
use common::cid::Cid;
use common::cid_config::{CidConfig, ColdConfig, DefaultCidConfig, FilConfig};
use common::config::{MinerConfig, SchedulerConfig};
use common::hot::BlockHotStorage;
use common::job::{Job, JobId};
use common::market::{LocalWallet, StaticMinerSelector};
use common::storage::memory::{MemoryBlockStore, MemoryKv};
use common::storage::{BoxReader, KvStore};
use common::tiers::HotStorage;
use scheduler::Scheduler;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const INITIAL_BALANCE: u64 = 5_000;

/// A full in-memory node: hot and cold tiers, scheduler and manager.
pub struct TestEnv {
    pub kv: Arc<dyn KvStore>,
    pub hot: Arc<BlockHotStorage>,
    pub scheduler: Scheduler,
    pub manager: Manager,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_kv(Arc::new(MemoryKv::new()))
    }

    /// A node whose persisted state lives in `kv`.
    pub fn with_kv(kv: Arc<dyn KvStore>) -> Self {
        let blocks = Arc::new(MemoryBlockStore::new());
        let hot = Arc::new(BlockHotStorage::new(blocks.clone(), kv.clone(), 512));
        let miners = Arc::new(StaticMinerSelector::new(vec![
            MinerConfig {
                addr: "f01000".into(),
                epoch_price: 5,
                country: "US".into(),
            },
            MinerConfig {
                addr: "f01001".into(),
                epoch_price: 7,
                country: "DE".into(),
            },
            MinerConfig {
                addr: "f01002".into(),
                epoch_price: 9,
                country: "CN".into(),
            },
        ]));
        let cold = Arc::new(LocalColdStorage::new(
            blocks,
            Arc::new(MemoryBlockStore::new()),
            kv.clone(),
            miners,
        ));
        let scheduler = Scheduler::new(
            hot.clone(),
            cold,
            kv.clone(),
            &SchedulerConfig::default(),
            tracing::Span::none(),
        );
        let wallet = Arc::new(LocalWallet::new(kv.clone(), INITIAL_BALANCE));
        let manager = Manager::new(
            kv.clone(),
            scheduler.clone(),
            wallet,
            "bls",
            DefaultCidConfig::default(),
        )
        .unwrap();

        Self {
            kv,
            hot,
            scheduler,
            manager,
        }
    }

    pub async fn instance(&self) -> Arc<Instance> {
        let (_, token) = self.manager.create().await.unwrap();
        self.manager.get_by_token(&token).await.unwrap()
    }

    /// Import `data` into hot storage without pinning it.
    pub async fn add(&self, data: &[u8]) -> Cid {
        self.hot
            .add(Box::new(Cursor::new(data.to_vec())))
            .await
            .unwrap()
    }
}

/// Follow `jid` through [`Instance::watch_jobs`] until it reaches a final state.
pub async fn wait_final(instance: &Instance, jid: &JobId) -> Job {
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let watch = instance.watch_jobs(cancel.clone(), tx, std::slice::from_ref(jid));

    let follow = async {
        while let Some(job) = rx.recv().await {
            if job.status.is_final() {
                cancel.cancel();
                return job;
            }
        }
        panic!("watch ended before job {jid} finished");
    };

    let (watched, job) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(watch, follow)
    })
    .await
    .expect("job did not reach a final state");
    watched.unwrap();
    job
}

pub async fn push(instance: &Instance, cfg: CidConfig, override_config: bool) -> JobId {
    instance
        .push_config(
            cfg.cid,
            PushConfigOptions::new()
                .with_cid_config(cfg)
                .with_override(override_config),
        )
        .await
        .unwrap()
}

pub fn with_tiers(cid: Cid, hot: bool, cold: bool) -> CidConfig {
    let mut cfg = DefaultCidConfig {
        cold: ColdConfig {
            enabled: cold,
            filecoin: FilConfig {
                data_shards: 2,
                parity_shards: 1,
                ..Default::default()
            },
        },
        ..Default::default()
    }
    .for_cid(cid);
    cfg.hot.enabled = hot;
    cfg
}

pub async fn read_all(mut reader: BoxReader) -> Vec<u8> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    out
}

pub fn payload(len: usize, salt: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(salt))
        .collect()
}
