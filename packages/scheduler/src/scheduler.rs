use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::cid::Cid;
use common::cid_config::CidConfig;
use common::cid_info::{CidInfo, HotInfo, IpfsHotInfo, LogEntry};
use common::config::SchedulerConfig;
use common::dag;
use common::job::{ApiId, Job, JobId, JobStatus};
use common::storage::memory::MemoryBlockStore;
use common::storage::{BoxReader, KvStore};
use common::tiers::{ColdStorage, HotStorage};
use dashmap::DashMap;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::error::{BackendContext, Result, SchedulerError};
use crate::hub::{Broadcaster, Subscription};
use crate::logger::JobLogger;
use crate::store::{StateStore, TrackedCid};

/// What a job has to reconcile.
#[derive(Debug, Clone)]
enum Action {
    Push,
    /// Move hot storage from `old` to the job's Cid.
    Replace { old: Cid },
}

/// Runs reconciliation jobs against the hot and cold tiers.
///
/// Cheap to clone; clones share the same job table, hubs and workers.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    hot: Arc<dyn HotStorage>,
    cold: Arc<dyn ColdStorage>,
    state: StateStore,
    jobs: DashMap<JobId, Job>,
    /// In-flight job per Cid, with the token that cancels it.
    running: DashMap<Cid, (JobId, CancellationToken)>,
    job_hub: Broadcaster<Job>,
    log_hub: Arc<Broadcaster<LogEntry>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    span: Span,
}

impl Scheduler {
    pub fn new(
        hot: Arc<dyn HotStorage>,
        cold: Arc<dyn ColdStorage>,
        kv: Arc<dyn KvStore>,
        config: &SchedulerConfig,
        span: Span,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                hot,
                cold,
                state: StateStore::new(kv),
                jobs: DashMap::new(),
                running: DashMap::new(),
                job_hub: Broadcaster::new(),
                log_hub: Arc::new(Broadcaster::new()),
                permits: Arc::new(Semaphore::new(config.max_parallel_jobs.max(1))),
                shutdown: CancellationToken::new(),
                span,
            }),
        }
    }

    /// Submit a job that reconciles `cfg.cid` with `cfg`. Returns immediately.
    pub async fn push_config(
        &self,
        api_id: &ApiId,
        wallet_addr: &str,
        cfg: CidConfig,
    ) -> Result<JobId> {
        self.submit(api_id, wallet_addr, cfg, Action::Push).await
    }

    /// Like [`push_config`](Self::push_config), moving hot storage from `old` to `cfg.cid`.
    pub async fn push_replace(
        &self,
        api_id: &ApiId,
        wallet_addr: &str,
        cfg: CidConfig,
        old: Cid,
    ) -> Result<JobId> {
        self.submit(api_id, wallet_addr, cfg, Action::Replace { old })
            .await
    }

    pub async fn get_cid_info(&self, cid: &Cid) -> Result<CidInfo> {
        Ok(self.inner.state.get_cid_info(cid).await?)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Job> {
        if let Some(job) = self.inner.jobs.get(id) {
            return Ok(job.value().clone());
        }
        Ok(self.inner.state.get_job(id).await?)
    }

    /// Read `cid` from hot storage. Fails with `HotStorageDisabled` when it
    /// is not pinned there.
    pub async fn get_cid_from_hot(&self, cid: &Cid) -> Result<BoxReader> {
        let stored = self
            .inner
            .hot
            .is_stored(cid)
            .await
            .with_context(|| format!("checking hot storage for {cid}"))?;
        if !stored {
            return Err(SchedulerError::HotStorageDisabled(*cid));
        }
        self.inner
            .hot
            .get(cid)
            .await
            .with_context(|| format!("reading {cid} from hot storage"))
    }

    /// Read `cid` by reconstructing it from its cold storage shards.
    pub async fn get_cid_from_cold(&self, cid: &Cid, wallet_addr: &str) -> Result<BoxReader> {
        let info = self.get_cid_info(cid).await?;
        if !info.cold.filecoin.is_stored() {
            return Err(SchedulerError::NotFound(format!("cold storage copy of {cid}")));
        }

        let staging = MemoryBlockStore::new();
        self.inner
            .cold
            .retrieve(cid, &staging, wallet_addr)
            .await
            .with_context(|| format!("retrieving {cid} from cold storage"))?;
        let file = dag::open_file(&staging, cid)
            .await
            .with_context(|| format!("opening retrieved {cid}"))?;
        Ok(file.into_reader())
    }

    /// Register for every job transition from now on.
    pub fn subscribe_jobs(&self) -> Subscription<Job> {
        self.inner.job_hub.subscribe()
    }

    /// Register for every job log entry from now on.
    pub fn subscribe_logs(&self) -> Subscription<LogEntry> {
        self.inner.log_hub.subscribe()
    }

    /// Forward transitions of `api_id`'s jobs into `sink` until `cancel` fires,
    /// the scheduler closes, or the receiver goes away.
    pub async fn watch_jobs(
        &self,
        cancel: CancellationToken,
        sink: mpsc::Sender<Job>,
        api_id: &ApiId,
    ) -> Result<()> {
        let mut sub = self.subscribe_jobs();
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = sub.recv() => match next {
                    Some(job) => job,
                    None => return Ok(()),
                },
            };
            if &job.api_id != api_id {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = sink.send(job) => if sent.is_err() {
                    return Ok(());
                },
            }
        }
    }

    /// Forward every log entry into `sink` until `cancel` fires, the scheduler
    /// closes, or the receiver goes away.
    pub async fn watch_logs(
        &self,
        cancel: CancellationToken,
        sink: mpsc::Sender<LogEntry>,
    ) -> Result<()> {
        let mut sub = self.subscribe_logs();
        loop {
            let entry = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = sub.recv() => match next {
                    Some(entry) => entry,
                    None => return Ok(()),
                },
            };
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = sink.send(entry) => if sent.is_err() {
                    return Ok(());
                },
            }
        }
    }

    /// Stop managing `cid`: cancels its in-flight job and excludes it from
    /// renewals. Stored data is left in place.
    pub async fn untrack(&self, cid: &Cid) -> Result<()> {
        self.cancel_running(cid);
        self.inner.state.delete_tracked(cid).await?;
        Ok(())
    }

    /// Number of jobs that have not reached a final state yet.
    pub fn active_jobs(&self) -> usize {
        self.inner.jobs.len()
    }

    fn cancel_running(&self, cid: &Cid) {
        if let Some((_, (jid, token))) = self.inner.running.remove(cid) {
            debug!(parent: &self.inner.span, cid = %cid, job_id = %jid, "Cancelling in-flight job");
            token.cancel();
        }
    }

    /// Run renewal checks for every tracked Cid with cold renewal enabled.
    /// Returns how many Cids were checked.
    pub async fn run_renewals(&self) -> Result<usize> {
        let mut checked = 0;
        for tracked in self.inner.state.list_tracked().await? {
            let cfg = &tracked.config;
            if !cfg.cold.enabled || !cfg.cold.filecoin.renew.enabled {
                continue;
            }
            if self.inner.running.contains_key(&cfg.cid) {
                continue;
            }
            let mut info = match self.inner.state.get_cid_info(&cfg.cid).await {
                Ok(info) => info,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            if !info.cold.filecoin.is_stored() {
                continue;
            }

            info.cold.filecoin = self
                .inner
                .cold
                .ensure_renewals(
                    &cfg.cid,
                    info.cold.filecoin,
                    &tracked.wallet_addr,
                    &cfg.cold.filecoin,
                )
                .await
                .with_context(|| format!("renewing deals for {}", cfg.cid))?;
            self.inner.state.put_cid_info(&info).await?;
            checked += 1;
        }
        Ok(checked)
    }

    /// Periodically run [`run_renewals`](Self::run_renewals) until the scheduler closes.
    pub fn spawn_renewal_loop(&self, interval: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let span = info_span!(parent: &self.inner.span, "renewals");
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    match scheduler.run_renewals().await {
                        Ok(checked) => debug!(checked, "Renewal sweep finished"),
                        Err(e) => warn!(error = %e, "Renewal sweep failed"),
                    }
                }
            }
            .instrument(span),
        )
    }

    /// Cancel in-flight jobs and end all subscriptions. Idempotent.
    pub fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!(parent: &self.inner.span, "Closing scheduler");
        self.inner.shutdown.cancel();
        self.inner.job_hub.close();
        self.inner.log_hub.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    async fn submit(
        &self,
        api_id: &ApiId,
        wallet_addr: &str,
        cfg: CidConfig,
        action: Action,
    ) -> Result<JobId> {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let tracked = TrackedCid {
            api_id: api_id.clone(),
            wallet_addr: wallet_addr.to_string(),
            config: cfg,
        };
        self.inner.state.put_tracked(&tracked).await?;

        let job = Job::new(api_id.clone(), tracked.config.cid);
        let jid = job.id.clone();
        self.inner.state.put_job(&job).await?;
        self.inner.jobs.insert(jid.clone(), job.clone());
        self.inner.job_hub.publish(job);

        // A replaced Cid must not be re-pinned by a job still working on it.
        if let Action::Replace { old } = &action {
            self.cancel_running(old);
        }

        let token = self.inner.shutdown.child_token();
        self.inner
            .running
            .insert(tracked.config.cid, (jid.clone(), token.clone()));

        let span = info_span!(
            parent: &self.inner.span,
            "job",
            job_id = %jid,
            cid = %tracked.config.cid
        );
        let inner = self.inner.clone();
        let run_jid = jid.clone();
        tokio::spawn(
            async move {
                inner.run(run_jid, tracked, action, token).await;
            }
            .instrument(span),
        );

        Ok(jid)
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        jid: JobId,
        tracked: TrackedCid,
        action: Action,
        token: CancellationToken,
    ) {
        let cid = tracked.config.cid;

        let _permit = tokio::select! {
            _ = token.cancelled() => {
                self.finish(&jid, &cid, JobStatus::Canceled, None).await;
                return;
            }
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.finish(&jid, &cid, JobStatus::Canceled, None).await;
                    return;
                }
            },
        };

        self.transition(&jid, JobStatus::Executing, None).await;
        let logger = JobLogger::new(self.log_hub.clone(), cid, jid.clone());

        // A panic while executing surfaces here as a `JoinError`.
        let mut exec = {
            let inner = self.clone();
            let jid = jid.clone();
            let logger = logger.clone();
            tokio::spawn(
                async move { inner.execute(&jid, &tracked, &action, &logger).await }
                    .in_current_span(),
            )
        };
        let outcome = tokio::select! {
            _ = token.cancelled() => None,
            res = &mut exec => Some(res),
        };

        match outcome {
            None => {
                exec.abort();
                let _ = exec.await;
                logger.log("Job canceled");
                self.finish(&jid, &cid, JobStatus::Canceled, None).await;
            }
            Some(Ok(Ok(()))) => {
                logger.log("Job finished successfully");
                self.finish(&jid, &cid, JobStatus::Success, None).await;
            }
            Some(Ok(Err(e))) => {
                logger.log(format!("Job failed: {e}"));
                self.finish(&jid, &cid, JobStatus::Failed, Some(e.to_string()))
                    .await;
            }
            Some(Err(e)) => {
                warn!(job_id = %jid, error = %e, "Job execution aborted");
                logger.log(format!("Job failed: execution aborted: {e}"));
                self.finish(
                    &jid,
                    &cid,
                    JobStatus::Failed,
                    Some(format!("execution aborted: {e}")),
                )
                .await;
            }
        }
    }

    async fn execute(
        &self,
        jid: &JobId,
        tracked: &TrackedCid,
        action: &Action,
        logger: &JobLogger,
    ) -> Result<()> {
        let cfg = &tracked.config;
        let cid = cfg.cid;

        let mut info = match self.state.get_cid_info(&cid).await {
            Ok(mut info) => {
                info.job_id = jid.clone();
                info
            }
            Err(e) if e.is_not_found() => CidInfo::new(jid.clone(), cid),
            Err(e) => return Err(e.into()),
        };

        if cfg.hot.enabled {
            info.hot = self
                .reconcile_hot(tracked, action, &info, logger)
                .await?;
        }
        self.reconcile_cold(tracked, &mut info, logger).await?;
        // Cold storage reads the same blocks, so they are released only
        // once the cold copy is in place.
        if !cfg.hot.enabled {
            if let Action::Replace { old } = action {
                self.remove_from_hot(old, logger).await?;
            }
            self.remove_from_hot(&cid, logger).await?;
            info.hot = HotInfo::default();
        }

        self.state.put_cid_info(&info).await?;

        if let Action::Replace { old } = action {
            self.state.delete_tracked(old).await?;
            logger.log(format!("Stopped tracking replaced cid {old}"));
        }
        Ok(())
    }

    async fn reconcile_hot(
        &self,
        tracked: &TrackedCid,
        action: &Action,
        info: &CidInfo,
        logger: &JobLogger,
    ) -> Result<HotInfo> {
        let cid = tracked.config.cid;
        let secs = tracked.config.hot.ipfs.add_timeout;
        let size = match tokio::time::timeout(
            Duration::from_secs(secs),
            self.store_in_hot(tracked, action, info, logger),
        )
        .await
        {
            Ok(res) => res?,
            Err(_) => {
                return Err(SchedulerError::Timeout {
                    operation: format!("storing {cid} in hot storage"),
                    secs,
                });
            }
        };

        Ok(HotInfo {
            enabled: true,
            size,
            ipfs: IpfsHotInfo {
                created: info.hot.ipfs.created.or_else(|| Some(Utc::now())),
            },
        })
    }

    async fn store_in_hot(
        &self,
        tracked: &TrackedCid,
        action: &Action,
        info: &CidInfo,
        logger: &JobLogger,
    ) -> Result<u64> {
        let cid = tracked.config.cid;

        if let Action::Replace { old } = action {
            let old_stored = self
                .hot
                .is_stored(old)
                .await
                .with_context(|| format!("checking hot storage for {old}"))?;
            if old_stored {
                let size = self
                    .hot
                    .replace(old, &cid)
                    .await
                    .with_context(|| format!("replacing {old} with {cid} in hot storage"))?;
                logger.log(format!("Replaced {old} in hot storage ({size} bytes)"));
                return Ok(size);
            }
        }

        match self.hot.store(&cid).await {
            Ok(size) => {
                logger.log(format!("Pinned in hot storage ({size} bytes)"));
                Ok(size)
            }
            Err(e) if e.is_not_found() && tracked.config.hot.allow_unfreeze => {
                logger.log("Data not available locally, unfreezing from cold storage");
                self.unfreeze(tracked, info).await?;
                let size = self
                    .hot
                    .store(&cid)
                    .await
                    .with_context(|| format!("pinning unfrozen {cid} in hot storage"))?;
                logger.log(format!("Unfroze and pinned in hot storage ({size} bytes)"));
                Ok(size)
            }
            Err(e) => Err(SchedulerError::Backend {
                context: format!("pinning {cid} in hot storage"),
                source: e,
            }),
        }
    }

    async fn unfreeze(&self, tracked: &TrackedCid, info: &CidInfo) -> Result<()> {
        let cid = tracked.config.cid;
        if !info.cold.filecoin.is_stored() {
            return Err(SchedulerError::NotFound(format!(
                "cold storage copy of {cid} to unfreeze"
            )));
        }

        let staging = MemoryBlockStore::new();
        self.cold
            .retrieve(&cid, &staging, &tracked.wallet_addr)
            .await
            .with_context(|| format!("retrieving {cid} from cold storage"))?;
        let blocks = dag::collect_blocks(&staging, &cid)
            .await
            .with_context(|| format!("walking unfrozen {cid}"))?;
        for block in blocks {
            self.hot
                .put(block)
                .await
                .with_context(|| format!("copying unfrozen {cid} into hot storage"))?;
        }
        Ok(())
    }

    async fn remove_from_hot(&self, cid: &Cid, logger: &JobLogger) -> Result<()> {
        let stored = self
            .hot
            .is_stored(cid)
            .await
            .with_context(|| format!("checking hot storage for {cid}"))?;
        if stored {
            self.hot
                .remove(cid)
                .await
                .with_context(|| format!("removing {cid} from hot storage"))?;
            logger.log(format!("Removed {cid} from hot storage"));
        }
        Ok(())
    }

    async fn reconcile_cold(
        &self,
        tracked: &TrackedCid,
        info: &mut CidInfo,
        logger: &JobLogger,
    ) -> Result<()> {
        let cfg = &tracked.config;
        if !cfg.cold.enabled {
            return Ok(());
        }
        let cid = cfg.cid;
        let fil = &cfg.cold.filecoin;

        if info.cold.filecoin.is_stored() {
            info.cold.filecoin = self
                .cold
                .ensure_renewals(&cid, info.cold.filecoin.clone(), &tracked.wallet_addr, fil)
                .await
                .with_context(|| format!("checking cold storage renewals for {cid}"))?;
            logger.log("Cold storage already in place, checked renewals");
            return Ok(());
        }

        logger.log(format!(
            "Storing in cold storage with {} data and {} parity shards",
            fil.data_shards, fil.parity_shards
        ));
        info.cold.filecoin = self
            .cold
            .store(&cid, &tracked.wallet_addr, fil)
            .await
            .with_context(|| format!("storing {cid} in cold storage"))?;
        logger.log(format!(
            "Stored {} shards in cold storage",
            info.cold.filecoin.proposals.len()
        ));
        Ok(())
    }

    async fn transition(&self, jid: &JobId, status: JobStatus, cause: Option<String>) {
        let updated = {
            let Some(mut job) = self.jobs.get_mut(jid) else {
                return;
            };
            if !job.transition(status, cause) {
                return;
            }
            job.clone()
        };

        if let Err(e) = self.state.put_job(&updated).await {
            warn!(job_id = %jid, error = %e, "Failed to persist job");
        }
        self.job_hub.publish(updated);
    }

    async fn finish(&self, jid: &JobId, cid: &Cid, status: JobStatus, cause: Option<String>) {
        self.running.remove_if(cid, |_, (running, _)| running == jid);
        self.transition(jid, status, cause).await;
        // Final jobs are served from the state store from here on.
        self.jobs.remove(jid);
    }
}
