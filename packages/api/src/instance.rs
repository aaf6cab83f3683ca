//! Single-tenant facade over the scheduler.
//!
//! An [`Instance`] owns a wallet address and a default storage policy, and
//! enforces configuration policy before handing work to the [`Scheduler`].
//! Mutations (`push_config`, `replace`, `remove`, `set_default_cid_config`)
//! run one at a time per instance; reads do not take the lock and may be
//! stale relative to an in-flight mutation.

use std::collections::HashMap;
use std::sync::Arc;

use common::cid::Cid;
use common::cid_config::{CidConfig, DefaultCidConfig, ValidationError};
use common::cid_info::{CidInfo, LogEntry};
use common::job::{ApiId, Job, JobId, JobStatus};
use common::market::WalletManager;
use common::storage::BoxReader;
use scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, info_span, warn};

use crate::error::{ApiError, ErrorContext, Result};
use crate::instance_store::{InstanceConfig, InstanceStore};
use crate::options::{PushConfigOptions, WatchLogsOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub address: String,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: ApiId,
    pub default_cid_config: DefaultCidConfig,
    pub wallet: WalletInfo,
    pub pins: Vec<Cid>,
}

pub struct Instance {
    id: ApiId,
    wallet_addr: String,
    store: Arc<dyn InstanceStore>,
    wallet: Arc<dyn WalletManager>,
    scheduler: Scheduler,
    /// Current instance config; held for the whole of every mutation.
    config: Mutex<InstanceConfig>,
    cancel: CancellationToken,
    span: Span,
}

impl Instance {
    /// Create a fresh instance with a new wallet address of `address_type`.
    pub async fn new(
        id: ApiId,
        store: Arc<dyn InstanceStore>,
        scheduler: Scheduler,
        wallet: Arc<dyn WalletManager>,
        default_cid_config: DefaultCidConfig,
        address_type: &str,
    ) -> Result<Self> {
        default_cid_config.validate()?;
        let wallet_addr = wallet
            .new_address(address_type)
            .await
            .context(|| "creating new wallet address".to_string())?;

        let config = InstanceConfig {
            id: id.clone(),
            wallet_addr,
            default_cid_config,
        };
        store
            .put_config(&config)
            .await
            .context(|| format!("saving new instance {id}"))?;

        let instance = Self::from_config(config, store, scheduler, wallet);
        info!(parent: &instance.span, wallet_addr = %instance.wallet_addr, "Created instance");
        Ok(instance)
    }

    /// Restore a previously created instance from its store.
    pub async fn load(
        store: Arc<dyn InstanceStore>,
        scheduler: Scheduler,
        wallet: Arc<dyn WalletManager>,
    ) -> Result<Self> {
        let config = store
            .get_config()
            .await
            .context(|| "loading instance".to_string())?;
        let instance = Self::from_config(config, store, scheduler, wallet);
        debug!(parent: &instance.span, "Loaded instance");
        Ok(instance)
    }

    fn from_config(
        config: InstanceConfig,
        store: Arc<dyn InstanceStore>,
        scheduler: Scheduler,
        wallet: Arc<dyn WalletManager>,
    ) -> Self {
        Self {
            id: config.id.clone(),
            wallet_addr: config.wallet_addr.clone(),
            span: info_span!("instance", api_id = %config.id),
            store,
            wallet,
            scheduler,
            config: Mutex::new(config),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &ApiId {
        &self.id
    }

    pub fn wallet_addr(&self) -> &str {
        &self.wallet_addr
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ApiError::Closed);
        }
        Ok(())
    }

    /// The default template materialized for `cid`.
    pub async fn get_default_cid_config(&self, cid: Cid) -> CidConfig {
        self.config.lock().await.default_cid_config.for_cid(cid)
    }

    /// Replace the default template. Existing per-Cid configs are untouched.
    pub async fn set_default_cid_config(&self, default_cid_config: DefaultCidConfig) -> Result<()> {
        self.ensure_open()?;
        default_cid_config.validate()?;

        let mut config = self.config.lock().await;
        let mut updated = config.clone();
        updated.default_cid_config = default_cid_config;
        self.store
            .put_config(&updated)
            .await
            .context(|| format!("saving default config of instance {}", self.id))?;
        *config = updated;
        Ok(())
    }

    /// The config currently applied to `cid`.
    pub async fn get_cid_config(&self, cid: &Cid) -> Result<CidConfig> {
        self.store
            .get_cid_config(cid)
            .await
            .context(|| format!("getting config of {cid}"))
    }

    /// Submit `cid` for storage under the default policy or the one in `opts`.
    pub async fn push_config(&self, cid: Cid, opts: PushConfigOptions) -> Result<JobId> {
        self.ensure_open()?;
        let config = self.config.lock().await;

        let cfg = match opts.cid_config {
            Some(cfg) if cfg.cid != cid => {
                return Err(ValidationError(format!(
                    "config is for {}, but {cid} was pushed",
                    cfg.cid
                ))
                .into());
            }
            Some(cfg) => cfg,
            None => config.default_cid_config.for_cid(cid),
        };

        if !opts.override_config {
            match self.store.get_cid_config(&cid).await {
                Ok(_) => return Err(ApiError::MustOverrideConfig(cid)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e).context(|| format!("getting config of {cid}")),
            }
        }
        cfg.validate()?;

        let jid = self
            .scheduler
            .push_config(&self.id, &config.wallet_addr, cfg.clone())
            .await
            .context(|| format!("scheduling {cid}"))?;
        self.store
            .put_cid_config(&cfg)
            .await
            .context(|| format!("saving new config for {cid}"))?;

        info!(parent: &self.span, cid = %cid, job_id = %jid, "Pushed config");
        Ok(jid)
    }

    /// Move `old`'s policy onto `new` in one scheduler job.
    pub async fn replace(&self, old: Cid, new: Cid) -> Result<JobId> {
        self.ensure_open()?;
        let config = self.config.lock().await;

        let mut cfg = match self.store.get_cid_config(&old).await {
            Ok(cfg) => cfg,
            Err(e) if e.is_not_found() => return Err(ApiError::ReplacedCidNotFound(old)),
            Err(e) => return Err(e).context(|| format!("getting replaced config of {old}")),
        };
        cfg.cid = new;

        let jid = self
            .scheduler
            .push_replace(&self.id, &config.wallet_addr, cfg.clone(), old)
            .await
            .context(|| format!("scheduling replacement of {old} with {new}"))?;
        self.store
            .put_cid_config(&cfg)
            .await
            .context(|| format!("saving new config for {new}"))?;
        self.store
            .remove_cid_config(&old)
            .await
            .context(|| format!("deleting replaced config of {old}"))?;

        info!(parent: &self.span, old = %old, new = %new, job_id = %jid, "Replaced cid");
        Ok(jid)
    }

    /// Stop managing `cid`. Both tiers must already be disabled in its config.
    pub async fn remove(&self, cid: &Cid) -> Result<()> {
        self.ensure_open()?;
        let _config = self.config.lock().await;

        let cfg = self
            .store
            .get_cid_config(cid)
            .await
            .context(|| format!("getting config of {cid}"))?;
        if cfg.is_active() {
            return Err(ApiError::ActiveInStorage(*cid));
        }

        self.scheduler
            .untrack(cid)
            .await
            .context(|| format!("untracking {cid}"))?;
        self.store
            .remove_cid_config(cid)
            .await
            .context(|| format!("deleting config of {cid}"))?;

        info!(parent: &self.span, cid = %cid, "Removed cid");
        Ok(())
    }

    /// Observed storage state of `cid`.
    pub async fn show(&self, cid: &Cid) -> Result<CidInfo> {
        self.scheduler
            .get_cid_info(cid)
            .await
            .context(|| format!("getting information of {cid}"))
    }

    pub async fn info(&self) -> Result<InstanceInfo> {
        let default_cid_config = self.config.lock().await.default_cid_config.clone();
        let pins = self
            .store
            .get_cids()
            .await
            .context(|| format!("listing cids of instance {}", self.id))?;
        let balance = self
            .wallet
            .balance(&self.wallet_addr)
            .await
            .context(|| format!("getting balance of {}", self.wallet_addr))?;

        Ok(InstanceInfo {
            id: self.id.clone(),
            default_cid_config,
            wallet: WalletInfo {
                address: self.wallet_addr.clone(),
                balance,
            },
            pins,
        })
    }

    /// Read `cid` from hot storage.
    pub async fn get(&self, cid: &Cid) -> Result<BoxReader> {
        let cfg = self.get_cid_config(cid).await?;
        if !cfg.hot.enabled {
            return Err(ApiError::HotStorageDisabled(*cid));
        }
        self.scheduler
            .get_cid_from_hot(cid)
            .await
            .context(|| format!("getting {cid} from hot storage"))
    }

    /// Read `cid` by reconstructing it from its cold storage shards.
    pub async fn get_from_cold(&self, cid: &Cid) -> Result<BoxReader> {
        self.get_cid_config(cid).await?;
        self.scheduler
            .get_cid_from_cold(cid, &self.wallet_addr)
            .await
            .context(|| format!("getting {cid} from cold storage"))
    }

    /// Stream job transitions into `sink` until `cancel` fires or the
    /// instance closes.
    ///
    /// With no `jids`, every transition of this instance's jobs is forwarded.
    /// Otherwise the current state of each known job is sent first without
    /// blocking (dropped if `sink` is full), followed by live transitions of
    /// those jobs only.
    pub async fn watch_jobs(
        &self,
        cancel: CancellationToken,
        sink: mpsc::Sender<Job>,
        jids: &[JobId],
    ) -> Result<()> {
        self.ensure_open()?;

        // Registered before reading current state so no transition falls in between.
        let mut live = self.scheduler.subscribe_jobs();
        let mut replayed = Replayed::default();

        for jid in jids {
            let job = match self.scheduler.get_job(jid).await {
                Ok(job) if job.api_id == self.id => job,
                Ok(_) => continue,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e).context(|| format!("getting current state of job {jid}")),
            };
            let status = job.status;
            let id = job.id.clone();
            match sink.try_send(job) {
                Ok(()) => replayed.record(id, status),
                Err(TrySendError::Full(job)) => {
                    warn!(parent: &self.span, job_id = %job.id, "Dropped current job state on slow receiver");
                }
                Err(TrySendError::Closed(_)) => return Ok(()),
            }
        }

        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.cancel.cancelled() => return Ok(()),
                next = live.recv() => match next {
                    Some(job) => job,
                    None => return Ok(()),
                },
            };
            if job.api_id != self.id || (!jids.is_empty() && !jids.contains(&job.id)) {
                continue;
            }
            if !replayed.advances(&job) {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.cancel.cancelled() => return Ok(()),
                sent = sink.send(job) => if sent.is_err() {
                    return Ok(());
                },
            }
        }
    }

    /// Stream log entries of `cid` into `sink` until `cancel` fires, the
    /// instance closes or the scheduler stops producing logs.
    pub async fn watch_logs(
        &self,
        cancel: CancellationToken,
        sink: mpsc::Sender<LogEntry>,
        cid: &Cid,
        opts: WatchLogsOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        self.get_cid_config(cid).await?;

        let mut live = self.scheduler.subscribe_logs();
        loop {
            let entry = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.cancel.cancelled() => return Ok(()),
                next = live.recv() => match next {
                    Some(entry) => entry,
                    None => return Ok(()),
                },
            };
            if entry.cid != *cid {
                continue;
            }
            if opts.job_id.as_ref().is_some_and(|jid| *jid != entry.jid) {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.cancel.cancelled() => return Ok(()),
                sent = sink.send(entry) => if sent.is_err() {
                    return Ok(());
                },
            }
        }
    }

    /// Stop the instance. Running watches end and new ones are refused.
    /// Idempotent.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        info!(parent: &self.span, "Closed instance");
    }
}

/// Job states already sent to a watcher during replay. Live transitions
/// published before the replay read are stale and must not follow it.
#[derive(Default)]
struct Replayed(HashMap<JobId, JobStatus>);

impl Replayed {
    fn record(&mut self, id: JobId, status: JobStatus) {
        self.0.insert(id, status);
    }

    fn advances(&mut self, job: &Job) -> bool {
        match self.0.get(&job.id) {
            Some(sent) if !sent.can_transition_to(job.status) => false,
            Some(_) => {
                // Live events are in order from here on.
                self.0.remove(&job.id);
                true
            }
            None => true,
        }
    }
}
