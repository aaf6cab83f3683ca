use common::cid_config::CidConfig;
use common::job::JobId;

/// Per-call settings for [`Instance::push_config`](crate::Instance::push_config).
#[derive(Debug, Clone, Default)]
pub struct PushConfigOptions {
    /// Policy to push instead of the instance default. Its Cid must match
    /// the pushed one.
    pub cid_config: Option<CidConfig>,
    /// Allow replacing an existing config.
    pub override_config: bool,
}

impl PushConfigOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cid_config(mut self, config: CidConfig) -> Self {
        self.cid_config = Some(config);
        self
    }

    pub fn with_override(mut self, override_config: bool) -> Self {
        self.override_config = override_config;
        self
    }
}

/// Filters for [`Instance::watch_logs`](crate::Instance::watch_logs).
#[derive(Debug, Clone, Default)]
pub struct WatchLogsOptions {
    pub job_id: Option<JobId>,
}

impl WatchLogsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only forward entries produced by `job_id`.
    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }
}
