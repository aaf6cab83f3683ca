use std::sync::Arc;

use chrono::Utc;
use common::cid::Cid;
use common::cid_info::LogEntry;
use common::job::JobId;
use tracing::info;

use crate::hub::Broadcaster;

/// Human-readable progress messages for one job, published to log watchers
/// and mirrored into the tracing output.
#[derive(Clone)]
pub struct JobLogger {
    hub: Arc<Broadcaster<LogEntry>>,
    cid: Cid,
    jid: JobId,
}

impl JobLogger {
    pub fn new(hub: Arc<Broadcaster<LogEntry>>, cid: Cid, jid: JobId) -> Self {
        Self { hub, cid, jid }
    }

    pub fn log(&self, msg: impl Into<String>) {
        let msg = msg.into();
        info!(cid = %self.cid, job_id = %self.jid, "{msg}");
        self.hub.publish(LogEntry {
            cid: self.cid,
            jid: self.jid.clone(),
            msg,
            timestamp: Utc::now(),
        });
    }
}
