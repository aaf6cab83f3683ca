use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cid::Cid;

/// Opaque identifier of a tenant instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiId(String);

impl ApiId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Whether the identifier has the shape of a generated id.
    pub fn is_valid(&self) -> bool {
        uuid::Uuid::parse_str(&self.0).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ApiId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ApiId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ApiId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a scheduled job.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Time-ordered identifier so ids sort by submission.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status of a job during its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum JobStatus {
    /// Accepted, waiting for an execution slot.
    #[default]
    Queued,
    /// Reconciling hot and cold storage.
    Executing,
    /// Observed state matches the pushed config.
    Success,
    /// Execution stopped on an error; see the job's error cause.
    Failed,
    /// The Cid was untracked before the job finished.
    Canceled,
}

impl JobStatus {
    /// Returns true if no further transition can happen.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Canceled)
    }

    /// Whether moving from `self` to `next` respects the job state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Executing | Self::Failed | Self::Canceled) => true,
            (Self::Executing, Self::Success | Self::Failed | Self::Canceled) => true,
            _ => false,
        }
    }

    /// All possible status values.
    pub const ALL: &'static [JobStatus] = &[
        Self::Queued,
        Self::Executing,
        Self::Success,
        Self::Failed,
        Self::Canceled,
    ];

    /// Returns the string representation (PascalCase).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Executing => "Executing",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            JobStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
            })
    }
}

/// One asynchronous reconciliation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub api_id: ApiId,
    pub cid: Cid,
    pub status: JobStatus,
    /// Failure detail when `status` is `Failed`.
    pub error_cause: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(api_id: ApiId, cid: Cid) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            api_id,
            cid,
            status: JobStatus::Queued,
            error_cause: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status change. Returns false, leaving the job untouched, if the
    /// change would violate the state machine.
    pub fn transition(&mut self, next: JobStatus, error_cause: Option<String>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.error_cause = error_cause;
        self.updated_at = Utc::now();
        true
    }
}
