//! Admission request state tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::directory::{IdentityTag, Profile};
use crate::id::{RequestId, UserId};
use crate::priority::PriorityClass;

pub const MAX_REASON_LEN: usize = 280;

/// Lifecycle of a request: `Pending -> Occupying -> Finished`.
///
/// No transition skips a state and none reverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    #[serde(rename = "waiting")]
    Pending,
    #[serde(rename = "using")]
    Occupying,
    #[serde(rename = "completed")]
    Finished,
}

impl RequestStatus {
    /// Pending and occupying requests count against the one-per-requester
    /// limit.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Occupying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "waiting",
            Self::Occupying => "using",
            Self::Finished => "completed",
        }
    }
}

/// A request to use the resource.
///
/// The requester's name and tag are copied in at creation and never
/// refreshed from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    pub id: RequestId,
    pub user_id: UserId,
    pub user_name: String,
    pub user_color: IdentityTag,
    pub priority: PriorityClass,
    pub status: RequestStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Arrival order; breaks ties between requests stamped in the same tick.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Request {
    pub(crate) fn new(
        user_id: UserId,
        profile: Profile,
        priority: PriorityClass,
        reason: Option<String>,
        seq: u64,
    ) -> Self {
        Self {
            id: RequestId::new(),
            user_id,
            user_name: profile.display_name,
            user_color: profile.tag,
            priority,
            status: RequestStatus::Pending,
            reason,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            seq,
        }
    }

    /// Composite ordering key for the pending line: class rank, then
    /// creation time, then arrival sequence.
    pub fn queue_key(&self) -> (PriorityClass, DateTime<Utc>, u64) {
        (self.priority, self.created_at, self.seq)
    }

    pub(crate) fn set_occupying(&mut self, at: DateTime<Utc>) {
        debug_assert_eq!(self.status, RequestStatus::Pending);
        self.status = RequestStatus::Occupying;
        self.started_at = Some(at);
    }

    pub(crate) fn set_finished(&mut self, at: DateTime<Utc>) {
        debug_assert_eq!(self.status, RequestStatus::Occupying);
        self.status = RequestStatus::Finished;
        self.completed_at = Some(at);
    }

    /// Time spent holding the resource, once finished.
    pub fn occupancy(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}

/// Trim a free-text reason; blank becomes `None`.
pub(crate) fn normalize_reason(reason: Option<String>) -> Result<Option<String>, String> {
    let Some(reason) = reason else {
        return Ok(None);
    };
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_REASON_LEN {
        return Err(format!("reason must be at most {MAX_REASON_LEN} characters"));
    }
    Ok(Some(trimmed.to_string()))
}
