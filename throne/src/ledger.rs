//! Ledger of queue transitions.
//!
//! The queue reports every committed transition here. Recording happens after
//! the state change and never feeds back into it: a failing ledger is logged
//! and the operation still succeeds.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::request::{Request, RequestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEvent {
    Enqueued,
    Started,
    Finished,
    Cancelled,
}

/// One committed transition, with the request as it stood afterwards
/// (or, for cancellations, as it stood when removed).
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub event: LedgerEvent,
    pub at: DateTime<Utc>,
    pub request: Request,
    /// Set on cancellation so a cancelled occupancy is distinguishable from
    /// a cancelled wait.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_from: Option<RequestStatus>,
}

impl LedgerEntry {
    pub fn new(event: LedgerEvent, request: Request) -> Self {
        Self {
            event,
            at: Utc::now(),
            request,
            cancelled_from: None,
        }
    }

    pub fn cancelled(request: Request) -> Self {
        let from = request.status;
        Self {
            cancelled_from: Some(from),
            ..Self::new(LedgerEvent::Cancelled, request)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to open ledger {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write ledger entry: {0}")]
    Write(#[from] std::io::Error),
    #[error("Failed to encode ledger entry: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait Ledger: Send + Sync {
    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;
}

/// Emits each entry as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLedger;

impl Ledger for TracingLedger {
    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        tracing::info!(
            target: "throne::ledger",
            event = ?entry.event,
            request_id = %entry.request.id,
            user_id = %entry.request.user_id,
            priority = %entry.request.priority,
            cancelled_from = ?entry.cancelled_from,
            "Queue transition"
        );
        Ok(())
    }
}

/// Appends entries to a file, one JSON document per line.
pub struct FileLedger {
    file: Mutex<File>,
}

impl FileLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LedgerError::Open {
                path: path.clone(),
                source,
            })?;
        tracing::info!(path = %path.display(), "Opened ledger file");
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl Ledger for FileLedger {
    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        // One write per line under the lock keeps lines from interleaving.
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}
