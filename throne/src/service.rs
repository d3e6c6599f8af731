//! HouseService: transport-agnostic facade over the household stores.
//!
//! This service owns:
//! - The user directory, admission queue, hygiene ratings and supplies
//! - Health reporting (ready / busy / stopping)
//! - Shutdown coordination
//!
//! Transports delegate every operation here and only translate errors.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::directory::InMemoryDirectory;
use crate::health::Health;
use crate::id::RequestId;
use crate::ledger::{Ledger, TracingLedger};
use crate::queue::{AdmissionQueue, QueueConfig};
use crate::ratings::{HygieneRating, HygieneRatings};
use crate::request::Request;
use crate::supplies::Supplies;
use crate::version::VersionInfo;

/// What the household dashboard shows at a glance.
#[derive(Debug, Clone, Serialize)]
pub struct BathroomState {
    pub is_occupied: bool,
    pub current_user: Option<Request>,
    pub last_hygiene_rating: Option<HygieneRating>,
}

/// Snapshot of service health for transports to query.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub state: Health,
    pub occupied: bool,
    pub pending: usize,
    /// The waiting request that would be admitted next.
    pub next_up: Option<RequestId>,
    pub version: VersionInfo,
}

impl HealthSnapshot {
    pub fn is_stopping(&self) -> bool {
        self.state == Health::Stopping
    }

    /// BUSY state: ready but the resource is held.
    pub fn is_busy(&self) -> bool {
        self.state != Health::Stopping && self.occupied
    }

    /// The status to report on the wire.
    pub fn status(&self) -> Health {
        if self.is_busy() {
            Health::Busy
        } else {
            self.state
        }
    }
}

pub struct HouseService {
    directory: Arc<InMemoryDirectory>,
    queue: AdmissionQueue,
    ratings: HygieneRatings,
    supplies: Supplies,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    version: VersionInfo,
}

impl HouseService {
    /// Service with default limits that logs transitions instead of
    /// persisting them.
    pub fn new() -> Self {
        Self::with_ledger(Arc::new(TracingLedger), QueueConfig::default())
    }

    pub fn with_ledger(ledger: Arc<dyn Ledger>, config: QueueConfig) -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            queue: AdmissionQueue::with_config(directory.clone(), ledger, config),
            ratings: HygieneRatings::new(directory.clone()),
            supplies: Supplies::new(directory.clone()),
            directory,
            shutdown_tx,
            shutdown_rx,
            version: VersionInfo::new(),
        }
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn directory(&self) -> &InMemoryDirectory {
        &self.directory
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    pub fn ratings(&self) -> &HygieneRatings {
        &self.ratings
    }

    pub fn supplies(&self) -> &Supplies {
        &self.supplies
    }

    pub fn bathroom_state(&self) -> BathroomState {
        let current_user = self.queue.current_occupant();
        BathroomState {
            is_occupied: current_user.is_some(),
            current_user,
            last_hygiene_rating: self.ratings.latest(),
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        let state = if *self.shutdown_rx.borrow() {
            Health::Stopping
        } else {
            Health::Ready
        };
        HealthSnapshot {
            state,
            occupied: self.queue.is_occupied(),
            pending: self.queue.pending_count(),
            next_up: self.queue.head().map(|r| r.id),
            version: self.version.clone(),
        }
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}

impl Default for HouseService {
    fn default() -> Self {
        Self::new()
    }
}
