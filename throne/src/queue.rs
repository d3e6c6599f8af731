//! Admission queue: pending line ordering and the occupancy state machine.
//!
//! Shared state:
//! - `requests`: every known request by id (pending, occupying, finished)
//! - `active`: requester -> their one pending/occupying request
//! - `slot`: the single occupancy marker
//!
//! Lock order is `slot` -> `active` -> `requests`. A guard into `requests`
//! is always dropped before `active` is touched.
//!
//! Every transition writes its ledger entry before releasing the slot, so
//! the ledger sees transitions in commit order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::directory::{Directory, DirectoryError};
use crate::error::{Classify, ErrorClass};
use crate::id::{RequestId, UserId};
use crate::ledger::{Ledger, LedgerEntry, LedgerEvent};
use crate::priority::PriorityClass;
use crate::request::{Request, RequestStatus, normalize_reason};
use crate::slot::OccupancySlot;

/// Read and retention limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of pending requests returned by `list_pending`.
    pub pending_cap: usize,
    /// Maximum number of finished requests returned by `history`.
    pub history_cap: usize,
    /// Finished requests kept in memory; oldest are pruned past this.
    pub history_retention: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pending_cap: 100,
            history_cap: 50,
            history_retention: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error("User not found: {0}")]
    UnknownRequester(UserId),
    #[error("User already in queue: {user} (request {existing})")]
    AlreadyQueued { user: UserId, existing: RequestId },
    #[error("Bathroom is already occupied (request {holder})")]
    Occupied { holder: RequestId },
    #[error("Queue item not found or not in waiting status: {0}")]
    NotPending(RequestId),
    #[error("Queue item not found or not in using status: {0}")]
    NotOccupying(RequestId),
    #[error("Queue item not found: {0}")]
    NotFound(RequestId),
    #[error(transparent)]
    Directory(DirectoryError),
}

impl Classify for AdmissionError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Invalid(_) => ErrorClass::Validation,
            Self::UnknownRequester(_)
            | Self::NotPending(_)
            | Self::NotOccupying(_)
            | Self::NotFound(_) => ErrorClass::NotFound,
            Self::AlreadyQueued { .. } | Self::Occupied { .. } => ErrorClass::Conflict,
            Self::Directory(e) => e.class(),
        }
    }
}

impl From<DirectoryError> for AdmissionError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound(id) => Self::UnknownRequester(id),
            other => Self::Directory(other),
        }
    }
}

pub struct AdmissionQueue {
    directory: Arc<dyn Directory>,
    ledger: Arc<dyn Ledger>,
    requests: DashMap<RequestId, Request>,
    active: DashMap<UserId, RequestId>,
    slot: OccupancySlot,
    seq: AtomicU64,
    config: QueueConfig,
}

impl AdmissionQueue {
    pub fn new(directory: Arc<dyn Directory>, ledger: Arc<dyn Ledger>) -> Self {
        Self::with_config(directory, ledger, QueueConfig::default())
    }

    pub fn with_config(
        directory: Arc<dyn Directory>,
        ledger: Arc<dyn Ledger>,
        config: QueueConfig,
    ) -> Self {
        Self {
            directory,
            ledger,
            requests: DashMap::new(),
            active: DashMap::new(),
            slot: OccupancySlot::new(),
            seq: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Submit a new pending request for `user_id`.
    ///
    /// The requester's display name and tag are captured now and never
    /// refreshed.
    pub async fn enqueue(
        &self,
        user_id: UserId,
        priority: PriorityClass,
        reason: Option<String>,
    ) -> Result<Request, AdmissionError> {
        let reason = normalize_reason(reason).map_err(AdmissionError::Invalid)?;
        let profile = self.directory.resolve(user_id).await?;

        // Held across the insert and the ledger write so a racing cancel of
        // the new id cannot be recorded ahead of its enqueue.
        let slot = self.slot.lock();
        let request = match self.active.entry(user_id) {
            Entry::Occupied(existing) => {
                let existing = *existing.get();
                tracing::warn!(%user_id, %existing, "Rejected enqueue: user already in queue");
                return Err(AdmissionError::AlreadyQueued {
                    user: user_id,
                    existing,
                });
            }
            Entry::Vacant(claim) => {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                let request = Request::new(user_id, profile, priority, reason, seq);
                self.requests.insert(request.id, request.clone());
                claim.insert(request.id);
                request
            }
        };
        self.record(LedgerEntry::new(LedgerEvent::Enqueued, request.clone()));
        drop(slot);

        tracing::info!(
            request_id = %request.id,
            %user_id,
            %priority,
            "Request enqueued"
        );
        Ok(request)
    }

    /// Pending requests in service order: class first, then creation time.
    ///
    /// Computed fresh on every call from a snapshot; nothing is popped.
    pub fn list_pending(&self) -> Vec<Request> {
        let mut pending: Vec<Request> = self
            .requests
            .iter()
            .filter(|e| e.status == RequestStatus::Pending)
            .map(|e| e.value().clone())
            .collect();
        pending.sort_by_key(Request::queue_key);
        pending.truncate(self.config.pending_cap);
        pending
    }

    /// The next request that would be served, if any.
    pub fn head(&self) -> Option<Request> {
        self.requests
            .iter()
            .filter(|e| e.status == RequestStatus::Pending)
            .min_by_key(|e| e.queue_key())
            .map(|e| e.value().clone())
    }

    pub fn pending_count(&self) -> usize {
        self.requests
            .iter()
            .filter(|e| e.status == RequestStatus::Pending)
            .count()
    }

    /// The request currently holding the resource.
    pub fn current_occupant(&self) -> Option<Request> {
        let slot = self.slot.lock();
        let holder = slot.holder()?;
        self.requests.get(&holder).map(|e| e.value().clone())
    }

    pub fn is_occupied(&self) -> bool {
        self.slot.is_occupied()
    }

    pub fn get(&self, id: RequestId) -> Option<Request> {
        self.requests.get(&id).map(|e| e.value().clone())
    }

    /// Move a pending request into the occupancy slot.
    ///
    /// Fails immediately if anyone holds the slot; the caller picks which
    /// request to start and owns any retry policy.
    pub fn begin_occupancy(&self, id: RequestId) -> Result<Request, AdmissionError> {
        let mut slot = self.slot.lock();
        if let Some(holder) = slot.holder() {
            tracing::warn!(request_id = %id, %holder, "Rejected start: resource already held");
            return Err(AdmissionError::Occupied { holder });
        }

        let started = {
            let mut request = match self.requests.get_mut(&id) {
                Some(r) if r.status == RequestStatus::Pending => r,
                _ => return Err(AdmissionError::NotPending(id)),
            };
            slot.claim(id)
                .map_err(|holder| AdmissionError::Occupied { holder })?;
            request.set_occupying(Utc::now());
            request.clone()
        };
        self.record(LedgerEntry::new(LedgerEvent::Started, started.clone()));
        drop(slot);

        tracing::info!(
            request_id = %id,
            user_id = %started.user_id,
            priority = %started.priority,
            "Occupancy started"
        );
        Ok(started)
    }

    /// Finish the occupying request and free the slot.
    pub fn end_occupancy(&self, id: RequestId) -> Result<Request, AdmissionError> {
        let mut slot = self.slot.lock();

        let finished = {
            let mut request = match self.requests.get_mut(&id) {
                Some(r) if r.status == RequestStatus::Occupying => r,
                _ => return Err(AdmissionError::NotOccupying(id)),
            };
            request.set_finished(Utc::now());
            request.clone()
        };

        if !slot.release(id) {
            tracing::error!(
                request_id = %id,
                holder = ?slot.holder(),
                "Occupying request did not hold the slot"
            );
        }
        self.active
            .remove_if(&finished.user_id, |_, active| *active == id);
        self.record(LedgerEntry::new(LedgerEvent::Finished, finished.clone()));
        drop(slot);

        tracing::info!(
            request_id = %id,
            user_id = %finished.user_id,
            occupancy_secs = ?finished.occupancy().map(|d| d.num_seconds()),
            "Occupancy finished"
        );
        self.prune_history();
        Ok(finished)
    }

    /// Hard-delete a request in any state.
    ///
    /// Cancelling the occupying request frees the slot without writing a
    /// finished record; the ledger entry carries the state it was removed
    /// from.
    pub fn cancel(&self, id: RequestId) -> Result<Request, AdmissionError> {
        let mut slot = self.slot.lock();
        let (_, removed) = self
            .requests
            .remove(&id)
            .ok_or(AdmissionError::NotFound(id))?;

        if removed.status == RequestStatus::Occupying {
            slot.release(id);
            tracing::warn!(
                request_id = %id,
                user_id = %removed.user_id,
                "Occupying request cancelled; resource freed without history"
            );
        }
        if removed.status.is_active() {
            self.active
                .remove_if(&removed.user_id, |_, active| *active == id);
        }
        self.record(LedgerEntry::cancelled(removed.clone()));
        drop(slot);

        tracing::info!(request_id = %id, status = removed.status.as_str(), "Request cancelled");
        Ok(removed)
    }

    /// Most recently finished requests, newest first.
    pub fn history(&self, limit: usize) -> Vec<Request> {
        let mut finished = self.finished();
        finished.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then(b.seq.cmp(&a.seq)));
        finished.truncate(limit.min(self.config.history_cap));
        finished
    }

    fn finished(&self) -> Vec<Request> {
        self.requests
            .iter()
            .filter(|e| e.status == RequestStatus::Finished)
            .map(|e| e.value().clone())
            .collect()
    }

    fn prune_history(&self) {
        let mut finished: Vec<(chrono::DateTime<Utc>, u64, RequestId)> = self
            .requests
            .iter()
            .filter(|e| e.status == RequestStatus::Finished)
            .filter_map(|e| Some((e.completed_at?, e.seq, e.id)))
            .collect();

        let Some(excess) = finished
            .len()
            .checked_sub(self.config.history_retention)
            .filter(|n| *n > 0)
        else {
            return;
        };

        finished.sort();
        for (_, _, id) in finished.into_iter().take(excess) {
            self.requests
                .remove_if(&id, |_, r| r.status == RequestStatus::Finished);
        }
        tracing::debug!(pruned = excess, "Pruned finished requests");
    }

    fn record(&self, entry: LedgerEntry) {
        if let Err(e) = self.ledger.record(&entry) {
            tracing::error!(
                error = %e,
                request_id = %entry.request.id,
                event = ?entry.event,
                "Failed to record ledger entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{IdentityTag, InMemoryDirectory, Profile};
    use crate::ledger::{LedgerError, TracingLedger};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::{Condvar, Mutex};

    /// Resolves every id, so tests can use more users than there are tags.
    struct OpenDirectory;

    #[async_trait]
    impl Directory for OpenDirectory {
        async fn resolve(&self, id: UserId) -> Result<Profile, DirectoryError> {
            Ok(Profile {
                display_name: format!("user-{}", &id.to_string()[..8]),
                tag: IdentityTag::Red,
            })
        }

        async fn is_tag_in_use(&self, _tag: IdentityTag) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct RecordingLedger {
        entries: Mutex<Vec<(LedgerEvent, RequestId)>>,
    }

    impl RecordingLedger {
        fn events(&self) -> Vec<LedgerEvent> {
            self.entries.lock().unwrap().iter().map(|(e, _)| *e).collect()
        }
    }

    impl Ledger for RecordingLedger {
        fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
            self.entries
                .lock()
                .unwrap()
                .push((entry.event, entry.request.id));
            Ok(())
        }
    }

    struct BrokenLedger;

    impl Ledger for BrokenLedger {
        fn record(&self, _entry: &LedgerEntry) -> Result<(), LedgerError> {
            Err(LedgerError::Write(std::io::Error::other("disk full")))
        }
    }

    /// Records events in write order, parking `Started` writes until the
    /// gate opens.
    #[derive(Default)]
    struct GatedLedger {
        events: Mutex<Vec<LedgerEvent>>,
        parked: AtomicBool,
        open: Mutex<bool>,
        opened: Condvar,
    }

    impl GatedLedger {
        fn open_gate(&self) {
            *self.open.lock().unwrap() = true;
            self.opened.notify_all();
        }
    }

    impl Ledger for GatedLedger {
        fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
            if entry.event == LedgerEvent::Started {
                self.parked.store(true, Ordering::SeqCst);
                let mut open = self.open.lock().unwrap();
                while !*open {
                    open = self.opened.wait(open).unwrap();
                }
            }
            self.events.lock().unwrap().push(entry.event);
            Ok(())
        }
    }

    fn open_queue() -> AdmissionQueue {
        AdmissionQueue::new(Arc::new(OpenDirectory), Arc::new(TracingLedger))
    }

    #[tokio::test]
    async fn scenario_priority_order_and_exclusive_occupancy() {
        let queue = open_queue();
        let a = queue
            .enqueue(UserId::new(), PriorityClass::Health, None)
            .await
            .unwrap();
        let b = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();
        let c = queue
            .enqueue(UserId::new(), PriorityClass::Emergency, None)
            .await
            .unwrap();

        let order: Vec<RequestId> = queue.list_pending().iter().map(|r| r.id).collect();
        assert_eq!(order, vec![c.id, b.id, a.id]);
        assert_eq!(queue.head().map(|r| r.id), Some(c.id));

        queue.begin_occupancy(c.id).unwrap();
        assert_eq!(
            queue.begin_occupancy(b.id),
            Err(AdmissionError::Occupied { holder: c.id })
        );

        let finished = queue.end_occupancy(c.id).unwrap();
        assert_eq!(finished.status, RequestStatus::Finished);

        let history = queue.history(1);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, c.id);
        assert!(history[0].completed_at.is_some());
        assert!(history[0].started_at.is_some());
    }

    #[tokio::test]
    async fn emergency_outranks_any_number_of_older_requests() {
        let queue = open_queue();
        for _ in 0..10 {
            queue
                .enqueue(UserId::new(), PriorityClass::Work, None)
                .await
                .unwrap();
        }
        let urgent = queue
            .enqueue(UserId::new(), PriorityClass::Emergency, None)
            .await
            .unwrap();

        assert_eq!(queue.list_pending()[0].id, urgent.id);
    }

    #[tokio::test]
    async fn same_class_is_fifo() {
        let queue = open_queue();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(
                queue
                    .enqueue(UserId::new(), PriorityClass::Health, None)
                    .await
                    .unwrap()
                    .id,
            );
        }

        let order: Vec<RequestId> = queue.list_pending().iter().map(|r| r.id).collect();
        assert_eq!(order, ids);
    }

    #[tokio::test]
    async fn list_pending_excludes_occupying_and_finished() {
        let queue = open_queue();
        let first = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();
        let second = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();

        queue.begin_occupancy(first.id).unwrap();
        let pending: Vec<RequestId> = queue.list_pending().iter().map(|r| r.id).collect();
        assert_eq!(pending, vec![second.id]);
        assert_eq!(queue.pending_count(), 1);

        queue.end_occupancy(first.id).unwrap();
        assert_eq!(queue.list_pending().len(), 1);
    }

    #[tokio::test]
    async fn list_pending_respects_cap() {
        let queue = AdmissionQueue::with_config(
            Arc::new(OpenDirectory),
            Arc::new(TracingLedger),
            QueueConfig {
                pending_cap: 3,
                ..Default::default()
            },
        );
        for _ in 0..5 {
            queue
                .enqueue(UserId::new(), PriorityClass::Health, None)
                .await
                .unwrap();
        }
        let urgent = queue
            .enqueue(UserId::new(), PriorityClass::Emergency, None)
            .await
            .unwrap();

        let pending = queue.list_pending();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].id, urgent.id);
        assert_eq!(queue.pending_count(), 6);
    }

    #[tokio::test]
    async fn unknown_requester_is_not_found() {
        let directory = Arc::new(InMemoryDirectory::new());
        let queue = AdmissionQueue::new(directory, Arc::new(TracingLedger));
        let ghost = UserId::new();

        let err = queue
            .enqueue(ghost, PriorityClass::Work, None)
            .await
            .unwrap_err();
        assert_eq!(err, AdmissionError::UnknownRequester(ghost));
        assert_eq!(err.class(), ErrorClass::NotFound);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn snapshot_is_not_refreshed_after_user_changes() {
        let directory = Arc::new(InMemoryDirectory::new());
        let user = directory.create_user("Ada", IdentityTag::Purple).unwrap();
        let queue = AdmissionQueue::new(directory.clone(), Arc::new(TracingLedger));

        let request = queue
            .enqueue(user.id, PriorityClass::Work, Some("meeting".to_string()))
            .await
            .unwrap();
        directory.delete_user(user.id).unwrap();

        let stored = queue.get(request.id).unwrap();
        assert_eq!(stored.user_name, "Ada");
        assert_eq!(stored.user_color, IdentityTag::Purple);
        assert_eq!(stored.reason.as_deref(), Some("meeting"));
    }

    #[tokio::test]
    async fn duplicate_active_request_conflicts_until_finished() {
        let queue = open_queue();
        let user = UserId::new();
        let first = queue
            .enqueue(user, PriorityClass::Health, None)
            .await
            .unwrap();

        let err = queue
            .enqueue(user, PriorityClass::Emergency, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AdmissionError::AlreadyQueued {
                user,
                existing: first.id
            }
        );
        assert_eq!(err.class(), ErrorClass::Conflict);

        queue.begin_occupancy(first.id).unwrap();
        assert!(queue.enqueue(user, PriorityClass::Work, None).await.is_err());

        queue.end_occupancy(first.id).unwrap();
        assert!(queue.enqueue(user, PriorityClass::Work, None).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_clears_active_claim() {
        let queue = open_queue();
        let user = UserId::new();
        let first = queue.enqueue(user, PriorityClass::Work, None).await.unwrap();

        queue.cancel(first.id).unwrap();
        assert!(queue.get(first.id).is_none());
        assert!(queue.enqueue(user, PriorityClass::Work, None).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_reason_rejected_before_any_effect() {
        let queue = open_queue();
        let err = queue
            .enqueue(
                UserId::new(),
                PriorityClass::Work,
                Some("x".repeat(crate::request::MAX_REASON_LEN + 1)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn begin_requires_pending_target() {
        let queue = open_queue();
        let missing = RequestId::new();
        assert_eq!(
            queue.begin_occupancy(missing),
            Err(AdmissionError::NotPending(missing))
        );

        let req = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();
        queue.begin_occupancy(req.id).unwrap();
        queue.end_occupancy(req.id).unwrap();

        // Finished requests cannot re-enter the slot.
        assert_eq!(
            queue.begin_occupancy(req.id),
            Err(AdmissionError::NotPending(req.id))
        );
        assert!(!queue.is_occupied());
    }

    #[tokio::test]
    async fn begin_on_occupied_conflicts_even_for_holder() {
        let queue = open_queue();
        let req = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();
        queue.begin_occupancy(req.id).unwrap();

        let err = queue.begin_occupancy(req.id).unwrap_err();
        assert_eq!(err, AdmissionError::Occupied { holder: req.id });
        assert_eq!(err.class(), ErrorClass::Conflict);
    }

    #[tokio::test]
    async fn end_on_non_occupying_leaves_slot_alone() {
        let queue = open_queue();
        let holder = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();
        let waiting = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();
        queue.begin_occupancy(holder.id).unwrap();

        assert_eq!(
            queue.end_occupancy(waiting.id),
            Err(AdmissionError::NotOccupying(waiting.id))
        );
        assert_eq!(
            queue.end_occupancy(RequestId::new()).unwrap_err().class(),
            ErrorClass::NotFound
        );
        assert_eq!(queue.current_occupant().map(|r| r.id), Some(holder.id));
        assert_eq!(queue.get(waiting.id).unwrap().status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn current_occupant_tracks_slot() {
        let queue = open_queue();
        assert!(queue.current_occupant().is_none());

        let req = queue
            .enqueue(UserId::new(), PriorityClass::Health, None)
            .await
            .unwrap();
        let started = queue.begin_occupancy(req.id).unwrap();
        let occupant = queue.current_occupant().unwrap();
        assert_eq!(occupant.id, req.id);
        assert_eq!(occupant.status, RequestStatus::Occupying);
        assert_eq!(occupant.started_at, started.started_at);

        queue.end_occupancy(req.id).unwrap();
        assert!(queue.current_occupant().is_none());
    }

    #[tokio::test]
    async fn cancel_occupying_frees_slot_without_history() {
        let ledger = Arc::new(RecordingLedger::default());
        let queue = AdmissionQueue::new(Arc::new(OpenDirectory), ledger.clone());
        let holder = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();
        let next = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();
        queue.begin_occupancy(holder.id).unwrap();

        let removed = queue.cancel(holder.id).unwrap();
        assert_eq!(removed.status, RequestStatus::Occupying);
        assert!(!queue.is_occupied());
        assert!(queue.history(50).is_empty());

        queue.begin_occupancy(next.id).unwrap();
        assert_eq!(
            ledger.events(),
            vec![
                LedgerEvent::Enqueued,
                LedgerEvent::Enqueued,
                LedgerEvent::Started,
                LedgerEvent::Cancelled,
                LedgerEvent::Started,
            ]
        );
    }

    #[tokio::test]
    async fn cancel_unknown_is_not_found() {
        let queue = open_queue();
        let id = RequestId::new();
        let err = queue.cancel(id).unwrap_err();
        assert_eq!(err, AdmissionError::NotFound(id));
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn cancel_finished_removes_history_entry() {
        let queue = open_queue();
        let req = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();
        queue.begin_occupancy(req.id).unwrap();
        queue.end_occupancy(req.id).unwrap();

        queue.cancel(req.id).unwrap();
        assert!(queue.history(50).is_empty());
    }

    #[tokio::test]
    async fn history_is_newest_first_and_capped() {
        let queue = AdmissionQueue::with_config(
            Arc::new(OpenDirectory),
            Arc::new(TracingLedger),
            QueueConfig {
                history_cap: 3,
                ..Default::default()
            },
        );
        let mut finished = Vec::new();
        for _ in 0..5 {
            let req = queue
                .enqueue(UserId::new(), PriorityClass::Health, None)
                .await
                .unwrap();
            queue.begin_occupancy(req.id).unwrap();
            queue.end_occupancy(req.id).unwrap();
            finished.push(req.id);
        }

        let history: Vec<RequestId> = queue.history(50).iter().map(|r| r.id).collect();
        assert_eq!(history, vec![finished[4], finished[3], finished[2]]);
        assert_eq!(queue.history(1).len(), 1);
        assert!(queue.history(0).is_empty());
    }

    #[tokio::test]
    async fn history_retention_prunes_oldest() {
        let queue = AdmissionQueue::with_config(
            Arc::new(OpenDirectory),
            Arc::new(TracingLedger),
            QueueConfig {
                history_retention: 2,
                ..Default::default()
            },
        );
        let mut finished = Vec::new();
        for _ in 0..4 {
            let req = queue
                .enqueue(UserId::new(), PriorityClass::Work, None)
                .await
                .unwrap();
            queue.begin_occupancy(req.id).unwrap();
            queue.end_occupancy(req.id).unwrap();
            finished.push(req.id);
        }

        let kept: Vec<RequestId> = queue.history(50).iter().map(|r| r.id).collect();
        assert_eq!(kept, vec![finished[3], finished[2]]);
        assert!(queue.get(finished[0]).is_none());
    }

    #[tokio::test]
    async fn ledger_failure_does_not_fail_operation() {
        let queue = AdmissionQueue::new(Arc::new(OpenDirectory), Arc::new(BrokenLedger));
        let req = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();
        assert!(queue.begin_occupancy(req.id).is_ok());
        assert!(queue.end_occupancy(req.id).is_ok());
    }

    #[tokio::test]
    async fn concurrent_begins_on_distinct_requests_have_one_winner() {
        let queue = open_queue();
        let mut ids = Vec::new();
        for _ in 0..16 {
            ids.push(
                queue
                    .enqueue(UserId::new(), PriorityClass::Work, None)
                    .await
                    .unwrap()
                    .id,
            );
        }

        let barrier = std::sync::Barrier::new(ids.len());
        let results: Vec<Result<Request, AdmissionError>> = std::thread::scope(|s| {
            let handles: Vec<_> = ids
                .iter()
                .map(|id| {
                    let queue = &queue;
                    let barrier = &barrier;
                    let id = *id;
                    s.spawn(move || {
                        barrier.wait();
                        queue.begin_occupancy(id)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners: Vec<&Request> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, AdmissionError::Occupied { .. }))
        );

        let occupying = ids
            .iter()
            .filter_map(|id| queue.get(*id))
            .filter(|r| r.status == RequestStatus::Occupying)
            .count();
        assert_eq!(occupying, 1);
        assert_eq!(queue.current_occupant().map(|r| r.id), Some(winners[0].id));
    }

    #[tokio::test]
    async fn concurrent_begins_on_same_request_have_one_winner() {
        let queue = open_queue();
        let req = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();

        let barrier = std::sync::Barrier::new(8);
        let wins = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let queue = &queue;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        queue.begin_occupancy(req.id).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });

        assert_eq!(wins, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueues_by_same_user_admit_one() {
        let queue = Arc::new(open_queue());
        let user = UserId::new();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            tasks.spawn(async move { queue.enqueue(user, PriorityClass::Work, None).await });
        }

        let mut admitted = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(_) => admitted += 1,
                Err(e) => assert!(matches!(e, AdmissionError::AlreadyQueued { .. })),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(queue.pending_count(), 1);
    }

    #[tokio::test]
    async fn ledger_records_in_commit_order() {
        let ledger = Arc::new(GatedLedger::default());
        let queue = AdmissionQueue::new(Arc::new(OpenDirectory), ledger.clone());
        let req = queue
            .enqueue(UserId::new(), PriorityClass::Work, None)
            .await
            .unwrap();

        let ended = std::thread::scope(|s| {
            let starter = s.spawn(|| queue.begin_occupancy(req.id));
            while !ledger.parked.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
            // The start has committed but its ledger write is parked.
            assert!(queue.is_occupied());

            let ender = s.spawn(|| queue.end_occupancy(req.id));
            std::thread::sleep(std::time::Duration::from_millis(50));
            ledger.open_gate();

            starter.join().unwrap().unwrap();
            ender.join().unwrap()
        });

        assert!(ended.is_ok());
        assert_eq!(
            *ledger.events.lock().unwrap(),
            vec![
                LedgerEvent::Enqueued,
                LedgerEvent::Started,
                LedgerEvent::Finished,
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reads_see_whole_records_under_concurrent_writes() {
        let queue = Arc::new(open_queue());
        let holders = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));

        let mut readers = tokio::task::JoinSet::new();
        for _ in 0..3 {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            readers.spawn(async move {
                let mut reads = 0usize;
                loop {
                    let pending = queue.list_pending();
                    for r in &pending {
                        assert_eq!(r.status, RequestStatus::Pending);
                        assert!(r.started_at.is_none());
                        assert!(r.completed_at.is_none());
                    }
                    assert!(
                        pending
                            .windows(2)
                            .all(|w| w[0].queue_key() <= w[1].queue_key())
                    );

                    if let Some(occupant) = queue.current_occupant() {
                        assert_eq!(occupant.status, RequestStatus::Occupying);
                        assert!(occupant.started_at.is_some());
                        assert!(occupant.completed_at.is_none());
                    }

                    for r in queue.history(50) {
                        assert_eq!(r.status, RequestStatus::Finished);
                        let (Some(started), Some(completed)) = (r.started_at, r.completed_at)
                        else {
                            panic!("finished request missing timestamps: {}", r.id);
                        };
                        assert!(started <= completed);
                    }

                    reads += 1;
                    if done.load(Ordering::SeqCst) {
                        break reads;
                    }
                    tokio::task::yield_now().await;
                }
            });
        }

        let mut writers = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            let holders = Arc::clone(&holders);
            writers.spawn(async move {
                let user = UserId::new();
                for round in 0..200 {
                    let priority = PriorityClass::ALL[round % PriorityClass::ALL.len()];
                    let req = queue.enqueue(user, priority, None).await.unwrap();
                    if round % 4 == 0 {
                        queue.cancel(req.id).unwrap();
                        continue;
                    }
                    match queue.begin_occupancy(req.id) {
                        Ok(_) => {
                            assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                            tokio::task::yield_now().await;
                            holders.fetch_sub(1, Ordering::SeqCst);
                            if round % 4 == 1 {
                                queue.cancel(req.id).unwrap();
                            } else {
                                queue.end_occupancy(req.id).unwrap();
                            }
                        }
                        Err(AdmissionError::Occupied { .. }) => {
                            queue.cancel(req.id).unwrap();
                        }
                        Err(e) => panic!("unexpected start failure: {e}"),
                    }
                }
            });
        }

        while let Some(result) = writers.join_next().await {
            result.unwrap();
        }
        done.store(true, Ordering::SeqCst);
        while let Some(result) = readers.join_next().await {
            assert!(result.unwrap() > 0);
        }

        assert!(!queue.is_occupied());
        assert_eq!(queue.pending_count(), 0);
    }
}
