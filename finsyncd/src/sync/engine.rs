use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use finsync_core::{
    ApiErrorClass, Budget, EntityKind, Expense, Record, SavingsGoal, Transaction,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::network::ConnectivityProbe;
use super::queue::{OperationType, PendingSyncItem, QueueError, now_millis};
use super::remote::RemoteDataService;
use super::status::{SyncStatus, SyncStatusTracker, SyncStatusUpdate};
use super::store::{LocalStore, SYNC_STATUS_KEY, StoreError};

pub const OFFLINE_ERROR: &str = "no connectivity";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no connectivity: sync pass not started")]
    Offline,
    #[error("a sync pass is in progress")]
    SyncInProgress,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub applied: usize,
    pub failed: usize,
    /// Failures the remote will refuse again unless the record changes.
    pub rejected: usize,
    /// The remote refused the credentials; the pass stopped at that item.
    pub auth_rejected: bool,
    pub remaining: usize,
    pub refreshed: bool,
    pub finished_at: i64,
}

impl SyncReport {
    /// Every queued item applied and the cache refresh went through.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.refreshed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another pass held the engine; this request was ignored.
    AlreadyRunning,
}

pub struct SyncEngine<R, P> {
    store: LocalStore,
    remote: R,
    probe: P,
    status: Arc<SyncStatusTracker>,
    pass_lock: Mutex<()>,
}

impl<R, P> SyncEngine<R, P>
where
    R: RemoteDataService,
    P: ConnectivityProbe,
{
    pub fn new(store: LocalStore, remote: R, probe: P) -> Self {
        Self {
            store,
            remote,
            probe,
            status: SyncStatusTracker::new(SyncStatus::default()),
            pass_lock: Mutex::new(()),
        }
    }

    /// Builds an engine whose status picks up where the previous process
    /// left off. A persisted in-flight flag is discarded.
    pub async fn open(store: LocalStore, remote: R, probe: P) -> Result<Self, EngineError> {
        let engine = Self::new(store, remote, probe);
        let (pending, flagged) = engine.store.pending_counts().await?;
        let persisted = engine.store.get_json::<SyncStatus>(SYNC_STATUS_KEY).await?;
        let mut status = persisted.unwrap_or_else(|| SyncStatus {
            failed_count: flagged,
            ..SyncStatus::default()
        });
        status.is_syncing = false;
        status.pending_count = pending;
        if status.last_successful_sync.is_none() {
            status.last_successful_sync = engine.store.get_last_sync().await?;
        }
        engine.status.replace(status);
        Ok(engine)
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn status(&self) -> &Arc<SyncStatusTracker> {
        &self.status
    }

    /// Writes the record to the local cache and queues it for the remote.
    pub async fn save_record<T: Record>(&self, record: T) -> Result<PendingSyncItem, EngineError> {
        record.validate().map_err(StoreError::from)?;
        let mut items = self.store.load::<T>().await?;
        let item = match items.iter_mut().find(|cached| cached.id() == record.id()) {
            Some(slot) => {
                let item = PendingSyncItem::update(&record)?;
                *slot = record;
                item
            }
            None => {
                let item = PendingSyncItem::create(&record)?;
                items.push(record);
                item
            }
        };
        self.store.commit_local_change(&items, &item).await?;
        self.queued(&item).await?;
        Ok(item)
    }

    /// Removes the record from the local cache and queues the remote delete.
    pub async fn delete_record<T: Record>(&self, id: &str) -> Result<PendingSyncItem, EngineError> {
        let mut items = self.store.load::<T>().await?;
        items.retain(|cached| cached.id() != id);
        let item = PendingSyncItem::delete(T::KIND, id);
        self.store.commit_local_change(&items, &item).await?;
        self.queued(&item).await?;
        Ok(item)
    }

    async fn queued(&self, item: &PendingSyncItem) -> Result<(), EngineError> {
        let (pending, _) = self.store.pending_counts().await?;
        debug!(
            item = %item.id,
            entity = item.entity.as_str(),
            op = item.op.as_str(),
            record = %item.record_id,
            "queued pending operation"
        );
        self.status.update(SyncStatusUpdate {
            pending_count: Some(pending),
            ..Default::default()
        });
        self.persist_status().await
    }

    pub async fn perform_full_sync(&self) -> Result<SyncOutcome, EngineError> {
        let Ok(_pass) = self.pass_lock.try_lock() else {
            debug!("sync pass already running, request ignored");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let online = self.probe.is_online().await;
        self.store.set_online(online).await?;
        if !online {
            warn!("sync requested while offline");
            self.status.update(SyncStatusUpdate {
                error: Some(Some(OFFLINE_ERROR.to_string())),
                ..Default::default()
            });
            self.persist_status().await?;
            return Err(EngineError::Offline);
        }

        match self.run_pass().await {
            Ok(report) => Ok(SyncOutcome::Completed(report)),
            Err(err) => {
                warn!(error = %err, "sync pass aborted");
                self.status.update(SyncStatusUpdate {
                    is_syncing: Some(false),
                    error: Some(Some(err.to_string())),
                    ..Default::default()
                });
                if let Err(persist_err) = self.persist_status().await {
                    warn!(error = %persist_err, "failed to persist sync status");
                }
                Err(err)
            }
        }
    }

    async fn run_pass(&self) -> Result<SyncReport, EngineError> {
        let queue = self.store.get_pending_sync().await?;
        let total = queue.len();
        info!(pending = total, "sync pass started");
        self.status.update(SyncStatusUpdate {
            is_syncing: Some(true),
            last_sync_attempt: Some(Some(now_millis())),
            pending_count: Some(total),
            sync_progress: Some(0.0),
            error: Some(None),
            ..Default::default()
        });

        let mut report = SyncReport {
            attempted: 0,
            applied: 0,
            failed: 0,
            rejected: 0,
            auth_rejected: false,
            remaining: total,
            refreshed: false,
            finished_at: 0,
        };
        let mut failed_count = self.status.snapshot().failed_count;
        let mut last_error = None;

        for (index, item) in queue.iter().enumerate() {
            report.attempted += 1;
            match self.remote.apply(item).await {
                Ok(authoritative) => {
                    self.store.remove_pending(&item.id).await?;
                    if item.failed {
                        failed_count = failed_count.saturating_sub(1);
                    }
                    if self
                        .store
                        .has_pending_for(item.entity, &item.record_id)
                        .await?
                    {
                        debug!(
                            entity = item.entity.as_str(),
                            record = %item.record_id,
                            "newer local change queued, cache left as is"
                        );
                    } else {
                        self.reconcile(item, authoritative).await?;
                    }
                    report.applied += 1;
                }
                Err(err) => {
                    let class = err.classification();
                    warn!(
                        item = %item.id,
                        entity = item.entity.as_str(),
                        op = item.op.as_str(),
                        record = %item.record_id,
                        class = ?class,
                        retryable = err.is_retryable(),
                        error = %err,
                        "pending operation failed"
                    );
                    let message = err.to_string();
                    self.store.mark_pending_failed(&item.id, &message).await?;
                    if !item.failed {
                        failed_count += 1;
                    }
                    report.failed += 1;
                    match class {
                        Some(ApiErrorClass::Permanent) => report.rejected += 1,
                        Some(ApiErrorClass::Auth) => report.auth_rejected = true,
                        _ => {}
                    }
                    last_error = Some(message);
                }
            }

            let (pending, _) = self.store.pending_counts().await?;
            report.remaining = pending;
            self.status.update(SyncStatusUpdate {
                pending_count: Some(pending),
                failed_count: Some(failed_count),
                sync_progress: Some((index + 1) as f64 / total as f64),
                error: last_error.clone().map(Some),
                ..Default::default()
            });
            if report.auth_rejected {
                warn!(
                    skipped = total - index - 1,
                    "remote refused credentials, stopping sync pass"
                );
                break;
            }
        }

        let remaining = self.store.get_pending_sync().await?;
        if !report.auth_rejected {
            match self.refresh_cache(&remaining).await? {
                Some(err) => last_error = last_error.or(Some(err)),
                None => report.refreshed = true,
            }
        }

        report.remaining = remaining.len();
        report.finished_at = now_millis();
        let mut finish = SyncStatusUpdate {
            is_syncing: Some(false),
            pending_count: Some(report.remaining),
            failed_count: Some(failed_count),
            sync_progress: Some(1.0),
            error: Some(last_error),
            ..Default::default()
        };
        if report.is_success() {
            let stored = self.store.set_last_sync(report.finished_at).await?;
            finish.last_successful_sync = Some(Some(stored));
        }
        self.status.update(finish);
        self.persist_status().await?;

        info!(
            applied = report.applied,
            failed = report.failed,
            rejected = report.rejected,
            remaining = report.remaining,
            refreshed = report.refreshed,
            "sync pass finished"
        );
        Ok(report)
    }

    async fn reconcile(
        &self,
        item: &PendingSyncItem,
        authoritative: Option<Value>,
    ) -> Result<(), StoreError> {
        match item.op {
            OperationType::Delete => {
                match item.entity {
                    EntityKind::Budget => self.store.remove_record::<Budget>(&item.record_id).await?,
                    EntityKind::Expense => {
                        self.store.remove_record::<Expense>(&item.record_id).await?
                    }
                    EntityKind::Savings => {
                        self.store
                            .remove_record::<SavingsGoal>(&item.record_id)
                            .await?
                    }
                    EntityKind::Transaction => {
                        self.store
                            .remove_record::<Transaction>(&item.record_id)
                            .await?
                    }
                };
                Ok(())
            }
            OperationType::Create | OperationType::Update => {
                let Some(value) = authoritative.or_else(|| item.data.clone()) else {
                    return Ok(());
                };
                match item.entity {
                    EntityKind::Budget => self.cache_remote_row::<Budget>(value).await,
                    EntityKind::Expense => self.cache_remote_row::<Expense>(value).await,
                    EntityKind::Savings => self.cache_remote_row::<SavingsGoal>(value).await,
                    EntityKind::Transaction => {
                        self.cache_remote_row::<Transaction>(value).await
                    }
                }
            }
        }
    }

    async fn cache_remote_row<T: Record>(&self, value: Value) -> Result<(), StoreError> {
        let record: T = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                warn!(entity = T::KIND.as_str(), error = %err, "remote row is unreadable");
                return Ok(());
            }
        };
        match self.store.upsert_record(record).await {
            Ok(_) => Ok(()),
            Err(StoreError::Validation(err)) => {
                warn!(entity = T::KIND.as_str(), error = %err, "remote row failed validation");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Pulls every collection from the remote. Records with operations still
    /// queued keep their local version. Returns the first fetch error.
    async fn refresh_cache(
        &self,
        remaining: &[PendingSyncItem],
    ) -> Result<Option<String>, StoreError> {
        let mut pending_ids: HashMap<EntityKind, HashSet<&str>> = HashMap::new();
        for item in remaining {
            pending_ids
                .entry(item.entity)
                .or_default()
                .insert(item.record_id.as_str());
        }

        let mut first_error = None;
        for kind in EntityKind::ALL {
            let rows = match self.remote.fetch_all(kind).await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(entity = kind.as_str(), error = %err, "cache refresh failed");
                    first_error.get_or_insert_with(|| err.to_string());
                    continue;
                }
            };
            let keep_local = pending_ids.remove(&kind).unwrap_or_default();
            match kind {
                EntityKind::Budget => self.merge_collection::<Budget>(rows, &keep_local).await?,
                EntityKind::Expense => self.merge_collection::<Expense>(rows, &keep_local).await?,
                EntityKind::Savings => {
                    self.merge_collection::<SavingsGoal>(rows, &keep_local)
                        .await?
                }
                EntityKind::Transaction => {
                    self.merge_collection::<Transaction>(rows, &keep_local)
                        .await?
                }
            }
        }
        Ok(first_error)
    }

    async fn merge_collection<T: Record>(
        &self,
        rows: Vec<Value>,
        keep_local: &HashSet<&str>,
    ) -> Result<(), StoreError> {
        let local = self.store.load::<T>().await?;
        let mut merged: Vec<T> = local
            .into_iter()
            .filter(|record| keep_local.contains(record.id()))
            .collect();
        let mut seen: HashSet<String> = merged.iter().map(|r| r.id().to_string()).collect();

        for row in rows {
            let record: T = match serde_json::from_value(row) {
                Ok(record) => record,
                Err(err) => {
                    warn!(entity = T::KIND.as_str(), error = %err, "skipping unreadable remote row");
                    continue;
                }
            };
            if let Err(err) = record.validate() {
                warn!(entity = T::KIND.as_str(), id = record.id(), error = %err, "skipping invalid remote row");
                continue;
            }
            if keep_local.contains(record.id()) || !seen.insert(record.id().to_string()) {
                continue;
            }
            merged.push(record);
        }

        // Records deleted locally but not yet confirmed stay deleted.
        self.store.save(&merged).await
    }

    /// Clears failure flags so flagged items count as fresh on the next pass.
    pub async fn reset_failed_sync_items(&self) -> Result<u64, EngineError> {
        let reset = self.store.reset_failed_pending().await?;
        let (pending, _) = self.store.pending_counts().await?;
        info!(reset, "failed sync items reset");
        self.status.update(SyncStatusUpdate {
            pending_count: Some(pending),
            failed_count: Some(0),
            error: Some(None),
            ..Default::default()
        });
        self.persist_status().await?;
        Ok(reset)
    }

    /// Direct status mutation for test harnesses and failure simulation.
    pub async fn update_sync_status(&self, patch: SyncStatusUpdate) -> Result<SyncStatus, EngineError> {
        let status = self.status.update(patch);
        self.persist_status().await?;
        Ok(status)
    }

    pub async fn clear_all_offline_data(&self) -> Result<(), EngineError> {
        let Ok(_pass) = self.pass_lock.try_lock() else {
            return Err(EngineError::SyncInProgress);
        };
        self.store.clear_all_offline_data().await?;
        info!("offline data cleared");
        self.status.replace(SyncStatus::default());
        Ok(())
    }

    async fn persist_status(&self) -> Result<(), EngineError> {
        let snapshot = self.status.snapshot();
        self.store.set_json(SYNC_STATUS_KEY, &snapshot).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
