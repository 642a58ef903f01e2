//! Sync coordinator
//!
//! Routes every read and write through the remote gateway when online and
//! falls back to the local store when not. Writes that cannot reach the
//! server are queued; `sync` replays the queue.

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::SnapshotCache;
use super::retry::RetryPolicy;
use crate::client::RemoteGateway;
use crate::collection::{Collection, Query};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{GatewayError, SyncError, SyncResult};
use crate::queue::{PendingMutation, PendingQueue};
use crate::storage::{DurableStore, Record, RecordId};

/// Result of a `submit`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Submitted {
    /// Confirmed by the server.
    Synced { record: Record },
    /// Held locally until the next drain; the entry is the placeholder.
    Queued { entry: PendingMutation },
}

impl Submitted {
    pub fn is_synced(&self) -> bool {
        matches!(self, Submitted::Synced { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FetchSource {
    Live,
    Cache { fetched_at: i64 },
    /// Offline with nothing cached yet.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fetched {
    pub records: Vec<Record>,
    pub source: FetchSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainError {
    pub local_id: u64,
    pub target: Collection,
    pub attempts: u32,
    pub message: String,
}

/// Summary of one drain cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub still_pending: usize,
    pub errors: Vec<DrainError>,
    pub started_at: i64,
    pub finished_at: i64,
}

impl DrainReport {
    /// False when nothing reached the server.
    pub fn changed(&self) -> bool {
        self.succeeded > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another drain was in flight; this trigger was skipped.
    AlreadyRunning,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub draining: bool,
    pub pending: usize,
    pub last_drain_at: Option<i64>,
    pub last_report: Option<DrainReport>,
}

pub struct SyncCoordinator {
    store: Arc<dyn DurableStore>,
    gateway: Arc<dyn RemoteGateway>,
    monitor: Arc<ConnectivityMonitor>,
    queue: PendingQueue,
    cache: SnapshotCache,
    policy: RetryPolicy,
    /// Single-flight guard for `sync`
    drain_lock: Mutex<()>,
    draining: AtomicBool,
    last_report: SyncMutex<Option<DrainReport>>,
    cache_writes: SyncMutex<Vec<JoinHandle<()>>>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn DurableStore>,
        gateway: Arc<dyn RemoteGateway>,
        monitor: Arc<ConnectivityMonitor>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue: PendingQueue::new(store.clone()),
            cache: SnapshotCache::new(store.clone()),
            store,
            gateway,
            monitor,
            policy,
            drain_lock: Mutex::new(()),
            draining: AtomicBool::new(false),
            last_report: SyncMutex::new(None),
            cache_writes: SyncMutex::new(Vec::new()),
        }
    }

    /// Open the store and fold legacy pending stores into the queue.
    pub async fn initialize(&self) -> SyncResult<()> {
        self.store.open().await?;
        self.queue.import_legacy().await?;
        Ok(())
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Create a record. Never loses the write: if the server cannot take it
    /// now it is queued and the queue entry is returned as a placeholder.
    /// Fails only when the write can be neither sent nor queued.
    pub async fn submit(&self, collection: Collection, record: Record) -> SyncResult<Submitted> {
        if !collection.accepts_creates() {
            return Err(SyncError::InvalidRecord(format!(
                "'{}' does not accept creates",
                collection
            )));
        }

        let payload = without_id(record);
        let key = Uuid::new_v4();

        if self.monitor.is_online() {
            match self.gateway.create(collection, &payload, key).await {
                Ok(record) => {
                    debug!("Created {} record online", collection);
                    return Ok(Submitted::Synced { record });
                }
                Err(e) => {
                    warn!("Online create to {} failed, queueing: {}", collection, e);
                }
            }
        }

        let entry = self.queue.enqueue_with_key(collection, payload, key).await?;
        Ok(Submitted::Queued { entry })
    }

    /// Read from the server when online, caching the result; otherwise serve
    /// the last cached snapshot.
    pub async fn fetch(&self, collection: Collection, query: &Query) -> SyncResult<Fetched> {
        if !self.monitor.is_online() {
            return Ok(self.cached_or_empty(collection, query).await);
        }

        match self.gateway.read(collection, query).await {
            Ok(records) => {
                self.spawn_cache_write(collection, query.clone(), records.clone());
                Ok(Fetched {
                    records,
                    source: FetchSource::Live,
                })
            }
            Err(e) => {
                warn!("Read of {} failed, trying cache: {}", collection, e);
                match self.cache.load(collection, query).await {
                    Ok(Some(snapshot)) => Ok(Fetched {
                        records: snapshot.records,
                        source: FetchSource::Cache {
                            fetched_at: snapshot.fetched_at,
                        },
                    }),
                    Ok(None) => Err(SyncError::RemoteFailure(e)),
                    Err(cache_err) => {
                        warn!("Cache lookup for {} failed: {}", collection, cache_err);
                        Err(SyncError::RemoteFailure(e))
                    }
                }
            }
        }
    }

    /// Delete on the server and drop the record from the cached views.
    /// Deletes are not queued.
    pub async fn delete(&self, collection: Collection, id: &RecordId) -> SyncResult<()> {
        if !self.monitor.is_online() {
            return Err(SyncError::RemoteFailure(GatewayError::Connection(
                "offline".to_string(),
            )));
        }
        self.gateway.delete(collection, id).await?;
        if let Err(e) = self.cache.forget(collection, id).await {
            warn!("Deleted {} {} but cache cleanup failed: {}", collection, id, e);
        }
        Ok(())
    }

    /// Replay the queue. Runs at most one drain at a time; a trigger that
    /// arrives mid-drain is skipped. Entries that exhaust their retries stay
    /// queued and the drain moves on.
    pub async fn sync(&self) -> SyncResult<DrainOutcome> {
        if !self.monitor.is_online() {
            debug!("Sync skipped while offline");
            return Ok(DrainOutcome::Offline);
        }

        let _lock = match self.drain_lock.try_lock() {
            Ok(lock) => lock,
            Err(_) => {
                debug!("Sync already running");
                return Ok(DrainOutcome::AlreadyRunning);
            }
        };
        let report = {
            let _flag = DrainingFlag::raise(&self.draining);
            self.drain().await?
        };
        *self.last_report.lock() = Some(report.clone());
        Ok(DrainOutcome::Completed(report))
    }

    async fn drain(&self) -> SyncResult<DrainReport> {
        let started_at = Utc::now().timestamp_millis();
        let snapshot = self.queue.drain_all().await?;
        let attempted = snapshot.len();
        if attempted > 0 {
            info!("Draining {} pending mutations", attempted);
        }

        let mut succeeded = 0;
        let mut errors = Vec::new();

        for entry in snapshot {
            match self.replay(&entry).await {
                Ok(()) => match self.queue.remove(entry.local_id).await {
                    Ok(()) => succeeded += 1,
                    Err(e) => {
                        // Still queued; the replay will repeat under the same key
                        warn!("Replayed #{} but could not dequeue it: {}", entry.local_id, e);
                        errors.push(DrainError {
                            local_id: entry.local_id,
                            target: entry.target,
                            attempts: 1,
                            message: e.to_string(),
                        });
                    }
                },
                Err(error) => errors.push(error),
            }
        }

        let report = DrainReport {
            attempted,
            succeeded,
            still_pending: attempted - succeeded,
            errors,
            started_at,
            finished_at: Utc::now().timestamp_millis(),
        };
        if attempted > 0 {
            info!(
                "Drain finished: {} synced, {} still pending",
                report.succeeded, report.still_pending
            );
        }
        Ok(report)
    }

    async fn replay(&self, entry: &PendingMutation) -> Result<(), DrainError> {
        let mut attempt = 1;
        loop {
            match self
                .gateway
                .create(entry.target, &entry.payload, entry.idempotency_key)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Replay of #{} to {} failed (attempt {}/{}): {}",
                        entry.local_id, entry.target, attempt, self.policy.max_attempts, e
                    );
                    if attempt >= self.policy.max_attempts || !e.is_retryable() {
                        return Err(DrainError {
                            local_id: entry.local_id,
                            target: entry.target,
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    attempt += 1;
                    tokio::time::sleep(self.policy.delay_before(attempt)).await;
                }
            }
        }
    }

    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let last_report = self.last_report.lock().clone();
        Ok(SyncStatus {
            online: self.monitor.is_online(),
            draining: self.draining.load(Ordering::SeqCst),
            pending: self.queue.len().await?,
            last_drain_at: last_report.as_ref().map(|r| r.finished_at),
            last_report,
        })
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Wait for cache writes started by earlier fetches.
    pub async fn settle(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.cache_writes.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn spawn_cache_write(&self, collection: Collection, query: Query, records: Vec<Record>) {
        let cache = self.cache.clone();
        let fetched_at = Utc::now().timestamp_millis();
        let handle = tokio::spawn(async move {
            if let Err(e) = cache.save(collection, &query, records, fetched_at).await {
                warn!("Failed to cache {} snapshot: {}", collection, e);
            }
        });

        let mut writes = self.cache_writes.lock();
        writes.retain(|h| !h.is_finished());
        writes.push(handle);
    }

    async fn cached_or_empty(&self, collection: Collection, query: &Query) -> Fetched {
        match self.cache.load(collection, query).await {
            Ok(Some(snapshot)) => Fetched {
                records: snapshot.records,
                source: FetchSource::Cache {
                    fetched_at: snapshot.fetched_at,
                },
            },
            Ok(None) => Fetched {
                records: Vec::new(),
                source: FetchSource::Empty,
            },
            Err(e) => {
                warn!("Cache lookup for {} failed, serving empty: {}", collection, e);
                Fetched {
                    records: Vec::new(),
                    source: FetchSource::Empty,
                }
            }
        }
    }
}

/// Clears the draining flag even if the drain future is dropped.
struct DrainingFlag<'a>(&'a AtomicBool);

impl<'a> DrainingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for DrainingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn without_id(mut record: Value) -> Value {
    if let Value::Object(map) = &mut record {
        map.remove("id");
    }
    record
}
