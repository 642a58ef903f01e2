//! Pending mutation queue
//!
//! Durable, ordered backlog of creates that have not reached the server,
//! kept in the `pendingMutations` collection of the local store. The store's
//! auto-increment id is the entry's `local_id`, so scanning by key yields
//! enqueue order.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collection::Collection;
use crate::error::{SyncError, SyncResult};
use crate::storage::schema::PENDING_MUTATIONS;
use crate::storage::{DurableStore, RecordId};

/// One unconfirmed create. Never modified after enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    #[serde(rename = "id")]
    pub local_id: u64,
    pub target: Collection,
    pub payload: Value,
    pub idempotency_key: Uuid,
    /// Epoch millis
    pub enqueued_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub count: usize,
    /// Serialized size of all payloads
    pub bytes: usize,
}

/// Entries queued at the moment `drain_all` was called, in enqueue order.
#[derive(Debug)]
pub struct DrainSnapshot {
    entries: std::vec::IntoIter<PendingMutation>,
}

impl DrainSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }
}

impl Iterator for DrainSnapshot {
    type Item = PendingMutation;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for DrainSnapshot {}

#[derive(Clone)]
pub struct PendingQueue {
    store: Arc<dyn DurableStore>,
}

/// A create carries no server id.
fn strip_id(mut payload: Value) -> Value {
    if let Value::Object(map) = &mut payload {
        map.remove("id");
    }
    payload
}

fn entry_body(target: Collection, payload: Value, key: Uuid, enqueued_at: i64) -> Value {
    serde_json::json!({
        "target": target,
        "payload": payload,
        "idempotencyKey": key,
        "enqueuedAt": enqueued_at,
    })
}

fn local_id_of(id: RecordId) -> SyncResult<u64> {
    match id {
        RecordId::Int(n) if n > 0 => Ok(n as u64),
        other => Err(SyncError::StorageFailure(format!(
            "queue entry got non-sequential id {}",
            other
        ))),
    }
}

impl PendingQueue {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    pub async fn enqueue(&self, target: Collection, payload: Value) -> SyncResult<PendingMutation> {
        self.enqueue_with_key(target, payload, Uuid::new_v4()).await
    }

    /// Enqueue under an idempotency key minted by an earlier online attempt.
    pub async fn enqueue_with_key(
        &self,
        target: Collection,
        payload: Value,
        idempotency_key: Uuid,
    ) -> SyncResult<PendingMutation> {
        if !target.accepts_creates() {
            return Err(SyncError::InvalidRecord(format!(
                "'{}' does not accept creates",
                target
            )));
        }

        let payload = strip_id(payload);
        let enqueued_at = Utc::now().timestamp_millis();
        let body = entry_body(target, payload.clone(), idempotency_key, enqueued_at);
        let local_id = local_id_of(self.store.put(PENDING_MUTATIONS, body).await?)?;

        debug!(
            "Queued {} mutation #{} (key {})",
            target, local_id, idempotency_key
        );

        Ok(PendingMutation {
            local_id,
            target,
            payload,
            idempotency_key,
            enqueued_at,
        })
    }

    /// One-shot snapshot of everything queued right now.
    pub async fn drain_all(&self) -> SyncResult<DrainSnapshot> {
        let mut entries = self.entries().await?;
        entries.sort_by_key(|m| m.local_id);
        Ok(DrainSnapshot {
            entries: entries.into_iter(),
        })
    }

    /// No-op when the entry is already gone.
    pub async fn remove(&self, local_id: u64) -> SyncResult<()> {
        self.store
            .delete(PENDING_MUTATIONS, &RecordId::from(local_id))
            .await
    }

    pub async fn get(&self, local_id: u64) -> SyncResult<Option<PendingMutation>> {
        match self
            .store
            .get(PENDING_MUTATIONS, &RecordId::from(local_id))
            .await?
        {
            Some(record) => Ok(Some(serde_json::from_value(record)?)),
            None => Ok(None),
        }
    }

    pub async fn len(&self) -> SyncResult<usize> {
        self.store.count(PENDING_MUTATIONS).await
    }

    pub async fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Entries for one target, in enqueue order.
    pub async fn pending(&self, target: Collection) -> SyncResult<Vec<PendingMutation>> {
        Ok(self
            .drain_all()
            .await?
            .filter(|m| m.target == target)
            .collect())
    }

    pub async fn stats(&self) -> SyncResult<QueueStats> {
        let entries = self.entries().await?;
        let bytes = entries
            .iter()
            .map(|m| serde_json::to_vec(&m.payload).map(|v| v.len()).unwrap_or(0))
            .sum();
        Ok(QueueStats {
            count: entries.len(),
            bytes,
        })
    }

    /// Move entries from the per-domain pending stores of older schemas into
    /// the generalized queue, oldest first. Each move is one atomic write.
    pub async fn import_legacy(&self) -> SyncResult<usize> {
        let known = self.store.collections();
        let mut imported = 0;

        for target in Collection::ALL {
            let Some(legacy) = target.legacy_pending_store() else {
                continue;
            };
            if !known.iter().any(|c| c == legacy) {
                continue;
            }

            for record in self.store.get_all(legacy).await? {
                let Some(id) = crate::storage::codec::inline_id(&record)? else {
                    warn!("Skipping legacy entry without id in '{}'", legacy);
                    continue;
                };
                let body = entry_body(
                    target,
                    strip_id(record),
                    Uuid::new_v4(),
                    Utc::now().timestamp_millis(),
                );
                self.store
                    .move_record(legacy, &id, PENDING_MUTATIONS, body)
                    .await?;
                imported += 1;
            }
        }

        if imported > 0 {
            info!("Imported {} pending mutations from legacy stores", imported);
        }
        Ok(imported)
    }

    async fn entries(&self) -> SyncResult<Vec<PendingMutation>> {
        self.store
            .get_all(PENDING_MUTATIONS)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(SyncError::from))
            .collect()
    }
}
