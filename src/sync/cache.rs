//! Read-through snapshot cache
//!
//! Each successful remote read is kept verbatim in `snapshots` under its
//! query's cache key. Unfiltered reads are also mirrored into the
//! collection's own store. Snapshots are only ever written from server
//! responses.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::collection::{Collection, Query};
use crate::error::SyncResult;
use crate::storage::codec::inline_id;
use crate::storage::schema::SNAPSHOTS;
use crate::storage::{DurableStore, Record, RecordId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSnapshot {
    #[serde(rename = "id")]
    pub cache_key: String,
    pub collection: Collection,
    /// Epoch millis of the remote read
    pub fetched_at: i64,
    pub records: Vec<Record>,
}

#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn DurableStore>,
    write_lock: Arc<Mutex<()>>,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store a read result. A snapshot older than the one already cached for
    /// the same key is discarded.
    pub async fn save(
        &self,
        collection: Collection,
        query: &Query,
        records: Vec<Record>,
        fetched_at: i64,
    ) -> SyncResult<bool> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.load(collection, query).await? {
            if existing.fetched_at > fetched_at {
                debug!("Discarding stale snapshot for '{}'", existing.cache_key);
                return Ok(false);
            }
        }

        let snapshot = CachedSnapshot {
            cache_key: query.cache_key(collection)?,
            collection,
            fetched_at,
            records,
        };
        let mirror = query.is_unfiltered().then(|| snapshot.records.clone());

        self.store
            .put(SNAPSHOTS, serde_json::to_value(&snapshot)?)
            .await?;
        if let Some(records) = mirror {
            if let Err(e) = self.store.replace_all(collection.store_name(), records).await {
                warn!("Could not mirror '{}' into its store: {}", collection, e);
            }
        }

        debug!(
            "Cached {} records for '{}'",
            snapshot.records.len(),
            snapshot.cache_key
        );
        Ok(true)
    }

    /// `None` when this query has never been fetched successfully.
    pub async fn load(
        &self,
        collection: Collection,
        query: &Query,
    ) -> SyncResult<Option<CachedSnapshot>> {
        let key = RecordId::Str(query.cache_key(collection)?);
        match self.store.get(SNAPSHOTS, &key).await? {
            Some(record) => Ok(Some(serde_json::from_value(record)?)),
            None => Ok(None),
        }
    }

    /// Drop a record deleted on the server from every cached view of its
    /// collection.
    pub async fn forget(&self, collection: Collection, id: &RecordId) -> SyncResult<()> {
        let _guard = self.write_lock.lock().await;

        self.store.delete(collection.store_name(), id).await?;

        for record in self.store.get_all(SNAPSHOTS).await? {
            let mut snapshot: CachedSnapshot = serde_json::from_value(record)?;
            if snapshot.collection != collection {
                continue;
            }
            let before = snapshot.records.len();
            snapshot
                .records
                .retain(|r| inline_id(r).ok().flatten().as_ref() != Some(id));
            if snapshot.records.len() != before {
                self.store
                    .put(SNAPSHOTS, serde_json::to_value(&snapshot)?)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, Schema};
    use serde_json::json;

    fn create_test_cache() -> (SnapshotCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(Schema::current()));
        (SnapshotCache::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_missing_vs_empty_snapshot() {
        let (cache, _) = create_test_cache();
        let query = Query::all();
        assert!(cache.load(Collection::Balances, &query).await.unwrap().is_none());

        cache
            .save(Collection::Balances, &query, vec![], 1)
            .await
            .unwrap();
        let snapshot = cache.load(Collection::Balances, &query).await.unwrap().unwrap();
        assert!(snapshot.records.is_empty());
    }

    #[tokio::test]
    async fn test_records_are_kept_verbatim() {
        let (cache, store) = create_test_cache();
        let records = vec![json!({"party": "A", "cash": 10}), json!("Gold")];
        cache
            .save(Collection::Balances, &Query::all(), records.clone(), 5)
            .await
            .unwrap();

        let snapshot = cache
            .load(Collection::Balances, &Query::all())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.records, records);
        assert_eq!(snapshot.fetched_at, 5);
        assert_eq!(store.count("balances").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unfiltered_load_ignores_mirror_ids_and_order() {
        let (cache, store) = create_test_cache();
        let records = vec![json!({"party": "Zaveri"}), json!({"party": "Amin"})];
        cache
            .save(Collection::Balances, &Query::all(), records.clone(), 3)
            .await
            .unwrap();

        // The mirror keys id-less rows itself
        let mirrored = store.get_all("balances").await.unwrap();
        assert_eq!(mirrored.len(), 2);
        assert!(mirrored.iter().all(|r| r.get("id").is_some()));

        let snapshot = cache
            .load(Collection::Balances, &Query::all())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.records, records);
    }

    #[tokio::test]
    async fn test_filtered_query_is_not_mirrored() {
        let (cache, store) = create_test_cache();
        let query = Query::on_date("2024-01-02");
        cache
            .save(Collection::Transactions, &query, vec![json!({"id": "t1"})], 1)
            .await
            .unwrap();

        assert_eq!(store.count("transactions").await.unwrap(), 0);
        assert!(cache
            .load(Collection::Transactions, &Query::all())
            .await
            .unwrap()
            .is_none());
        assert!(cache
            .load(Collection::Transactions, &query)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_stale_save_is_discarded() {
        let (cache, _) = create_test_cache();
        let query = Query::all();
        cache
            .save(Collection::Ledgers, &query, vec![json!("new")], 20)
            .await
            .unwrap();
        let saved = cache
            .save(Collection::Ledgers, &query, vec![json!("old")], 10)
            .await
            .unwrap();
        assert!(!saved);

        let snapshot = cache.load(Collection::Ledgers, &query).await.unwrap().unwrap();
        assert_eq!(snapshot.records, vec![json!("new")]);
    }

    #[tokio::test]
    async fn test_forget_removes_record_everywhere() {
        let (cache, store) = create_test_cache();
        let rows = vec![json!({"id": "t1"}), json!({"id": "t2"})];
        cache
            .save(Collection::Transactions, &Query::all(), rows.clone(), 1)
            .await
            .unwrap();
        cache
            .save(Collection::Transactions, &Query::on_date("d"), rows, 1)
            .await
            .unwrap();

        cache
            .forget(Collection::Transactions, &RecordId::from("t1"))
            .await
            .unwrap();

        for query in [Query::all(), Query::on_date("d")] {
            let snapshot = cache
                .load(Collection::Transactions, &query)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(snapshot.records, vec![json!({"id": "t2"})]);
        }
        assert_eq!(store.count("transactions").await.unwrap(), 1);
    }
}
