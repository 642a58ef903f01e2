use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use super::codec::{assign_id, encode_key};
use super::{DurableStore, Record, RecordId, Schema};
use crate::error::{SyncError, SyncResult};

#[derive(Default)]
struct CollectionState {
    records: BTreeMap<Vec<u8>, Record>,
    seq: u64,
}

impl CollectionState {
    /// Assign ids up front so a bad record leaves the collection untouched.
    fn stage(&self, records: Vec<Record>) -> SyncResult<(Vec<(RecordId, Record)>, u64)> {
        let mut seq = self.seq;
        let mut staged = Vec::with_capacity(records.len());
        for mut record in records {
            let id = assign_id(&mut record, &mut seq)?;
            staged.push((id, record));
        }
        Ok((staged, seq))
    }

    fn commit(&mut self, staged: Vec<(RecordId, Record)>, seq: u64) -> Vec<RecordId> {
        self.seq = seq;
        staged
            .into_iter()
            .map(|(id, record)| {
                self.records.insert(encode_key(&id), record);
                id
            })
            .collect()
    }
}

/// In-process store with the same semantics as [`super::RocksStore`],
/// minus durability.
pub struct MemoryStore {
    schema: Schema,
    collections: HashMap<String, Mutex<CollectionState>>,
    ready: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Ready immediately.
    pub fn new(schema: Schema) -> Self {
        let store = Self::unopened(schema);
        store.ready.store(true, Ordering::SeqCst);
        store
    }

    /// Fails with `NotReady` until `open` is called.
    pub fn unopened(schema: Schema) -> Self {
        let collections = schema
            .collections
            .iter()
            .map(|name| (name.clone(), Mutex::new(CollectionState::default())))
            .collect();
        Self {
            schema,
            collections,
            ready: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail with `StorageFailure`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn collection(&self, name: &str) -> SyncResult<&Mutex<CollectionState>> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(SyncError::NotReady);
        }
        self.collections
            .get(name)
            .ok_or_else(|| SyncError::UnknownCollection(name.to_string()))
    }

    fn writable(&self, name: &str) -> SyncResult<&Mutex<CollectionState>> {
        let collection = self.collection(name)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::StorageFailure(format!(
                "write to '{}' rejected",
                name
            )));
        }
        Ok(collection)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn open(&self) -> SyncResult<()> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn collections(&self) -> Vec<String> {
        if !self.is_ready() {
            return Vec::new();
        }
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }

    fn schema_version(&self) -> Option<u32> {
        self.is_ready().then_some(self.schema.version)
    }

    async fn put(&self, collection: &str, record: Record) -> SyncResult<RecordId> {
        let mut ids = self.put_all(collection, vec![record]).await?;
        ids.pop()
            .ok_or_else(|| SyncError::StorageFailure("put produced no id".to_string()))
    }

    async fn put_all(&self, collection: &str, records: Vec<Record>) -> SyncResult<Vec<RecordId>> {
        let mut state = self.writable(collection)?.lock();
        let (staged, seq) = state.stage(records)?;
        Ok(state.commit(staged, seq))
    }

    async fn get(&self, collection: &str, id: &RecordId) -> SyncResult<Option<Record>> {
        let state = self.collection(collection)?.lock();
        Ok(state.records.get(&encode_key(id)).cloned())
    }

    async fn get_all(&self, collection: &str) -> SyncResult<Vec<Record>> {
        let state = self.collection(collection)?.lock();
        Ok(state.records.values().cloned().collect())
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> SyncResult<()> {
        let mut state = self.writable(collection)?.lock();
        state.records.remove(&encode_key(id));
        Ok(())
    }

    async fn clear(&self, collection: &str) -> SyncResult<()> {
        self.writable(collection)?.lock().records.clear();
        Ok(())
    }

    async fn replace_all(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> SyncResult<Vec<RecordId>> {
        let mut state = self.writable(collection)?.lock();
        let (staged, seq) = state.stage(records)?;
        state.records.clear();
        Ok(state.commit(staged, seq))
    }

    async fn count(&self, collection: &str) -> SyncResult<usize> {
        Ok(self.collection(collection)?.lock().records.len())
    }

    async fn move_record(
        &self,
        from: &str,
        id: &RecordId,
        to: &str,
        record: Record,
    ) -> SyncResult<RecordId> {
        let source = self.writable(from)?;
        let target = self.writable(to)?;
        let key = encode_key(id);

        if from == to {
            let mut state = source.lock();
            let (staged, seq) = state.stage(vec![record])?;
            state.records.remove(&key);
            return first_id(state.commit(staged, seq));
        }

        let (mut source, mut target) = if from < to {
            let s = source.lock();
            (s, target.lock())
        } else {
            let t = target.lock();
            (source.lock(), t)
        };
        let (staged, seq) = target.stage(vec![record])?;
        source.records.remove(&key);
        first_id(target.commit(staged, seq))
    }
}

fn first_id(mut ids: Vec<RecordId>) -> SyncResult<RecordId> {
    ids.pop()
        .ok_or_else(|| SyncError::StorageFailure("write produced no id".to_string()))
}
