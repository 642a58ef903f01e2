use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::codec::{assign_id, decode_u64, encode_key, encode_u64};
use super::{DurableStore, Record, RecordId, Schema};
use crate::error::{SyncError, SyncResult};

const META_CF: &str = "_meta";
const DEFAULT_CF: &str = "default";
const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

fn seq_key(collection: &str) -> Vec<u8> {
    format!("seq:{}", collection).into_bytes()
}

/// RocksDB-backed store: one column family per collection, plus `_meta` for
/// the schema version and the auto-increment sequences.
///
/// Constructed unopened; every data operation fails with `NotReady` until
/// [`DurableStore::open`] completes.
pub struct RocksStore {
    path: PathBuf,
    schema: Schema,
    opened: OnceCell<Opened>,
}

struct Opened {
    db: Arc<DB>,
    locks: HashMap<String, Arc<Mutex<()>>>,
    version: u32,
}

impl RocksStore {
    pub fn new<P: AsRef<Path>>(data_dir: P, schema: Schema) -> Self {
        Self {
            path: data_dir.as_ref().to_path_buf(),
            schema,
            opened: OnceCell::new(),
        }
    }

    /// Construct and open in one step.
    pub async fn open_at<P: AsRef<Path>>(data_dir: P, schema: Schema) -> SyncResult<Self> {
        let store = Self::new(data_dir, schema);
        store.open().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_blocking(path: &Path, schema: &Schema) -> SyncResult<Opened> {
        std::fs::create_dir_all(path).map_err(|e| {
            SyncError::StorageFailure(format!("cannot create {}: {}", path.display(), e))
        })?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_keep_log_file_num(5);

        // Existing column families are always reopened, declared or not
        let mut cf_names = match DB::list_cf(&opts, path) {
            Ok(cfs) => cfs,
            Err(_) => vec![DEFAULT_CF.to_string()],
        };
        for name in std::iter::once(META_CF).chain(schema.collections.iter().map(String::as_str)) {
            if !cf_names.iter().any(|n| n == name) {
                debug!("Creating collection '{}'", name);
                cf_names.push(name.to_string());
            }
        }

        let descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)
            .map_err(|e| SyncError::StorageFailure(format!("Failed to open RocksDB: {}", e)))?;

        let meta = meta_cf(&db)?;
        let stored = db
            .get_cf(meta, SCHEMA_VERSION_KEY)?
            .map(|v| decode_u64(&v) as u32);

        let version = match stored {
            Some(v) if v > schema.version => {
                warn!(
                    "Store at {} has schema version {}, newer than requested {}; keeping it",
                    path.display(),
                    v,
                    schema.version
                );
                v
            }
            Some(v) if v == schema.version => v,
            previous => {
                info!(
                    "Schema version {} -> {} at {}",
                    previous.unwrap_or(0),
                    schema.version,
                    path.display()
                );
                db.put_cf(meta, SCHEMA_VERSION_KEY, encode_u64(schema.version as u64))?;
                schema.version
            }
        };

        let locks = cf_names
            .into_iter()
            .filter(|n| n != DEFAULT_CF && n != META_CF)
            .map(|n| (n, Arc::new(Mutex::new(()))))
            .collect();

        Ok(Opened {
            db: Arc::new(db),
            locks,
            version,
        })
    }

    fn opened(&self) -> SyncResult<&Opened> {
        self.opened.get().ok_or(SyncError::NotReady)
    }

    fn lock_for(opened: &Opened, collection: &str) -> SyncResult<Arc<Mutex<()>>> {
        opened
            .locks
            .get(collection)
            .cloned()
            .ok_or_else(|| SyncError::UnknownCollection(collection.to_string()))
    }

    /// Run a write against one collection while holding its lock.
    async fn write<T, F>(&self, collection: &str, op: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DB, &str) -> SyncResult<T> + Send + 'static,
    {
        let opened = self.opened()?;
        let lock = Self::lock_for(opened, collection)?;
        // Held until the blocking write commits, even if the caller is dropped
        let guard = lock.lock_owned().await;
        let db = opened.db.clone();
        let name = collection.to_string();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            op(&db, &name)
        })
        .await?
    }

    async fn read<T, F>(&self, collection: &str, op: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DB, &str) -> SyncResult<T> + Send + 'static,
    {
        let opened = self.opened()?;
        if !opened.locks.contains_key(collection) {
            return Err(SyncError::UnknownCollection(collection.to_string()));
        }
        let db = opened.db.clone();
        let name = collection.to_string();
        tokio::task::spawn_blocking(move || op(&db, &name)).await?
    }
}

fn meta_cf(db: &DB) -> SyncResult<&ColumnFamily> {
    db.cf_handle(META_CF)
        .ok_or_else(|| SyncError::StorageFailure("meta column family missing".to_string()))
}

fn collection_cf<'a>(db: &'a DB, name: &str) -> SyncResult<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| SyncError::UnknownCollection(name.to_string()))
}

fn current_seq(db: &DB, name: &str) -> SyncResult<u64> {
    let meta = meta_cf(db)?;
    Ok(db
        .get_cf(meta, seq_key(name))?
        .map(|v| decode_u64(&v))
        .unwrap_or(0))
}

/// Stage `records` into `batch`, assigning ids and bumping the sequence.
fn stage_records(
    db: &DB,
    name: &str,
    batch: &mut WriteBatch,
    records: Vec<Record>,
) -> SyncResult<Vec<RecordId>> {
    let cf = collection_cf(db, name)?;
    let start = current_seq(db, name)?;
    let mut seq = start;
    let mut ids = Vec::with_capacity(records.len());

    for mut record in records {
        let id = assign_id(&mut record, &mut seq)?;
        batch.put_cf(cf, encode_key(&id), serde_json::to_vec(&record)?);
        ids.push(id);
    }

    if seq != start {
        batch.put_cf(meta_cf(db)?, seq_key(name), encode_u64(seq));
    }
    Ok(ids)
}

fn stage_clear(db: &DB, name: &str, batch: &mut WriteBatch) -> SyncResult<usize> {
    let cf = collection_cf(db, name)?;
    let mut count = 0;
    for item in db.iterator_cf(cf, IteratorMode::Start) {
        let (key, _) = item?;
        batch.delete_cf(cf, key);
        count += 1;
    }
    Ok(count)
}

#[async_trait]
impl DurableStore for RocksStore {
    async fn open(&self) -> SyncResult<()> {
        self.opened
            .get_or_try_init(|| async {
                let path = self.path.clone();
                let schema = self.schema.clone();
                let opened =
                    tokio::task::spawn_blocking(move || Self::open_blocking(&path, &schema))
                        .await??;
                info!(
                    "Local store opened at {} (schema v{}, {} collections)",
                    self.path.display(),
                    opened.version,
                    opened.locks.len()
                );
                Ok::<_, SyncError>(opened)
            })
            .await?;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.opened.initialized()
    }

    fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .opened
            .get()
            .map(|o| o.locks.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn schema_version(&self) -> Option<u32> {
        self.opened.get().map(|o| o.version)
    }

    async fn put(&self, collection: &str, record: Record) -> SyncResult<RecordId> {
        let mut ids = self.put_all(collection, vec![record]).await?;
        ids.pop()
            .ok_or_else(|| SyncError::StorageFailure("put produced no id".to_string()))
    }

    async fn put_all(&self, collection: &str, records: Vec<Record>) -> SyncResult<Vec<RecordId>> {
        self.write(collection, move |db, name| {
            let mut batch = WriteBatch::default();
            let ids = stage_records(db, name, &mut batch, records)?;
            db.write(batch)?;
            Ok(ids)
        })
        .await
    }

    async fn get(&self, collection: &str, id: &RecordId) -> SyncResult<Option<Record>> {
        let key = encode_key(id);
        self.read(collection, move |db, name| {
            let cf = collection_cf(db, name)?;
            match db.get_cf(cf, key)? {
                Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn get_all(&self, collection: &str) -> SyncResult<Vec<Record>> {
        self.read(collection, |db, name| {
            let cf = collection_cf(db, name)?;
            let mut records = Vec::new();
            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (_, value) = item?;
                records.push(serde_json::from_slice(&value)?);
            }
            Ok(records)
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> SyncResult<()> {
        let key = encode_key(id);
        self.write(collection, move |db, name| {
            let cf = collection_cf(db, name)?;
            db.delete_cf(cf, key)?;
            Ok(())
        })
        .await
    }

    async fn clear(&self, collection: &str) -> SyncResult<()> {
        let removed = self
            .write(collection, |db, name| {
                let mut batch = WriteBatch::default();
                let removed = stage_clear(db, name, &mut batch)?;
                db.write(batch)?;
                Ok(removed)
            })
            .await?;
        debug!("Cleared {} records from '{}'", removed, collection);
        Ok(())
    }

    async fn replace_all(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> SyncResult<Vec<RecordId>> {
        self.write(collection, move |db, name| {
            let mut batch = WriteBatch::default();
            stage_clear(db, name, &mut batch)?;
            let ids = stage_records(db, name, &mut batch, records)?;
            db.write(batch)?;
            Ok(ids)
        })
        .await
    }

    async fn count(&self, collection: &str) -> SyncResult<usize> {
        self.read(collection, |db, name| {
            let cf = collection_cf(db, name)?;
            let mut count = 0;
            for item in db.iterator_cf(cf, IteratorMode::Start) {
                item?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }

    async fn move_record(
        &self,
        from: &str,
        id: &RecordId,
        to: &str,
        record: Record,
    ) -> SyncResult<RecordId> {
        let opened = self.opened()?;
        let from_lock = Self::lock_for(opened, from)?;
        let to_lock = Self::lock_for(opened, to)?;

        // Fixed acquisition order across collection pairs
        let guards = if from <= to {
            let a = from_lock.lock_owned().await;
            let b = if from == to { None } else { Some(to_lock.lock_owned().await) };
            (a, b)
        } else {
            let b = to_lock.lock_owned().await;
            let a = from_lock.lock_owned().await;
            (a, Some(b))
        };

        let db = opened.db.clone();
        let from = from.to_string();
        let to = to.to_string();
        let key = encode_key(id);
        tokio::task::spawn_blocking(move || {
            let _guards = guards;
            let mut batch = WriteBatch::default();
            let mut ids = stage_records(&db, &to, &mut batch, vec![record])?;
            batch.delete_cf(collection_cf(&db, &from)?, key);
            db.write(batch)?;
            ids.pop()
                .ok_or_else(|| SyncError::StorageFailure("move produced no id".to_string()))
        })
        .await?
    }
}
