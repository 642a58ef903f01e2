//! Common test utilities for sync engine tests
//!
//! Provides:
//! - A scriptable in-process remote gateway
//! - Builders for coordinators over memory and RocksDB stores

#![allow(dead_code)]

use async_trait::async_trait;
use ledger_sync::{
    Collection, ConnectivityMonitor, DurableStore, GatewayError, MemoryStore, Query, Record,
    RecordId, RemoteGateway, RetryPolicy, RocksStore, Schema, SyncCoordinator,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

type Predicate = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// One create call as seen by the gateway, successful or not.
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub collection: Collection,
    pub payload: Value,
    pub key: Uuid,
    pub ok: bool,
}

#[derive(Default)]
pub struct ScriptedGateway {
    calls: Mutex<Vec<CreateCall>>,
    reads: Mutex<HashMap<Collection, Vec<Record>>>,
    read_count: AtomicU32,
    deleted: Mutex<Vec<(Collection, RecordId)>>,
    down: AtomicBool,
    fail_next: AtomicU32,
    fail_when: Mutex<Option<Predicate>>,
    reject_when: Mutex<Option<Predicate>>,
    create_delay: Mutex<Option<Duration>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call fails with a connection error.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// The next `n` creates fail with a 503.
    pub fn fail_next_creates(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Creates whose payload matches fail with a 503 until cleared.
    pub fn fail_creates_where<F>(&self, predicate: F)
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Creates whose payload matches fail with a 400.
    pub fn reject_creates_where<F>(&self, predicate: F)
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        *self.reject_when.lock() = Some(Box::new(predicate));
    }

    pub fn clear_failures(&self) {
        self.set_down(false);
        self.fail_next.store(0, Ordering::SeqCst);
        *self.fail_when.lock() = None;
        *self.reject_when.lock() = None;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    pub fn set_read(&self, collection: Collection, records: Vec<Record>) {
        self.reads.lock().insert(collection, records);
    }

    pub fn calls(&self) -> Vec<CreateCall> {
        self.calls.lock().clone()
    }

    /// Payloads the server accepted, in order.
    pub fn accepted(&self) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.ok)
            .map(|c| c.payload.clone())
            .collect()
    }

    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<(Collection, RecordId)> {
        self.deleted.lock().clone()
    }

    fn create_outcome(&self, payload: &Value) -> Result<(), GatewayError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("connection refused".into()));
        }
        if let Some(reject) = self.reject_when.lock().as_ref() {
            if reject(payload) {
                return Err(GatewayError::Server {
                    status: 400,
                    message: "invalid transaction".into(),
                });
            }
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let matched = self
            .fail_when
            .lock()
            .as_ref()
            .map(|f| f(payload))
            .unwrap_or(false);
        if consumed || matched {
            return Err(GatewayError::Server {
                status: 503,
                message: "unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for ScriptedGateway {
    async fn create(
        &self,
        collection: Collection,
        payload: &Value,
        idempotency_key: Uuid,
    ) -> Result<Record, GatewayError> {
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.create_outcome(payload);
        let mut calls = self.calls.lock();
        calls.push(CreateCall {
            collection,
            payload: payload.clone(),
            key: idempotency_key,
            ok: outcome.is_ok(),
        });
        outcome?;

        let mut record = payload.clone();
        if let Value::Object(map) = &mut record {
            map.insert("id".into(), json!(format!("srv-{}", calls.len())));
        }
        Ok(record)
    }

    async fn read(&self, collection: Collection, _query: &Query) -> Result<Vec<Record>, GatewayError> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("connection refused".into()));
        }
        Ok(self.reads.lock().get(&collection).cloned().unwrap_or_default())
    }

    async fn delete(&self, collection: Collection, id: &RecordId) -> Result<(), GatewayError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("connection refused".into()));
        }
        self.deleted.lock().push((collection, id.clone()));
        Ok(())
    }
}

pub struct TestEngine {
    pub coordinator: Arc<SyncCoordinator>,
    pub gateway: Arc<ScriptedGateway>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub store: Arc<MemoryStore>,
}

/// Coordinator over an in-memory store with immediate retries.
pub fn create_test_engine(online: bool) -> TestEngine {
    create_test_engine_with_policy(online, RetryPolicy::immediate(3))
}

pub fn create_test_engine_with_policy(online: bool, policy: RetryPolicy) -> TestEngine {
    let store = Arc::new(MemoryStore::new(Schema::current()));
    let gateway = ScriptedGateway::new();
    let monitor = Arc::new(ConnectivityMonitor::new(online));
    let coordinator = Arc::new(SyncCoordinator::new(
        store.clone(),
        gateway.clone(),
        monitor.clone(),
        policy,
    ));
    TestEngine {
        coordinator,
        gateway,
        monitor,
        store,
    }
}

/// Coordinator over a RocksDB store in `dir`, opened and initialized.
pub async fn create_rocks_coordinator(
    dir: &TempDir,
    gateway: Arc<ScriptedGateway>,
    online: bool,
) -> (Arc<SyncCoordinator>, Arc<ConnectivityMonitor>) {
    let store: Arc<dyn DurableStore> = Arc::new(RocksStore::new(dir.path(), Schema::current()));
    let monitor = Arc::new(ConnectivityMonitor::new(online));
    let coordinator = Arc::new(SyncCoordinator::new(
        store,
        gateway,
        monitor.clone(),
        RetryPolicy::immediate(3),
    ));
    coordinator
        .initialize()
        .await
        .expect("Failed to initialize coordinator");
    (coordinator, monitor)
}

pub fn transaction(n: i64) -> Value {
    json!({
        "date": "2024-03-01",
        "transaction": "Sale",
        "ledgerName": "Ravi Jewellers",
        "netWeight": 10.5,
        "amount": n * 100,
        "seq": n
    })
}

/// Poll until `check` passes or two seconds elapse.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
