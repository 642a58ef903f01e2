//! Offline sync
//!
//! - [`SyncCoordinator`] routes reads and writes and drains the queue
//! - [`SnapshotCache`] keeps the last good server response per query
//! - [`SyncWorker`] drains automatically on reconnect and on an interval
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ledger_sync::{
//!     Collection, ConnectivityMonitor, HttpGateway, Query, RetryPolicy, RocksStore, Schema,
//!     SyncCoordinator, SyncWorker, WorkerSettings,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::new("./data", Schema::current()));
//! let gateway = Arc::new(HttpGateway::new("http://localhost:8080", std::time::Duration::from_secs(30))?);
//! let monitor = Arc::new(ConnectivityMonitor::new(true));
//!
//! let coordinator = Arc::new(SyncCoordinator::new(store, gateway, monitor.clone(), RetryPolicy::default()));
//! coordinator.initialize().await?;
//! let worker = SyncWorker::spawn(coordinator.clone(), WorkerSettings::default());
//!
//! // Works offline too: the write is queued and replayed on reconnect
//! monitor.report(false);
//! coordinator
//!     .submit(Collection::Transactions, serde_json::json!({"ledgerName": "Cash", "amount": 500}))
//!     .await?;
//! let balances = coordinator.fetch(Collection::Balances, &Query::all()).await?;
//! println!("{} cached balances", balances.records.len());
//!
//! monitor.report(true);
//! worker.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod coordinator;
pub mod retry;
pub mod worker;

pub use cache::{CachedSnapshot, SnapshotCache};
pub use coordinator::{
    DrainError, DrainOutcome, DrainReport, FetchSource, Fetched, Submitted, SyncCoordinator,
    SyncStatus,
};
pub use retry::RetryPolicy;
pub use worker::{SyncCommand, SyncHandle, SyncWorker, WorkerSettings};
