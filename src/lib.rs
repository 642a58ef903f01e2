pub mod client;
pub mod collection;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod queue;
pub mod storage;
pub mod sync;

pub use client::{HttpGateway, RemoteGateway};
pub use collection::{Collection, Query};
pub use config::EngineConfig;
pub use connectivity::{ConnectivityMonitor, Direction, Transition};
pub use error::{GatewayError, SyncError, SyncResult};
pub use queue::{DrainSnapshot, PendingMutation, PendingQueue, QueueStats};
pub use storage::{DurableStore, MemoryStore, Record, RecordId, RocksStore, Schema};
pub use sync::{
    DrainOutcome, DrainReport, FetchSource, Fetched, RetryPolicy, Submitted, SyncCoordinator,
    SyncHandle, SyncStatus, SyncWorker, WorkerSettings,
};
