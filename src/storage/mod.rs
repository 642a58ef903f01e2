//! Local durable store
//!
//! Named collections of JSON records keyed by id. Writes to one collection
//! serialize; writes to different collections proceed independently. Every
//! multi-record write is one atomic unit.

pub mod codec;
pub mod engine;
pub mod memory;
pub mod schema;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::SyncResult;

pub use engine::RocksStore;
pub use memory::MemoryStore;
pub use schema::Schema;

/// Records are opaque to the engine.
pub type Record = Value;

/// Record identifier, unique within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Int(n)
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        RecordId::Int(n as i64)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Str(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId::Str(s)
    }
}

/// Integers parse as `Int`, anything else as `Str`.
impl FromStr for RecordId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<i64>()
            .map(RecordId::Int)
            .unwrap_or_else(|_| RecordId::Str(s.to_string())))
    }
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Create missing collections and record the schema version. Idempotent;
    /// concurrent callers wait on the same initialization.
    async fn open(&self) -> SyncResult<()>;

    fn is_ready(&self) -> bool;

    /// Collections present in the opened store, including ones the schema
    /// no longer declares. Empty before `open`.
    fn collections(&self) -> Vec<String>;

    /// On-disk schema version, `None` before `open`.
    fn schema_version(&self) -> Option<u32>;

    /// Insert or overwrite by id. Records without an id get the next value of
    /// the collection's auto-increment sequence.
    async fn put(&self, collection: &str, record: Record) -> SyncResult<RecordId>;

    /// All records become visible together or none do.
    async fn put_all(&self, collection: &str, records: Vec<Record>) -> SyncResult<Vec<RecordId>>;

    async fn get(&self, collection: &str, id: &RecordId) -> SyncResult<Option<Record>>;

    /// Records in key order: integer ids ascending, then string ids.
    async fn get_all(&self, collection: &str) -> SyncResult<Vec<Record>>;

    /// Removing a missing id is not an error.
    async fn delete(&self, collection: &str, id: &RecordId) -> SyncResult<()>;

    async fn clear(&self, collection: &str) -> SyncResult<()>;

    /// Clear and refill in a single atomic write.
    async fn replace_all(&self, collection: &str, records: Vec<Record>)
        -> SyncResult<Vec<RecordId>>;

    async fn count(&self, collection: &str) -> SyncResult<usize>;

    /// Atomically write `record` into `to` and delete `id` from `from`.
    async fn move_record(
        &self,
        from: &str,
        id: &RecordId,
        to: &str,
        record: Record,
    ) -> SyncResult<RecordId>;
}
