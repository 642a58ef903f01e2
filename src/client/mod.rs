//! Remote gateway
//!
//! The engine's only view of the ledger server. Every call may be slow or
//! fail; timeouts belong to the implementation.

pub mod http_client;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::collection::{Collection, Query};
use crate::error::GatewayError;
use crate::storage::{Record, RecordId};

pub use http_client::HttpGateway;

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Persist a new record. Replays of the same mutation carry the same
    /// `idempotency_key`; the server is expected to deduplicate on it.
    async fn create(
        &self,
        collection: Collection,
        payload: &Value,
        idempotency_key: Uuid,
    ) -> Result<Record, GatewayError>;

    async fn read(&self, collection: Collection, query: &Query) -> Result<Vec<Record>, GatewayError>;

    async fn delete(&self, collection: Collection, id: &RecordId) -> Result<(), GatewayError>;
}
