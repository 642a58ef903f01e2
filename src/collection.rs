//! Remote collections and read queries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{SyncError, SyncResult};
use crate::storage::schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Transactions,
    Ledgers,
    Balances,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Transactions,
        Collection::Ledgers,
        Collection::Balances,
    ];

    /// Local store holding the cached copy.
    pub fn store_name(&self) -> &'static str {
        match self {
            Collection::Transactions => schema::TRANSACTIONS,
            Collection::Ledgers => schema::LEDGERS,
            Collection::Balances => schema::BALANCES,
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Collection::Transactions => "/api/transactions",
            Collection::Ledgers => "/api/Ledgers",
            Collection::Balances => "/api/balances",
        }
    }

    /// Balances are computed server-side and cannot be created.
    pub fn accepts_creates(&self) -> bool {
        !matches!(self, Collection::Balances)
    }

    /// Per-domain pending store used by version 1 and 2 schemas.
    pub fn legacy_pending_store(&self) -> Option<&'static str> {
        match self {
            Collection::Transactions => Some(schema::LEGACY_PENDING_TRANSACTIONS),
            Collection::Ledgers => Some(schema::LEGACY_PENDING_LEDGERS),
            Collection::Balances => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.store_name()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "transactions" | "transaction" => Ok(Collection::Transactions),
            "ledgers" | "ledger" | "ledgernames" => Ok(Collection::Ledgers),
            "balances" | "balance" => Ok(Collection::Balances),
            _ => Err(SyncError::UnknownCollection(s.to_string())),
        }
    }
}

/// Optional filters on a read. An empty query reads the whole collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn on_date(date: impl Into<String>) -> Self {
        Self {
            date: Some(date.into()),
            name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            date: None,
            name: Some(name.into()),
        }
    }

    pub fn is_unfiltered(&self) -> bool {
        self.date.is_none() && self.name.is_none()
    }

    /// Query-string pairs in a fixed order.
    pub fn params(&self) -> Vec<(&'static str, &str)> {
        let mut params = Vec::new();
        if let Some(date) = &self.date {
            params.push(("date", date.as_str()));
        }
        if let Some(name) = &self.name {
            params.push(("name", name.as_str()));
        }
        params
    }

    /// Canonical key for the cached snapshot of this query's result. Filter
    /// values are form-encoded so distinct queries never share a key.
    pub fn cache_key(&self, collection: Collection) -> SyncResult<String> {
        let params = self.params();
        if params.is_empty() {
            return Ok(collection.to_string());
        }
        Ok(format!(
            "{}?{}",
            collection,
            serde_urlencoded::to_string(&params)?
        ))
    }
}
