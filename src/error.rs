use thiserror::Error;

/// Failure of a single call against the remote ledger API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// 4xx responses other than 408/429 will fail the same way on every retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Connection(_) | GatewayError::Timeout(_) => true,
            GatewayError::Server { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            GatewayError::Protocol(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Remote failure: {0}")]
    RemoteFailure(#[from] GatewayError),

    #[error("Store is not ready")]
    NotReady,

    #[error("Collection '{0}' is not declared in the schema")]
    UnknownCollection(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Query encoding error: {0}")]
    QueryEncoding(#[from] serde_urlencoded::ser::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl From<rocksdb::Error> for SyncError {
    fn from(err: rocksdb::Error) -> Self {
        SyncError::StorageFailure(err.into_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::StorageFailure(format!("storage task failed: {}", err))
    }
}

impl SyncError {
    /// Transient conditions the caller may retry shortly.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::NotReady => true,
            SyncError::RemoteFailure(e) => e.is_retryable(),
            _ => false,
        }
    }
}
