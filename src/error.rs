use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("entry store unavailable during {operation}: {source}")]
    StoreUnavailable {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Wrap a failure raised by the entry store so callers can tell store
    /// faults apart from encoder faults.
    pub fn store_fault(operation: &'static str, err: Error) -> Self {
        match err {
            fault @ Error::StoreUnavailable { .. } => fault,
            other => Error::StoreUnavailable {
                operation,
                source: Box::new(other),
            },
        }
    }

    /// Normalize any failure raised while embedding text into
    /// [`Error::Encoding`].
    pub fn encoding_fault(err: Error) -> Self {
        match err {
            fault @ Error::Encoding(_) => fault,
            other => Error::Encoding(other.to_string()),
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidQuery(_) => "invalid_query",
            Error::StoreUnavailable { .. } => "store_unavailable",
            Error::Encoding(_) => "encoding_error",
            Error::NotFound { .. } => "not_found",
            Error::Config(_) | Error::DataDir(_) => "configuration",
            _ => "internal",
        }
    }
}
