use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("unknown table {0}")]
    UnknownTable(String),

    #[error("interrupted while waiting on storage")]
    Interrupted,

    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed row on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StorageError> for docql_core::error::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Interrupted => docql_core::error::Error::Interrupted,
            other => docql_core::error::Error::CannotPerformQuery(other.to_string()),
        }
    }
}
