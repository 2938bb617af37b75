use thiserror::Error;

/// Error type for planning, assembling and iterating query results.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A row key whose length or layout disagrees with the configured widths.
    #[error("Malformed row key ({len} bytes): {details}")]
    MalformedKey { len: usize, details: String },

    /// Storage returned data that contradicts what the query asked for
    /// (wrong metric, series identity mismatch, undecodable cells).
    #[error("Illegal data: {0}")]
    IllegalData(String),

    #[error("No such aggregator: {0}")]
    UnknownAggregator(String),

    /// A metric, tag name or tag value name with no identifier.
    #[error("No such name for {kind}: '{name}'")]
    NoSuchName { kind: &'static str, name: String },

    /// An identifier with no registered name.
    #[error("No such id for {kind}: {id:?}")]
    NoSuchId { kind: &'static str, id: Vec<u8> },

    #[error("Invalid time range: start={start}, end={end}")]
    InvalidTimeRange { start: u64, end: u64 },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Failure reported by the storage collaborator, passed through unchanged.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl<T> From<std::sync::PoisonError<T>> for QueryError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        QueryError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}

impl From<config::ConfigError> for QueryError {
    fn from(err: config::ConfigError) -> Self {
        QueryError::Config(err.to_string())
    }
}
