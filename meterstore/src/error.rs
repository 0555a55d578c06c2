//! Error types for the meterstore storage engine.

use thiserror::Error;

/// The main error type for all meterstore operations.
///
/// Every variant wraps a per-concern error enum. Errors returned by the
/// engine are hard stops: the operation did not take effect and the caller
/// must not retry it with the same input.
#[derive(Error, Debug)]
pub enum MeterStoreError {
    /// Error in a data item specification (unknown signal, unit conflict).
    #[error("spec error: {0}")]
    Spec(#[from] SpecError),

    /// Error in a time-ordered storage operation.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Error in a query (average, time range).
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Error in the durable table layer.
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// Error in store configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error resolving a data store in the registry.
    #[error("holder error: {0}")]
    Holder(#[from] HolderError),
}

/// Errors raised by [`DataItemSpec`](crate::spec::DataItemSpec) and
/// [`DataItem`](crate::item::DataItem).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    /// A signal was looked up that the spec does not contain.
    #[error("signal '{signal}' not found, only have {known:?}")]
    UnknownSignal {
        /// The requested signal.
        signal: String,
        /// The signals the spec does contain, in ordinal order.
        known: Vec<String>,
    },

    /// A signal was added twice.
    #[error("signal '{signal}' is already present")]
    DuplicateSignal {
        /// The duplicated signal.
        signal: String,
    },

    /// Two specs assert different units for the same signal.
    #[error("unit conflict for signal '{signal}': have '{existing}', got '{incoming}'")]
    UnitConflict {
        /// The signal whose units disagree.
        signal: String,
        /// The unit already resolved.
        existing: String,
        /// The conflicting unit.
        incoming: String,
    },

    /// A flat array does not match the spec it is decoded against.
    #[error("array has {found} cells, expected {expected} (timestamp + signals)")]
    ArrayLength {
        /// Cell count required by the spec.
        expected: usize,
        /// Cell count supplied.
        found: usize,
    },
}

/// Errors raised by time-ordered storage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// A circular storage was configured with no capacity.
    #[error("circular storage capacity must be > 0")]
    ZeroCapacity,

    /// An item without a timestamp was offered, or a stored row has none.
    #[error("missing timestamp{}", index.map(|i| format!(" at index {i}")).unwrap_or_default())]
    MissingTimestamp {
        /// The physical index of the offending row, if it was stored.
        index: Option<usize>,
    },

    /// An item with a NaN or infinite timestamp was offered.
    #[error("timestamp must be finite, got {timestamp}")]
    NonFiniteTimestamp {
        /// The offending timestamp.
        timestamp: f64,
    },

    /// A positional overwrite addressed a slot that does not exist.
    #[error("index {index} out of range for storage of length {len}")]
    IndexOutOfRange {
        /// The requested physical index.
        index: usize,
        /// The storage length.
        len: usize,
    },

    /// The time-index search did not converge.
    ///
    /// This indicates broken head/length bookkeeping, never bad input.
    #[error("index search did not converge after {iterations} iterations (lo={lo}, hi={hi})")]
    SearchDiverged {
        /// Lower logical bound when the search gave up.
        lo: usize,
        /// Upper logical bound when the search gave up.
        hi: usize,
        /// Iterations performed.
        iterations: u32,
    },
}

/// Errors raised by query operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The time range is inverted.
    #[error("invalid time range: from {from} > to {to}")]
    InvalidTimeRange {
        /// The start time (seconds since epoch).
        from: f64,
        /// The end time (seconds since epoch).
        to: f64,
    },

    /// A shift could not be converted to samples.
    #[error("invalid shift: {reason}")]
    InvalidShift {
        /// Why the shift is invalid.
        reason: String,
    },
}

/// Errors raised by the durable table layer.
#[derive(Error, Debug)]
pub enum TableError {
    /// Failed to read a table file.
    #[error("failed to read table '{path}': {source}")]
    ReadFailed {
        /// The table file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write or extend a table file.
    #[error("failed to write table '{path}': {source}")]
    WriteFailed {
        /// The table file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to flush a table file to disk.
    #[error("failed to sync table '{path}' to disk: {source}")]
    SyncFailed {
        /// The table file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The table file is corrupted or has an invalid format.
    #[error("table '{path}' is corrupted: {reason}")]
    Corrupted {
        /// The table file path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },

    /// Another process or handle holds the database directory.
    #[error("database '{path}' is locked by another process")]
    DatabaseLocked {
        /// The database directory.
        path: String,
    },

    /// The column metadata could not be encoded or decoded.
    #[error("invalid table metadata '{path}': {source}")]
    Metadata {
        /// The metadata file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A table name that cannot be used as an identifier.
    #[error("invalid table name '{name}': only [A-Za-z0-9_] allowed")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// A positional update addressed a row that does not exist.
    #[error("row {row_id} out of range for table '{table}' with {rows} rows")]
    RowOutOfRange {
        /// The table name.
        table: String,
        /// The 1-based row address.
        row_id: u64,
        /// The number of rows in the table.
        rows: u64,
    },
}

/// Errors raised while validating or loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config '{path}': {source}")]
    Read {
        /// The config path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for the expected shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A persistent store has no backing table.
    #[error("store '{store}' is persistent but has no table")]
    MissingTable {
        /// The store name.
        store: String,
    },

    /// A persistent store was opened without a database.
    #[error("store '{store}' is persistent but no database is open")]
    NoDatabase {
        /// The store name.
        store: String,
    },

    /// A circular store has a zero buffer length.
    #[error("store '{store}' is circular but has no buffer length (must be > 0)")]
    ZeroBufferLength {
        /// The store name.
        store: String,
    },

    /// A store lists no signals.
    #[error("store '{store}' has no signals")]
    NoSignals {
        /// The store name.
        store: String,
    },

    /// A store lists a signal twice.
    #[error("store '{store}' lists signal '{signal}' more than once")]
    DuplicateSignal {
        /// The store name.
        store: String,
        /// The duplicated signal.
        signal: String,
    },

    /// A signal name collides with a serialized result key.
    #[error("store '{store}' uses reserved signal name '{signal}'")]
    ReservedSignal {
        /// The store name.
        store: String,
        /// The reserved name.
        signal: String,
    },

    /// Two stores share a name.
    #[error("store name '{name}' is configured more than once")]
    DuplicateStore {
        /// The duplicated name.
        name: String,
    },

    /// Two persistent stores share a backing table.
    #[error("stores '{first}' and '{second}' both use table '{table}'")]
    SharedTable {
        /// The shared table name.
        table: String,
        /// The store that claimed the table first.
        first: String,
        /// The store that claimed it again.
        second: String,
    },
}

/// Errors raised by the [`DataHolder`](crate::holder::DataHolder) registry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HolderError {
    /// No store with this name is configured.
    #[error("no data store named '{name}', configured: {known:?}")]
    UnknownStore {
        /// The requested name.
        name: String,
        /// The configured store names.
        known: Vec<String>,
    },
}

/// Type alias for `Result<T, MeterStoreError>`.
pub type Result<T> = std::result::Result<T, MeterStoreError>;
