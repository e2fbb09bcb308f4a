use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A field name outside the collection's column whitelist.
    #[error("Unknown field `{field}` for collection {collection}")]
    UnknownField { collection: String, field: String },

    /// A field that only the store may assign (e.g. `id`).
    #[error("Field `{0}` is read-only")]
    ReadOnlyField(String),

    /// A required column was not supplied on create.
    #[error("Missing required field `{0}`")]
    MissingField(String),

    /// A value that cannot be stored in the target column.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// `kill` on a live query that is not open.
    #[error("Live query not found: {0}")]
    LiveQueryNotFound(Uuid),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
