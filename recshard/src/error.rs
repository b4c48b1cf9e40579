//! Error types for recshard

use thiserror::Error;

/// Result type alias using recshard's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for recshard operations
#[derive(Error, Debug)]
pub enum Error {
    /// Lengths, offsets, and values disagree about geometry.
    #[error("Shape error: {0}")]
    Shape(String),

    /// A requested feature or table name does not exist.
    #[error("Unknown key: {0}")]
    MissingKey(String),

    /// A key appeared more than once while building a collection.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Invalid table declarations, routing, topology, or constraints.
    #[error("Config error: {0}")]
    Config(String),

    /// No legal sharding strategy, or a plan that fails validation.
    #[error("Planning error: {0}")]
    Planning(String),

    /// An embedding id outside its table's capacity.
    #[error("Index {index} out of range for table '{table}' (capacity {capacity})")]
    IndexOutOfRange {
        table: String,
        index: u64,
        capacity: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
