//! Error types for the ORM.

use spire_dbal::DbalError;
use thiserror::Error;

/// ORM-specific errors.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Error from the database layer.
    #[error(transparent)]
    Dbal(#[from] DbalError),

    /// Malformed record or relation declaration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No relation, loader or relation schema exists for a type.
    #[error("cannot resolve relation: {0}")]
    RelationResolution(String),

    /// The schema has no record with this class.
    #[error("undefined record \"{0}\"")]
    UndefinedRecord(String),

    /// The record declares no relation with this name.
    #[error("record \"{record}\" has no relation \"{relation}\"")]
    UndefinedRelation {
        /// Record class.
        record: String,
        /// Requested relation.
        relation: String,
    },

    /// The memory store could not be read or written.
    #[error("memory error: {0}")]
    Memory(String),

    /// Cached schema could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, OrmError>;
