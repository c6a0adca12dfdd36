//! Error types for the gattdb library
//!
//! `DbError` covers construction, capacity, consistency and persistence
//! failures of database operations. Protocol level access failures are not
//! errors of the database and are reported as [`crate::att::AttErrorCode`].

use thiserror::Error;

/// Errors returned by attribute database operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("Service is not allocated in this database")]
    InvalidService,

    #[error("Attribute index {0} is beyond the end of the service")]
    AttributeNotFound(u16),

    #[error("Attribute index {0} has not been added")]
    InvalidAttribute(u16),

    #[error("Attribute index {0} has already been added")]
    InUse(u16),

    #[error("Invalid attribute template: {0}")]
    InvalidTemplate(&'static str),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("Value type does not match the attribute")]
    TypeMismatch,

    #[error("Attribute value cannot be changed")]
    Immutable,

    #[error("Value is outside of the allowed range")]
    OutOfRange,

    #[error("Invalid value length: {len} (max {max})")]
    InvalidLength { len: usize, max: u16 },

    #[error("Requested handle range could not be allocated")]
    HandleRangeUnavailable,

    #[error("Insufficient resources")]
    NoResources,

    #[error("Operation not allowed while GATT connections exist")]
    Busy,

    #[error("Service is not active")]
    NotActive,

    #[error("Operation not allowed on a ROM resident service")]
    RomService,

    #[error("Attribute is not a client own instance attribute")]
    NotClientOwnInstance,

    #[error("No pending request for token {0}")]
    UnknownRequest(u32),

    #[error("Pending request {0} does not match the response")]
    RequestMismatch(u32),

    #[error("Persistent store error: {0}")]
    Persistence(String),

    #[error("Corrupt persistent record {id}: {reason}")]
    CorruptRecord { id: u32, reason: String },

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DbError {
    /// Busy errors are transient; the caller should retry once connections
    /// have gone away.
    pub fn is_busy(&self) -> bool {
        matches!(self, DbError::Busy)
    }
}

/// Database result type
pub type DbResult<T> = Result<T, DbError>;
