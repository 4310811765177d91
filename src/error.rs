//! Error kinds produced by the registry engine, and their wire error codes.
//!
//! The engine itself never serializes these to JSON (that's the HTTP layer's
//! job), but the mapping in [`Error::code`] is part of the core contract: the
//! same [`ErrorCode`] must be produced bit-exactly regardless of which
//! transport sits on top.

use std::fmt;

/// Numeric error code exposed on the wire (`{"error_code": <int>, ...}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u32);

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("schema is invalid: {0}")]
    InvalidSchema(String),

    #[error("could not resolve reference '{name}' -> {subject}/{version}")]
    UnresolvedReference {
        name: String,
        subject: String,
        version: i32,
    },

    #[error("unknown schema type '{0}'")]
    InvalidSchemaType(String),

    #[error("invalid version '{0}': must be in [1, 2147483647], \"latest\", or -1")]
    InvalidVersion(String),

    #[error("invalid compatibility level '{0}'")]
    InvalidCompatibilityLevel(String),

    #[error("invalid mode '{0}'")]
    InvalidMode(String),

    #[error("subject '{0}' not found")]
    SubjectNotFound(String),

    #[error("version {version} not found for subject '{subject}'")]
    VersionNotFound { subject: String, version: i32 },

    #[error("schema not found")]
    SchemaNotFound,

    #[error("subject '{0}' is soft-deleted")]
    SubjectSoftDeleted(String),

    #[error("subject '{0}' is not soft-deleted")]
    SubjectNotSoftDeleted(String),

    #[error("version {version} of subject '{subject}' is soft-deleted")]
    VersionSoftDeleted { subject: String, version: i32 },

    #[error("version {version} of subject '{subject}' is not soft-deleted")]
    VersionNotSoftDeleted { subject: String, version: i32 },

    #[error("no compatibility level configured for subject '{0}'")]
    NoSubjectCompat(String),

    #[error("no mode configured for subject '{0}'")]
    NoSubjectMode(String),

    #[error("schema being registered is incompatible with an earlier schema: {}", .messages.join("; "))]
    IncompatibleSchema { messages: Vec<String> },

    #[error("operation not permitted in the current mode")]
    OperationNotPermitted,

    #[error("schema is referenced by other schemas and cannot be deleted")]
    ReferenceExists,

    #[error("schema id {id} already registered with a different fingerprint")]
    SchemaIdConflict { id: u32 },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error onto the wire error code table from the API contract.
    pub fn code(&self) -> ErrorCode {
        use Error::*;
        let code = match self {
            InvalidSchema(_) | UnresolvedReference { .. } => 42201,
            InvalidSchemaType(_) | InvalidVersion(_) => 42202,
            InvalidCompatibilityLevel(_) => 42203,
            InvalidMode(_) => 42204,
            OperationNotPermitted => 42205,
            ReferenceExists => 42206,
            SubjectNotFound(_) => 40401,
            VersionNotFound { .. } => 40402,
            SchemaNotFound => 40403,
            SubjectSoftDeleted(_) => 40404,
            SubjectNotSoftDeleted(_) => 40405,
            VersionSoftDeleted { .. } => 40406,
            VersionNotSoftDeleted { .. } => 40407,
            NoSubjectCompat(_) => 40408,
            NoSubjectMode(_) => 40409,
            IncompatibleSchema { .. } => 409,
            SchemaIdConflict { .. } => 42201,
            StorageError(_) => 50002,
            Internal(_) => 50001,
        };
        ErrorCode(code)
    }

    pub fn storage(msg: impl fmt::Display) -> Self {
        Error::StorageError(msg.to_string())
    }

    pub fn internal(msg: impl fmt::Display) -> Self {
        Error::Internal(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incompatible_schema_maps_to_409() {
        let err = Error::IncompatibleSchema {
            messages: vec!["BACKWARD compatibility check failed against version 3".into()],
        };
        assert_eq!(err.code().0, 409);
    }

    #[test]
    fn version_not_soft_deleted_maps_to_40407() {
        let err = Error::VersionNotSoftDeleted {
            subject: "users-value".into(),
            version: 1,
        };
        assert_eq!(err.code().0, 40407);
    }
}
