//! Error types for ice-state.

use thiserror::Error;

/// Errors surfaced by the [`crate::storage_traits::InvestigationStore`] API.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No investigation exists under the given id.
    #[error("investigation not found: {investigation_id}")]
    NotFound { investigation_id: String },

    /// Compare-and-swap mismatch: the stored version moved on under the caller.
    #[error("version conflict on {investigation_id}: expected {expected}, actual {actual}")]
    VersionConflict {
        investigation_id: String,
        expected: u64,
        actual: u64,
    },

    /// The requested status transition is not legal from the current status.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A recorded agent result may only be superseded by a higher attempt.
    #[error("stale result for {domain}: attempt {attempt} does not supersede {existing}")]
    StaleResult {
        domain: String,
        attempt: u32,
        existing: u32,
    },

    /// The mutation is not applicable to the investigation's current status.
    #[error("invalid mutation {mutation} while {status}")]
    InvalidMutation { mutation: String, status: String },

    /// Digest string failed validation.
    #[error("invalid state digest: {digest}")]
    InvalidDigest { digest: String },

    /// Serialization failure while persisting or digesting state.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Backend-specific failure (connection loss, malformed row, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors from the SurrealDB connection layer.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    Schema(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_display_carries_both_versions() {
        let err = StorageError::VersionConflict {
            investigation_id: "inv-1".into(),
            expected: 3,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("actual 5"));
    }

    #[test]
    fn state_error_converts_to_backend() {
        let err: StorageError = StateError::Connection("refused".into()).into();
        assert!(err.to_string().contains("refused"));
    }
}
