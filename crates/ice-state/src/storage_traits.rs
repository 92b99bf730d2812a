//! Storage trait definitions for ICE.
//!
//! `InvestigationStore` is the single write path for investigation state:
//! versioned compare-and-swap updates, an append-only audit log, and no
//! hard deletes. An in-memory fake lives in the `fakes` module; the
//! SurrealDB backend in `surreal_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;
use crate::investigation::{
    EntityRef, InvestigationId, InvestigationState, StateMutation, TimeWindow,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// StateDigest
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a canonically serialized investigation state.
///
/// The inner field is private so the string is always valid lowercase hex
/// produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateDigest(String);

impl StateDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        StateDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of a state's canonical JSON serialization.
    pub fn of_state(state: &InvestigationState) -> StorageResult<Self> {
        let bytes = serde_json::to_vec(state)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for StateDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(StateDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for StateDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AuditEntry
// ---------------------------------------------------------------------------

/// One append-only audit record, written on every successful update.
///
/// Entries are appended in completion order with wall-clock timestamps for
/// external observers that need temporal ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub investigation_id: InvestigationId,
    /// Monotonic sequence number within the investigation (0 = creation).
    pub seq: u64,
    pub from_version: u64,
    pub to_version: u64,
    /// Stable mutation tag ("created", "transition", "record_agent_result", ...).
    pub mutation_kind: String,
    /// Digest of the post-mutation state.
    pub state_digest: StateDigest,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// InvestigationStore
// ---------------------------------------------------------------------------

/// Persistent investigation state store.
///
/// Guarantees:
/// - `version` strictly increases on every successful update.
/// - `update` applies its mutation only when `expected_version` matches the
///   stored version; on mismatch it fails with `VersionConflict` and writes
///   nothing.
/// - Every successful write appends exactly one [`AuditEntry`].
/// - Terminal investigations are retained, never hard-deleted.
#[async_trait]
pub trait InvestigationStore: Send + Sync {
    /// Create a new investigation in PENDING at version 1.
    ///
    /// Always succeeds (barring backend failure) and appends the "created"
    /// audit entry at seq 0.
    async fn create(
        &self,
        entity: EntityRef,
        window: TimeWindow,
        tags: serde_json::Value,
    ) -> StorageResult<InvestigationState>;

    /// Fetch current state. `StorageError::NotFound` if absent.
    async fn get(&self, id: &InvestigationId) -> StorageResult<InvestigationState>;

    /// Compare-and-swap update: apply `mutation` only if the stored version
    /// equals `expected_version`, then bump the version, refresh
    /// `updated_at`, append an audit entry, and return the new state.
    async fn update(
        &self,
        id: &InvestigationId,
        expected_version: u64,
        mutation: StateMutation,
    ) -> StorageResult<InvestigationState>;

    /// Transition to CANCELLED from any non-terminal status.
    ///
    /// Idempotent: already-terminal investigations are returned unchanged.
    async fn cancel(&self, id: &InvestigationId) -> StorageResult<InvestigationState>;

    /// Full audit log, ordered by `seq`.
    async fn audit_log(&self, id: &InvestigationId) -> StorageResult<Vec<AuditEntry>>;
}
