//! SurrealDB-backed [`InvestigationStore`] implementation.
//!
//! Stores the full state document per investigation with `version` as a
//! dedicated column; the compare-and-swap is a conditional `UPDATE ...
//! WHERE version = $expected RETURN AFTER`, so a lost race shows up as an
//! empty result set rather than a partial write. Audit entries live in
//! their own append-only table.

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::investigation::{
    EntityRef, InvestigationId, InvestigationState, InvestigationStatus, StateMutation, TimeWindow,
};
use crate::migrations;
use crate::schema::{AuditEntryRow, InvestigationRow};
use crate::storage_traits::{AuditEntry, InvestigationStore, StateDigest, StorageResult};

/// SurrealDB-backed investigation store.
pub struct SurrealInvestigationStore {
    db: Surreal<Any>,
}

impl SurrealInvestigationStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `ice/main`, and runs `init_schema`.
    pub async fn in_memory() -> Result<Self, StateError> {
        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        db.use_ns("ice")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!("SurrealInvestigationStore connected (in-memory)");
        Ok(Self { db })
    }

    /// Create from environment.
    ///
    /// Reads `ICE_SURREALDB_URL`; falls back to local persistence under
    /// `.ice/db` when unset.
    pub async fn from_env() -> Result<Self, StateError> {
        let url = match std::env::var("ICE_SURREALDB_URL") {
            Ok(url) => url,
            Err(_) => {
                let path = ".ice/db";
                std::fs::create_dir_all(path).map_err(|e| {
                    StateError::Connection(format!(
                        "Failed to create database directory {}: {}",
                        path, e
                    ))
                })?;
                let url = format!("surrealkv://{}", path);
                info!("ICE_SURREALDB_URL not set, using local persistence: {}", url);
                url
            }
        };

        let db = surrealdb::engine::any::connect(&url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns("ice")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("SurrealInvestigationStore connected ({})", url);
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_row(&self, id: &str) -> StorageResult<InvestigationRow> {
        let id_owned = id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM investigations WHERE investigation_id = $id")
            .bind(("id", id_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<InvestigationRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound {
                investigation_id: id.to_string(),
            })
    }

    fn row_to_state(row: InvestigationRow) -> StorageResult<InvestigationState> {
        serde_json::from_value(row.state)
            .map_err(|e| StorageError::Backend(format!("malformed state document: {e}")))
    }

    fn state_to_row(state: &InvestigationState) -> StorageResult<InvestigationRow> {
        Ok(InvestigationRow {
            investigation_id: state.investigation_id.0.clone(),
            version: state.version,
            status: state.status.as_str().to_string(),
            state: serde_json::to_value(state)?,
            updated_at: state.updated_at,
        })
    }

    async fn append_audit(
        &self,
        state: &InvestigationState,
        from_version: u64,
        mutation_kind: &str,
    ) -> StorageResult<AuditEntry> {
        let entry = AuditEntry {
            investigation_id: state.investigation_id.clone(),
            // The CAS guarantees a single writer per version bump, so the
            // sequence can be derived from the version it produced.
            seq: state.version - 1,
            from_version,
            to_version: state.version,
            mutation_kind: mutation_kind.to_string(),
            state_digest: StateDigest::of_state(state)?,
            recorded_at: Utc::now(),
        };

        let row = AuditEntryRow {
            investigation_id: entry.investigation_id.0.clone(),
            seq: entry.seq,
            from_version: entry.from_version,
            to_version: entry.to_version,
            mutation_kind: entry.mutation_kind.clone(),
            state_digest: entry.state_digest.as_str().to_string(),
            recorded_at: entry.recorded_at,
        };

        self.db
            .query("CREATE audit_entries CONTENT $row")
            .bind(("row", row))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(entry)
    }

    /// Conditional write: succeeds only when the stored version still equals
    /// `expected_version`. Returns the updated row set (empty on a lost race).
    async fn cas_write(
        &self,
        next: &InvestigationState,
        expected_version: u64,
    ) -> StorageResult<Vec<InvestigationRow>> {
        let row = Self::state_to_row(next)?;
        let id_owned = next.investigation_id.0.clone();
        let mut res = self
            .db
            .query(
                "UPDATE investigations CONTENT $row \
                 WHERE investigation_id = $id AND version = $expected \
                 RETURN AFTER",
            )
            .bind(("row", row))
            .bind(("id", id_owned))
            .bind(("expected", expected_version))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        res.take(0).map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn update_inner(
        &self,
        id: &InvestigationId,
        expected_version: u64,
        mutation: &StateMutation,
    ) -> StorageResult<InvestigationState> {
        let row = self.fetch_row(&id.0).await?;
        if row.version != expected_version {
            return Err(StorageError::VersionConflict {
                investigation_id: id.0.clone(),
                expected: expected_version,
                actual: row.version,
            });
        }

        let mut next = Self::row_to_state(row)?;
        next.apply(mutation)?;
        next.version += 1;
        next.updated_at = Utc::now();

        let written = self.cas_write(&next, expected_version).await?;
        if written.is_empty() {
            // Lost the race between fetch and write; report the live version.
            let current = self.fetch_row(&id.0).await?;
            return Err(StorageError::VersionConflict {
                investigation_id: id.0.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }

        self.append_audit(&next, expected_version, mutation.kind())
            .await?;

        debug!(
            investigation_id = %id,
            version = next.version,
            mutation = mutation.kind(),
            "investigation updated"
        );
        Ok(next)
    }
}

#[async_trait]
impl InvestigationStore for SurrealInvestigationStore {
    async fn create(
        &self,
        entity: EntityRef,
        window: TimeWindow,
        tags: serde_json::Value,
    ) -> StorageResult<InvestigationState> {
        let state = InvestigationState::new(entity, window, tags);
        let row = Self::state_to_row(&state)?;

        self.db
            .query("CREATE investigations CONTENT $row")
            .bind(("row", row))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Creation audit entry at seq 0.
        let entry = AuditEntryRow {
            investigation_id: state.investigation_id.0.clone(),
            seq: 0,
            from_version: 0,
            to_version: state.version,
            mutation_kind: "created".to_string(),
            state_digest: StateDigest::of_state(&state)?.as_str().to_string(),
            recorded_at: Utc::now(),
        };
        self.db
            .query("CREATE audit_entries CONTENT $row")
            .bind(("row", entry))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(investigation_id = %state.investigation_id, "investigation created");
        Ok(state)
    }

    async fn get(&self, id: &InvestigationId) -> StorageResult<InvestigationState> {
        let row = self.fetch_row(&id.0).await?;
        Self::row_to_state(row)
    }

    async fn update(
        &self,
        id: &InvestigationId,
        expected_version: u64,
        mutation: StateMutation,
    ) -> StorageResult<InvestigationState> {
        self.update_inner(id, expected_version, &mutation).await
    }

    async fn cancel(&self, id: &InvestigationId) -> StorageResult<InvestigationState> {
        let mutation = StateMutation::Transition {
            to: InvestigationStatus::Cancelled,
        };
        loop {
            let row = self.fetch_row(&id.0).await?;
            let state = Self::row_to_state(row)?;
            if state.status.is_terminal() {
                return Ok(state);
            }
            match self.update_inner(id, state.version, &mutation).await {
                Ok(next) => return Ok(next),
                // Someone else moved the version; re-read and try again.
                Err(StorageError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn audit_log(&self, id: &InvestigationId) -> StorageResult<Vec<AuditEntry>> {
        let id_owned = id.0.clone();
        let mut res = self
            .db
            .query(
                "SELECT * FROM audit_entries WHERE investigation_id = $id ORDER BY seq ASC",
            )
            .bind(("id", id_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<AuditEntryRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if rows.is_empty() {
            // Distinguish an unknown id from an investigation with no log.
            self.fetch_row(&id.0).await?;
        }

        rows.into_iter()
            .map(|row| {
                Ok(AuditEntry {
                    investigation_id: InvestigationId(row.investigation_id),
                    seq: row.seq,
                    from_version: row.from_version,
                    to_version: row.to_version,
                    mutation_kind: row.mutation_kind,
                    state_digest: StateDigest::try_from(row.state_digest)?,
                    recorded_at: row.recorded_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> EntityRef {
        EntityRef {
            entity_id: "acct-9".into(),
            entity_kind: "account".into(),
        }
    }

    #[tokio::test]
    async fn create_get_roundtrip() {
        let store = SurrealInvestigationStore::in_memory().await.unwrap();
        let state = store
            .create(entity(), TimeWindow::last_days(7), serde_json::json!({"src": "test"}))
            .await
            .unwrap();

        let fetched = store.get(&state.investigation_id).await.unwrap();
        assert_eq!(fetched, state);
    }

    #[tokio::test]
    async fn cas_conflict_on_stale_version() {
        let store = SurrealInvestigationStore::in_memory().await.unwrap();
        let state = store
            .create(entity(), TimeWindow::last_days(7), serde_json::json!({}))
            .await
            .unwrap();
        let id = state.investigation_id.clone();

        store
            .update(
                &id,
                1,
                StateMutation::Transition {
                    to: InvestigationStatus::Dispatched,
                },
            )
            .await
            .unwrap();

        let err = store
            .update(
                &id,
                1,
                StateMutation::Transition {
                    to: InvestigationStatus::AgentsRunning,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { actual: 2, .. }));
    }

    #[tokio::test]
    async fn cancel_then_audit_log() {
        let store = SurrealInvestigationStore::in_memory().await.unwrap();
        let state = store
            .create(entity(), TimeWindow::last_days(7), serde_json::json!({}))
            .await
            .unwrap();
        let id = state.investigation_id.clone();

        let cancelled = store.cancel(&id).await.unwrap();
        assert_eq!(cancelled.status, InvestigationStatus::Cancelled);
        assert_eq!(cancelled.version, 2);

        // Idempotent second cancel.
        let again = store.cancel(&id).await.unwrap();
        assert_eq!(again.version, 2);

        let audit = store.audit_log(&id).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].mutation_kind, "created");
        assert_eq!(audit[1].mutation_kind, "transition");
        assert_eq!(audit[1].to_version, 2);
    }
}
