//! In-memory fake for the storage traits (tests and embedded use).
//!
//! `MemoryInvestigationStore` satisfies the [`InvestigationStore`] contract
//! with no external dependencies. The CAS check, mutation apply, and audit
//! append all happen under one lock, so version conflicts are exact.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::investigation::{
    EntityRef, InvestigationId, InvestigationState, InvestigationStatus, StateMutation, TimeWindow,
};
use crate::storage_traits::{AuditEntry, InvestigationStore, StateDigest, StorageResult};

#[derive(Debug)]
struct StoredInvestigation {
    state: InvestigationState,
    audit: Vec<AuditEntry>,
}

/// In-memory investigation store backed by a `Mutex<HashMap>`.
#[derive(Debug, Default)]
pub struct MemoryInvestigationStore {
    investigations: Mutex<HashMap<String, StoredInvestigation>>,
}

impl MemoryInvestigationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn audit_entry(
    state: &InvestigationState,
    seq: u64,
    from_version: u64,
    mutation_kind: &str,
) -> StorageResult<AuditEntry> {
    Ok(AuditEntry {
        investigation_id: state.investigation_id.clone(),
        seq,
        from_version,
        to_version: state.version,
        mutation_kind: mutation_kind.to_string(),
        state_digest: StateDigest::of_state(state)?,
        recorded_at: Utc::now(),
    })
}

#[async_trait]
impl InvestigationStore for MemoryInvestigationStore {
    async fn create(
        &self,
        entity: EntityRef,
        window: TimeWindow,
        tags: serde_json::Value,
    ) -> StorageResult<InvestigationState> {
        let state = InvestigationState::new(entity, window, tags);
        let entry = audit_entry(&state, 0, 0, "created")?;

        let mut map = self.investigations.lock().unwrap();
        map.insert(
            state.investigation_id.0.clone(),
            StoredInvestigation {
                state: state.clone(),
                audit: vec![entry],
            },
        );
        Ok(state)
    }

    async fn get(&self, id: &InvestigationId) -> StorageResult<InvestigationState> {
        let map = self.investigations.lock().unwrap();
        map.get(&id.0)
            .map(|s| s.state.clone())
            .ok_or_else(|| StorageError::NotFound {
                investigation_id: id.0.clone(),
            })
    }

    async fn update(
        &self,
        id: &InvestigationId,
        expected_version: u64,
        mutation: StateMutation,
    ) -> StorageResult<InvestigationState> {
        let mut map = self.investigations.lock().unwrap();
        let stored = map.get_mut(&id.0).ok_or_else(|| StorageError::NotFound {
            investigation_id: id.0.clone(),
        })?;

        if stored.state.version != expected_version {
            return Err(StorageError::VersionConflict {
                investigation_id: id.0.clone(),
                expected: expected_version,
                actual: stored.state.version,
            });
        }

        // Apply on a scratch copy so a rejected mutation leaves nothing behind.
        let mut next = stored.state.clone();
        next.apply(&mutation)?;
        next.version += 1;
        next.updated_at = Utc::now();

        let seq = stored.audit.len() as u64;
        let entry = audit_entry(&next, seq, stored.state.version, mutation.kind())?;

        stored.state = next.clone();
        stored.audit.push(entry);
        Ok(next)
    }

    async fn cancel(&self, id: &InvestigationId) -> StorageResult<InvestigationState> {
        let mut map = self.investigations.lock().unwrap();
        let stored = map.get_mut(&id.0).ok_or_else(|| StorageError::NotFound {
            investigation_id: id.0.clone(),
        })?;

        if stored.state.status.is_terminal() {
            return Ok(stored.state.clone());
        }

        let mutation = StateMutation::Transition {
            to: InvestigationStatus::Cancelled,
        };
        let mut next = stored.state.clone();
        next.apply(&mutation)?;
        next.version += 1;
        next.updated_at = Utc::now();

        let seq = stored.audit.len() as u64;
        let entry = audit_entry(&next, seq, stored.state.version, mutation.kind())?;

        stored.state = next.clone();
        stored.audit.push(entry);
        Ok(next)
    }

    async fn audit_log(&self, id: &InvestigationId) -> StorageResult<Vec<AuditEntry>> {
        let map = self.investigations.lock().unwrap();
        let stored = map.get(&id.0).ok_or_else(|| StorageError::NotFound {
            investigation_id: id.0.clone(),
        })?;
        let mut entries = stored.audit.clone();
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::investigation::{AgentResult, AgentStatus, Domain};

    fn entity() -> EntityRef {
        EntityRef {
            entity_id: "acct-1".into(),
            entity_kind: "account".into(),
        }
    }

    async fn created(store: &MemoryInvestigationStore) -> InvestigationState {
        store
            .create(entity(), TimeWindow::last_days(7), serde_json::json!({}))
            .await
            .unwrap()
    }

    fn success(domain: Domain) -> AgentResult {
        AgentResult {
            domain,
            status: AgentStatus::Success,
            findings: serde_json::json!({}),
            confidence: Some(0.9),
            failure: None,
            duration_ms: 10,
            attempt: 1,
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_starts_pending_version_one() {
        let store = MemoryInvestigationStore::new();
        let state = created(&store).await;
        assert_eq!(state.status, InvestigationStatus::Pending);
        assert_eq!(state.version, 1);

        let audit = store.audit_log(&state.investigation_id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].mutation_kind, "created");
        assert_eq!(audit[0].seq, 0);
    }

    #[tokio::test]
    async fn update_bumps_version_and_appends_audit() {
        let store = MemoryInvestigationStore::new();
        let state = created(&store).await;

        let next = store
            .update(
                &state.investigation_id,
                1,
                StateMutation::Transition {
                    to: InvestigationStatus::Dispatched,
                },
            )
            .await
            .unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.status, InvestigationStatus::Dispatched);

        let audit = store.audit_log(&state.investigation_id).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[1].from_version, 1);
        assert_eq!(audit[1].to_version, 2);
    }

    #[tokio::test]
    async fn stale_version_conflicts_and_leaves_state_unchanged() {
        let store = MemoryInvestigationStore::new();
        let state = created(&store).await;

        store
            .update(
                &state.investigation_id,
                1,
                StateMutation::Transition {
                    to: InvestigationStatus::Dispatched,
                },
            )
            .await
            .unwrap();

        // Replay with the stale version.
        let err = store
            .update(
                &state.investigation_id,
                1,
                StateMutation::Transition {
                    to: InvestigationStatus::AgentsRunning,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { expected: 1, actual: 2, .. }));

        let current = store.get(&state.investigation_id).await.unwrap();
        assert_eq!(current.status, InvestigationStatus::Dispatched);
        assert_eq!(current.version, 2);
    }

    #[tokio::test]
    async fn rejected_mutation_writes_nothing() {
        let store = MemoryInvestigationStore::new();
        let state = created(&store).await;

        // Recording a result while PENDING is illegal.
        let err = store
            .update(
                &state.investigation_id,
                1,
                StateMutation::RecordAgentResult {
                    result: success(Domain::Network),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidMutation { .. }));

        let current = store.get(&state.investigation_id).await.unwrap();
        assert_eq!(current.version, 1);
        assert!(current.results.is_empty());
        assert_eq!(
            store.audit_log(&state.investigation_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_terminal() {
        let store = MemoryInvestigationStore::new();
        let state = created(&store).await;

        let cancelled = store.cancel(&state.investigation_id).await.unwrap();
        assert_eq!(cancelled.status, InvestigationStatus::Cancelled);
        assert_eq!(cancelled.version, 2);

        // Second cancel is a no-op returning current state.
        let again = store.cancel(&state.investigation_id).await.unwrap();
        assert_eq!(again.version, 2);
        assert_eq!(
            store.audit_log(&state.investigation_id).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = MemoryInvestigationStore::new();
        let err = store.get(&InvestigationId::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn audit_versions_strictly_increase() {
        let store = MemoryInvestigationStore::new();
        let state = created(&store).await;
        let id = state.investigation_id.clone();

        let mut version = 1;
        for to in [
            InvestigationStatus::Dispatched,
            InvestigationStatus::AgentsRunning,
            InvestigationStatus::Consolidating,
        ] {
            version = store
                .update(&id, version, StateMutation::Transition { to })
                .await
                .unwrap()
                .version;
        }

        let audit = store.audit_log(&id).await.unwrap();
        for pair in audit.windows(2) {
            assert!(pair[1].to_version > pair[0].to_version);
            assert_eq!(pair[1].seq, pair[0].seq + 1);
        }
    }
}
