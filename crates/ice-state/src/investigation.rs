//! Investigation domain records and the lifecycle state machine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// Unique identifier for an investigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvestigationId(pub String);

impl InvestigationId {
    /// Generate a new random id.
    pub fn new() -> Self {
        InvestigationId(Uuid::new_v4().to_string())
    }
}

impl Default for InvestigationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvestigationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the entity under investigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Identifier of the entity in the caller's system.
    pub entity_id: String,
    /// Entity classification (account, merchant, device owner, ...).
    pub entity_kind: String,
}

/// Time window an investigation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Window ending now and reaching back the given number of days.
    pub fn last_days(days: i64) -> Self {
        let to = Utc::now();
        Self {
            from: to - chrono::Duration::days(days),
            to,
        }
    }
}

/// One investigative dimension.
///
/// The first five are mutually independent; `Risk` joins on all of them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Network,
    Device,
    Location,
    Logs,
    Authentication,
    Risk,
}

impl Domain {
    /// The independent dimensions, dispatched concurrently.
    pub const INDEPENDENT: [Domain; 5] = [
        Domain::Network,
        Domain::Device,
        Domain::Location,
        Domain::Logs,
        Domain::Authentication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Network => "network",
            Domain::Device => "device",
            Domain::Location => "location",
            Domain::Logs => "logs",
            Domain::Authentication => "authentication",
            Domain::Risk => "risk",
        }
    }

    pub fn is_independent(&self) -> bool {
        !matches!(self, Domain::Risk)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Investigation lifecycle status.
///
/// `Pending -> Dispatched -> AgentsRunning -> Consolidating -> {Completed | Failed}`,
/// with `Cancelled` reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvestigationStatus {
    Pending,
    Dispatched,
    AgentsRunning,
    Consolidating,
    Completed,
    Failed,
    Cancelled,
}

impl InvestigationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvestigationStatus::Completed
                | InvestigationStatus::Failed
                | InvestigationStatus::Cancelled
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: InvestigationStatus) -> bool {
        use InvestigationStatus::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            Cancelled => true,
            Dispatched => matches!(self, Pending),
            AgentsRunning => matches!(self, Dispatched),
            Consolidating => matches!(self, AgentsRunning),
            Completed => matches!(self, Consolidating),
            // Infrastructure failures can surface at any non-terminal point.
            Failed => true,
            Pending => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvestigationStatus::Pending => "PENDING",
            InvestigationStatus::Dispatched => "DISPATCHED",
            InvestigationStatus::AgentsRunning => "AGENTS_RUNNING",
            InvestigationStatus::Consolidating => "CONSOLIDATING",
            InvestigationStatus::Completed => "COMPLETED",
            InvestigationStatus::Failed => "FAILED",
            InvestigationStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution status of a single domain agent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Success,
    Partial,
    Failed,
    Cancelled,
}

/// Classification of a domain agent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    Validation,
    Unknown,
}

impl FailureKind {
    /// Only timeouts and rate limits are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::RateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Validation => "validation",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One domain agent's output for one attempt.
///
/// Immutable once recorded; a retry records a superseding result with a
/// strictly greater `attempt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub domain: Domain,
    pub status: AgentStatus,
    /// Opaque structured findings payload.
    pub findings: serde_json::Value,
    /// Local confidence in [0,1], absent when the agent could not judge.
    pub confidence: Option<f64>,
    /// Failure classification, present when `status` is FAILED.
    pub failure: Option<FailureKind>,
    pub duration_ms: u64,
    /// Attempt counter, starting at 1.
    pub attempt: u32,
    pub finished_at: DateTime<Utc>,
}

impl AgentResult {
    /// Whether this result carries findings usable downstream.
    pub fn is_resolved(&self) -> bool {
        matches!(self.status, AgentStatus::Success | AgentStatus::Partial)
    }
}

/// Tag describing why consolidation fell back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackLevel {
    /// Fewer valid domains than the configured minimum.
    BelowMinimum,
    /// No domain produced a valid confidence at all.
    NoValidConfidence,
}

/// Investigation-level confidence derived from the per-domain results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedConfidence {
    /// Weighted confidence in [0,1].
    pub score: f64,
    /// The per-domain weights actually used (sum to 1 when non-empty).
    pub weights_used: BTreeMap<Domain, f64>,
    pub fallback: bool,
    pub fallback_level: Option<FallbackLevel>,
}

/// One line of the risk narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeEntry {
    pub domain: Domain,
    pub contribution: f64,
    pub summary: String,
}

/// Final risk score plus its ranked explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Estimated fraud likelihood in [0,1].
    pub score: f64,
    /// Significant contributions, ordered by contribution descending
    /// (domain name ascending on exact ties).
    pub narrative: Vec<NarrativeEntry>,
}

/// Full state of one investigation.
///
/// Owned exclusively by the state store and mutated only through its
/// versioned update API. Never hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationState {
    pub investigation_id: InvestigationId,
    pub entity: EntityRef,
    pub window: TimeWindow,
    pub status: InvestigationStatus,
    /// Strictly increases on every successful update; starts at 1.
    pub version: u64,
    pub results: BTreeMap<Domain, AgentResult>,
    pub consolidated: Option<ConsolidatedConfidence>,
    pub risk: Option<RiskAssessment>,
    /// Set when any domain resolved below SUCCESS or the deadline fired.
    pub degraded: bool,
    /// Caller-supplied metadata, carried through untouched.
    pub tags: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvestigationState {
    /// Fresh PENDING state at version 1.
    pub fn new(entity: EntityRef, window: TimeWindow, tags: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            investigation_id: InvestigationId::new(),
            entity,
            window,
            status: InvestigationStatus::Pending,
            version: 1,
            results: BTreeMap::new(),
            consolidated: None,
            risk: None,
            degraded: false,
            tags,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a mutation in place, enforcing the state-machine rules.
    ///
    /// Does not touch `version` or `updated_at` — the store owns those.
    pub fn apply(&mut self, mutation: &StateMutation) -> Result<(), StorageError> {
        match mutation {
            StateMutation::Transition { to } => {
                if !self.status.can_transition_to(*to) {
                    return Err(StorageError::InvalidTransition {
                        from: self.status.to_string(),
                        to: to.to_string(),
                    });
                }
                self.status = *to;
            }
            StateMutation::RecordAgentResult { result } => {
                // Cancelled is included so results resolved during the
                // cancellation grace period are preserved.
                let recordable = matches!(
                    self.status,
                    InvestigationStatus::AgentsRunning
                        | InvestigationStatus::Consolidating
                        | InvestigationStatus::Cancelled
                );
                if !recordable {
                    return Err(StorageError::InvalidMutation {
                        mutation: mutation.kind().to_string(),
                        status: self.status.to_string(),
                    });
                }
                if let Some(existing) = self.results.get(&result.domain) {
                    if result.attempt <= existing.attempt {
                        return Err(StorageError::StaleResult {
                            domain: result.domain.to_string(),
                            attempt: result.attempt,
                            existing: existing.attempt,
                        });
                    }
                }
                self.results.insert(result.domain, result.clone());
            }
            StateMutation::RecordConsolidated { consolidated } => {
                if self.status != InvestigationStatus::Consolidating {
                    return Err(StorageError::InvalidMutation {
                        mutation: mutation.kind().to_string(),
                        status: self.status.to_string(),
                    });
                }
                self.consolidated = Some(consolidated.clone());
            }
            StateMutation::RecordRisk { risk } => {
                if self.status != InvestigationStatus::Consolidating {
                    return Err(StorageError::InvalidMutation {
                        mutation: mutation.kind().to_string(),
                        status: self.status.to_string(),
                    });
                }
                self.risk = Some(risk.clone());
            }
            StateMutation::MarkDegraded => {
                if self.status.is_terminal() {
                    return Err(StorageError::InvalidMutation {
                        mutation: mutation.kind().to_string(),
                        status: self.status.to_string(),
                    });
                }
                self.degraded = true;
            }
        }
        Ok(())
    }
}

/// A single versioned mutation of an [`InvestigationState`].
///
/// Applied by the store under compare-and-swap; each variant maps to one
/// audit-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateMutation {
    Transition { to: InvestigationStatus },
    RecordAgentResult { result: AgentResult },
    RecordConsolidated { consolidated: ConsolidatedConfidence },
    RecordRisk { risk: RiskAssessment },
    MarkDegraded,
}

impl StateMutation {
    /// Stable tag recorded in the audit log.
    pub fn kind(&self) -> &'static str {
        match self {
            StateMutation::Transition { .. } => "transition",
            StateMutation::RecordAgentResult { .. } => "record_agent_result",
            StateMutation::RecordConsolidated { .. } => "record_consolidated",
            StateMutation::RecordRisk { .. } => "record_risk",
            StateMutation::MarkDegraded => "mark_degraded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> EntityRef {
        EntityRef {
            entity_id: "acct-77".into(),
            entity_kind: "account".into(),
        }
    }

    fn state() -> InvestigationState {
        InvestigationState::new(entity(), TimeWindow::last_days(30), serde_json::json!({}))
    }

    fn result(domain: Domain, attempt: u32) -> AgentResult {
        AgentResult {
            domain,
            status: AgentStatus::Success,
            findings: serde_json::json!({"hits": 3}),
            confidence: Some(0.8),
            failure: None,
            duration_ms: 120,
            attempt,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn happy_path_transitions_are_legal() {
        use InvestigationStatus::*;
        let chain = [Pending, Dispatched, AgentsRunning, Consolidating, Completed];
        for pair in chain.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} must be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn cancelled_reachable_from_any_non_terminal() {
        use InvestigationStatus::*;
        for from in [Pending, Dispatched, AgentsRunning, Consolidating] {
            assert!(from.can_transition_to(Cancelled));
        }
        for from in [Completed, Failed, Cancelled] {
            assert!(!from.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        use InvestigationStatus::*;
        for from in [Completed, Failed, Cancelled] {
            for to in [Pending, Dispatched, AgentsRunning, Consolidating, Completed, Failed] {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn skipping_a_stage_is_illegal() {
        use InvestigationStatus::*;
        assert!(!Pending.can_transition_to(AgentsRunning));
        assert!(!Dispatched.can_transition_to(Consolidating));
        assert!(!AgentsRunning.can_transition_to(Completed));
    }

    #[test]
    fn apply_rejects_result_while_pending() {
        let mut s = state();
        let err = s
            .apply(&StateMutation::RecordAgentResult {
                result: result(Domain::Network, 1),
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidMutation { .. }));
    }

    #[test]
    fn apply_accepts_result_while_running_and_enforces_supersession() {
        let mut s = state();
        s.status = InvestigationStatus::AgentsRunning;

        s.apply(&StateMutation::RecordAgentResult {
            result: result(Domain::Network, 1),
        })
        .unwrap();

        // Same attempt does not supersede.
        let err = s
            .apply(&StateMutation::RecordAgentResult {
                result: result(Domain::Network, 1),
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::StaleResult { .. }));

        // A higher attempt does.
        s.apply(&StateMutation::RecordAgentResult {
            result: result(Domain::Network, 2),
        })
        .unwrap();
        assert_eq!(s.results[&Domain::Network].attempt, 2);
    }

    #[test]
    fn apply_accepts_result_while_cancelled() {
        let mut s = state();
        s.status = InvestigationStatus::Cancelled;
        s.apply(&StateMutation::RecordAgentResult {
            result: result(Domain::Device, 1),
        })
        .unwrap();
        assert!(s.results.contains_key(&Domain::Device));
    }

    #[test]
    fn consolidated_only_recordable_while_consolidating() {
        let mut s = state();
        s.status = InvestigationStatus::AgentsRunning;
        let consolidated = ConsolidatedConfidence {
            score: 0.5,
            weights_used: BTreeMap::new(),
            fallback: false,
            fallback_level: None,
        };
        assert!(s
            .apply(&StateMutation::RecordConsolidated {
                consolidated: consolidated.clone()
            })
            .is_err());

        s.status = InvestigationStatus::Consolidating;
        s.apply(&StateMutation::RecordConsolidated { consolidated })
            .unwrap();
        assert!(s.consolidated.is_some());
    }

    #[test]
    fn failure_kind_transience() {
        assert!(FailureKind::Timeout.is_transient());
        assert!(FailureKind::RateLimited.is_transient());
        assert!(!FailureKind::Validation.is_transient());
        assert!(!FailureKind::Unknown.is_transient());
    }

    #[test]
    fn state_serde_roundtrip() {
        let mut s = state();
        s.status = InvestigationStatus::AgentsRunning;
        s.apply(&StateMutation::RecordAgentResult {
            result: result(Domain::Logs, 1),
        })
        .unwrap();

        let json = serde_json::to_string(&s).expect("serialize");
        let back: InvestigationState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(s, back);
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&InvestigationStatus::AgentsRunning).unwrap();
        assert_eq!(json, "\"AGENTS_RUNNING\"");
    }
}
