//! The domain agent capability interface.
//!
//! The orchestrator depends only on [`DomainAgent`], never on concrete
//! implementations; data retrieval lives behind this boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::watch;

use ice_state::{Domain, EntityRef, FailureKind, InvestigationId, TimeWindow};

use crate::hub::{AgentHub, IceEvent, IceEventKind};

/// Read-only input handed to a domain agent for one attempt.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub investigation_id: InvestigationId,
    pub entity: EntityRef,
    pub window: TimeWindow,
    /// Findings already resolved by other domains; populated for the risk
    /// node with all five independent findings.
    pub prior_findings: BTreeMap<Domain, serde_json::Value>,
    /// Supplementary guidance attached by a context enhancer; empty unless
    /// an enhancer is installed.
    pub guidance: BTreeMap<String, serde_json::Value>,
}

impl AgentContext {
    pub fn new(investigation_id: InvestigationId, entity: EntityRef, window: TimeWindow) -> Self {
        Self {
            investigation_id,
            entity,
            window,
            prior_findings: BTreeMap::new(),
            guidance: BTreeMap::new(),
        }
    }
}

/// Broadcast side of the investigation-level cancel signal.
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Signal every outstanding token. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation signal.
///
/// Agents must check this between internal steps and return
/// [`AgentError::Cancelled`] promptly once set.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when the signal fires (or immediately if it already has).
    pub async fn cancelled(&mut self) {
        // wait_for only errs when the sender is gone, which counts as done.
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Publishes AGENT_PROGRESS events for one node without exposing the hub.
pub struct ProgressSink {
    hub: std::sync::Arc<AgentHub>,
    investigation_id: InvestigationId,
    domain: Domain,
}

impl ProgressSink {
    pub fn new(
        hub: std::sync::Arc<AgentHub>,
        investigation_id: InvestigationId,
        domain: Domain,
    ) -> Self {
        Self {
            hub,
            investigation_id,
            domain,
        }
    }

    pub fn report(&self, step: &str, payload: serde_json::Value) {
        self.hub.publish(&IceEvent::new(
            self.investigation_id.clone(),
            Some(self.domain),
            IceEventKind::AgentProgress {
                domain: self.domain,
                step: step.to_string(),
            },
            payload,
        ));
    }
}

/// Why an agent attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("retrieval timed out")]
    Timeout,

    #[error("provider rate limited")]
    RateLimited,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Unknown(String),
}

impl AgentError {
    /// Classification recorded on the failed `AgentResult`.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AgentError::Timeout => FailureKind::Timeout,
            AgentError::RateLimited => FailureKind::RateLimited,
            AgentError::Validation(_) => FailureKind::Validation,
            // Cancellation is not a failure; the orchestrator records a
            // CANCELLED result instead. Kept here for exhaustiveness.
            AgentError::Cancelled => FailureKind::Unknown,
            AgentError::Unknown(_) => FailureKind::Unknown,
        }
    }
}

/// A successful (possibly partial) agent attempt.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Opaque structured findings.
    pub findings: serde_json::Value,
    /// Local confidence in [0,1]; absent when the agent cannot judge.
    pub confidence: Option<f64>,
    /// True when the agent resolved with incomplete findings.
    pub partial: bool,
}

impl AgentOutcome {
    pub fn complete(findings: serde_json::Value, confidence: f64) -> Self {
        Self {
            findings,
            confidence: Some(confidence),
            partial: false,
        }
    }

    pub fn partial(findings: serde_json::Value, confidence: Option<f64>) -> Self {
        Self {
            findings,
            confidence,
            partial: true,
        }
    }
}

/// One investigative dimension's analysis capability.
#[async_trait]
pub trait DomainAgent: Send + Sync {
    fn domain(&self) -> Domain;

    /// Analyze the entity within the context window.
    ///
    /// Implementations must observe `cancel` between internal steps and may
    /// publish progress through `progress`.
    async fn analyze(
        &self,
        ctx: &AgentContext,
        cancel: &CancelToken,
        progress: &ProgressSink,
    ) -> Result<AgentOutcome, AgentError>;
}
