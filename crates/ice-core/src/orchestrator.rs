//! The investigation graph executor.
//!
//! Five independent domain nodes dispatch concurrently against a bounded
//! worker pool; the risk node joins on all of them. Per-node controls
//! (timeout, transient-failure retry with exponential backoff) isolate
//! slow or failing nodes, and an investigation-level deadline cancels
//! stragglers and forces degraded consolidation. Node outcomes are
//! CAS-recorded in completion order; nothing here mutates state directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{instrument, warn};
use uuid::Uuid;

use ice_state::{
    AgentResult, AgentStatus, Domain, FailureKind, InvestigationId, InvestigationState,
    InvestigationStatus, InvestigationStore, StateMutation, StorageError,
};

use crate::config::{CasRetryConfig, EngineConfig, NodeControls};
use crate::consolidate::consolidate;
use crate::domain::{
    AgentContext, AgentError, AgentOutcome, AgentPool, CancelSource, CancelToken, ContextEnhancer,
    DomainAgent, ProgressSink,
};
use crate::error::{IceError, Result};
use crate::hub::{AgentHub, IceEvent, IceEventKind};
use crate::metrics::METRICS;
use crate::obs;
use crate::risk;

/// Apply a mutation under CAS with bounded, jittered retries.
///
/// Each attempt re-reads the current version; after the bound is exhausted
/// the `VersionConflict` surfaces to the caller.
pub(crate) async fn update_with_retry(
    store: &Arc<dyn InvestigationStore>,
    id: &InvestigationId,
    mutation: StateMutation,
    cas: &CasRetryConfig,
) -> Result<InvestigationState> {
    let mut attempt = 1;
    loop {
        let current = store.get(id).await?;
        match store.update(id, current.version, mutation.clone()).await {
            Ok(next) => return Ok(next),
            Err(StorageError::VersionConflict { .. }) if attempt < cas.max_attempts => {
                METRICS.inc_cas_conflicts();
                tokio::time::sleep(backoff_delay(cas.backoff_base_ms, attempt, true)).await;
                attempt += 1;
            }
            Err(StorageError::VersionConflict {
                investigation_id,
                expected,
                actual,
            }) => {
                METRICS.inc_cas_conflicts();
                return Err(IceError::Storage(StorageError::VersionConflict {
                    investigation_id,
                    expected,
                    actual,
                }));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Exponential backoff; jitter bits come from a fresh uuid since the stack
/// carries no rand dependency.
fn backoff_delay(base_ms: u64, attempt: u32, jittered: bool) -> Duration {
    let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let jitter = if jittered && base_ms > 0 {
        (Uuid::new_v4().as_u128() % base_ms as u128) as u64
    } else {
        0
    };
    Duration::from_millis(exp.saturating_add(jitter))
}

/// Executes one investigation against the static dependency graph.
pub struct Orchestrator {
    store: Arc<dyn InvestigationStore>,
    hub: Arc<AgentHub>,
    pool: Arc<AgentPool>,
    enhancer: Option<Arc<dyn ContextEnhancer>>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn InvestigationStore>,
        hub: Arc<AgentHub>,
        pool: Arc<AgentPool>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            hub,
            pool,
            enhancer: None,
            config,
        }
    }

    pub fn with_enhancer(mut self, enhancer: Arc<dyn ContextEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Drive the investigation from PENDING to a terminal state.
    ///
    /// Per-node failures are captured into their `AgentResult`s; only
    /// infrastructure errors surface here.
    #[instrument(skip(self, cancel), fields(investigation_id = %id))]
    pub async fn run(
        &self,
        id: &InvestigationId,
        cancel: Arc<CancelSource>,
    ) -> Result<InvestigationState> {
        let run_started = Instant::now();

        // Every independent node needs an agent before anything dispatches.
        for domain in Domain::INDEPENDENT {
            if !self.pool.contains(domain) {
                return Err(IceError::MissingAgent(domain));
            }
        }

        let state = self.store.get(id).await?;
        obs::emit_investigation_started(&id.0, &state.entity.entity_id);

        let state = self.transition(state, InvestigationStatus::Dispatched).await?;
        if state.status.is_terminal() {
            return Ok(state);
        }
        let state = self
            .transition(state, InvestigationStatus::AgentsRunning)
            .await?;
        if state.status.is_terminal() {
            return Ok(state);
        }

        // Fan out the independent nodes over the bounded pool.
        let sem = Arc::new(Semaphore::new(self.config.orchestrator.worker_pool_size));
        let mut handles = Vec::with_capacity(Domain::INDEPENDENT.len());
        for domain in Domain::INDEPENDENT {
            let agent = self
                .pool
                .get(domain)
                .ok_or(IceError::MissingAgent(domain))?;
            let ctx = self.build_context(&state, domain);
            handles.push(tokio::spawn(run_node(
                Arc::clone(&self.store),
                Arc::clone(&self.hub),
                agent,
                ctx,
                self.config.orchestrator.node.clone(),
                self.config.cas.clone(),
                cancel.token(),
                Arc::clone(&sem),
            )));
        }

        // Join barrier with the investigation deadline racing it. On expiry
        // the cancel signal is broadcast and the (now short) barrier is
        // awaited again: every node observes the signal at its next
        // checkpoint and its attempt is bounded by the per-node timeout.
        let deadline = Duration::from_millis(self.config.orchestrator.deadline_ms);
        let mut barrier = Box::pin(futures::future::join_all(handles));
        let mut deadline_hit = false;
        let joined = tokio::select! {
            joined = &mut barrier => joined,
            _ = tokio::time::sleep(deadline) => {
                warn!(investigation_id = %id, "deadline reached; cancelling outstanding nodes");
                cancel.cancel();
                deadline_hit = true;
                barrier.await
            }
        };
        for join_result in joined {
            if let Err(err) = join_result {
                warn!(investigation_id = %id, error = %err, "node task aborted");
            }
        }

        // Nodes recorded their results through the store; re-read.
        let state = self.store.get(id).await?;
        if state.status == InvestigationStatus::Cancelled {
            obs::emit_investigation_finished(
                &id.0,
                state.status.as_str(),
                state.degraded,
                run_started.elapsed().as_millis() as u64,
            );
            return Ok(state);
        }

        let degraded = deadline_hit
            || Domain::INDEPENDENT.iter().any(|d| {
                state
                    .results
                    .get(d)
                    .map(|r| r.status != AgentStatus::Success)
                    .unwrap_or(true)
            });

        let state = self
            .transition(state, InvestigationStatus::Consolidating)
            .await?;
        if state.status.is_terminal() {
            return Ok(state);
        }

        // The dependent risk node runs only once all five have resolved.
        if let Some(agent) = self.pool.get(Domain::Risk) {
            if !cancel.token().is_cancelled() {
                let mut ctx = self.build_context(&state, Domain::Risk);
                ctx.prior_findings = state
                    .results
                    .values()
                    .filter(|r| r.domain.is_independent() && r.is_resolved())
                    .map(|r| (r.domain, r.findings.clone()))
                    .collect();
                run_node(
                    Arc::clone(&self.store),
                    Arc::clone(&self.hub),
                    agent,
                    ctx,
                    self.config.orchestrator.node.clone(),
                    self.config.cas.clone(),
                    cancel.token(),
                    Arc::clone(&sem),
                )
                .await;
            }
        }

        let state = self.store.get(id).await?;
        if state.status == InvestigationStatus::Cancelled {
            return Ok(state);
        }

        // Scoring: consolidation cannot fail, only fall back.
        let consolidated = consolidate(&state.results, &self.config.consolidator);
        if consolidated.fallback {
            METRICS.inc_consolidation_fallbacks();
        }
        obs::emit_consolidated(&id.0, consolidated.score, consolidated.fallback);

        let state = update_with_retry(
            &self.store,
            id,
            StateMutation::RecordConsolidated {
                consolidated: consolidated.clone(),
            },
            &self.config.cas,
        )
        .await?;

        let assessment = risk::assess(&state.results, &consolidated, &self.config.risk);
        let mut state = update_with_retry(
            &self.store,
            id,
            StateMutation::RecordRisk { risk: assessment },
            &self.config.cas,
        )
        .await?;

        if degraded {
            state = update_with_retry(
                &self.store,
                id,
                StateMutation::MarkDegraded,
                &self.config.cas,
            )
            .await?;
        }

        let state = self.transition(state, InvestigationStatus::Completed).await?;
        METRICS.inc_investigations_completed();
        obs::emit_investigation_finished(
            &id.0,
            state.status.as_str(),
            state.degraded,
            run_started.elapsed().as_millis() as u64,
        );
        Ok(state)
    }

    /// Status transition with the cancel race folded in: when the store
    /// already moved to CANCELLED, the current state is returned instead of
    /// an error so callers can stop gracefully.
    async fn transition(
        &self,
        state: InvestigationState,
        to: InvestigationStatus,
    ) -> Result<InvestigationState> {
        let from = state.status;
        let id = state.investigation_id.clone();
        match update_with_retry(
            &self.store,
            &id,
            StateMutation::Transition { to },
            &self.config.cas,
        )
        .await
        {
            Ok(next) => {
                obs::emit_state_transition(&id.0, from.as_str(), to.as_str());
                self.hub.publish(&IceEvent::new(
                    id,
                    None,
                    IceEventKind::StateTransition { from, to },
                    serde_json::json!({}),
                ));
                Ok(next)
            }
            Err(IceError::Storage(StorageError::InvalidTransition { .. })) => {
                let current = self.store.get(&id).await?;
                if current.status == InvestigationStatus::Cancelled {
                    Ok(current)
                } else {
                    Err(IceError::Storage(StorageError::InvalidTransition {
                        from: current.status.to_string(),
                        to: to.to_string(),
                    }))
                }
            }
            Err(e) => Err(e),
        }
    }

    fn build_context(&self, state: &InvestigationState, domain: Domain) -> AgentContext {
        let mut ctx = AgentContext::new(
            state.investigation_id.clone(),
            state.entity.clone(),
            state.window,
        );
        if let Some(enhancer) = &self.enhancer {
            enhancer.enhance(domain, &mut ctx);
        }
        ctx
    }
}

/// Execute one node to a terminal [`AgentResult`], publishing lifecycle
/// events and CAS-recording the outcome.
///
/// Transient failures (timeout, rate-limit) retry with exponential backoff
/// up to the configured maximum; validation and unknown failures are
/// terminal immediately. The cancel signal is observed between attempts
/// and inside well-behaved agents.
#[allow(clippy::too_many_arguments)]
async fn run_node(
    store: Arc<dyn InvestigationStore>,
    hub: Arc<AgentHub>,
    agent: Arc<dyn DomainAgent>,
    ctx: AgentContext,
    controls: NodeControls,
    cas: CasRetryConfig,
    cancel: CancelToken,
    sem: Arc<Semaphore>,
) -> AgentResult {
    let _permit = sem.acquire_owned().await.ok();

    let domain = agent.domain();
    let id = ctx.investigation_id.clone();
    let started = Instant::now();

    METRICS.inc_nodes_dispatched();
    hub.publish(&IceEvent::new(
        id.clone(),
        Some(domain),
        IceEventKind::AgentStarted { domain },
        serde_json::json!({}),
    ));

    let progress = ProgressSink::new(Arc::clone(&hub), id.clone(), domain);
    let max_attempts = controls.max_retries + 1;
    let timeout = Duration::from_millis(controls.timeout_ms);

    let mut attempt: u32 = 1;
    let result = loop {
        if cancel.is_cancelled() {
            break cancelled_result(domain, attempt, &started);
        }

        match tokio::time::timeout(timeout, agent.analyze(&ctx, &cancel, &progress)).await {
            Ok(Ok(outcome)) => break resolved_result(domain, outcome, attempt, &started),
            Ok(Err(AgentError::Cancelled)) => break cancelled_result(domain, attempt, &started),
            Ok(Err(err)) => {
                let kind = err.failure_kind();
                if kind.is_transient() && attempt < max_attempts {
                    METRICS.inc_node_retries();
                    warn!(domain = %domain, attempt, failure = %kind, "transient node failure; retrying");
                    tokio::time::sleep(backoff_delay(controls.backoff_base_ms, attempt, false))
                        .await;
                    attempt += 1;
                } else {
                    break failed_result(domain, kind, attempt, &started);
                }
            }
            Err(_elapsed) => {
                METRICS.inc_node_timeouts();
                if attempt < max_attempts {
                    METRICS.inc_node_retries();
                    warn!(domain = %domain, attempt, "node attempt timed out; retrying");
                    tokio::time::sleep(backoff_delay(controls.backoff_base_ms, attempt, false))
                        .await;
                    attempt += 1;
                } else {
                    break failed_result(domain, FailureKind::Timeout, attempt, &started);
                }
            }
        }
    };

    match result.status {
        AgentStatus::Failed => {
            METRICS.inc_node_failures();
            hub.publish(&IceEvent::new(
                id.clone(),
                Some(domain),
                IceEventKind::AgentFailed {
                    domain,
                    failure: result.failure.unwrap_or(FailureKind::Unknown),
                    attempt: result.attempt,
                },
                serde_json::json!({}),
            ));
        }
        status => {
            hub.publish(&IceEvent::new(
                id.clone(),
                Some(domain),
                IceEventKind::AgentCompleted { domain, status },
                serde_json::json!({ "duration_ms": result.duration_ms }),
            ));
        }
    }
    obs::emit_node_finished(
        &id.0,
        domain.as_str(),
        match result.status {
            AgentStatus::Success => "SUCCESS",
            AgentStatus::Partial => "PARTIAL",
            AgentStatus::Failed => "FAILED",
            AgentStatus::Cancelled => "CANCELLED",
        },
        result.attempt,
        result.duration_ms,
    );

    if let Err(err) = update_with_retry(
        &store,
        &id,
        StateMutation::RecordAgentResult {
            result: result.clone(),
        },
        &cas,
    )
    .await
    {
        warn!(domain = %domain, error = %err, "failed to record agent result");
    }

    result
}

fn resolved_result(
    domain: Domain,
    outcome: AgentOutcome,
    attempt: u32,
    started: &Instant,
) -> AgentResult {
    AgentResult {
        domain,
        status: if outcome.partial {
            AgentStatus::Partial
        } else {
            AgentStatus::Success
        },
        findings: outcome.findings,
        confidence: outcome.confidence,
        failure: None,
        duration_ms: started.elapsed().as_millis() as u64,
        attempt,
        finished_at: Utc::now(),
    }
}

fn failed_result(
    domain: Domain,
    failure: FailureKind,
    attempt: u32,
    started: &Instant,
) -> AgentResult {
    AgentResult {
        domain,
        status: AgentStatus::Failed,
        findings: serde_json::Value::Null,
        confidence: None,
        failure: Some(failure),
        duration_ms: started.elapsed().as_millis() as u64,
        attempt,
        finished_at: Utc::now(),
    }
}

fn cancelled_result(domain: Domain, attempt: u32, started: &Instant) -> AgentResult {
    AgentResult {
        domain,
        status: AgentStatus::Cancelled,
        findings: serde_json::Value::Null,
        confidence: None,
        failure: None,
        duration_ms: started.elapsed().as_millis() as u64,
        attempt,
        finished_at: Utc::now(),
    }
}
