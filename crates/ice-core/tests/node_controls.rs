//! Per-node timeout, retry, and bulkhead isolation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ice_core::{
    AgentContext, AgentError, AgentOutcome, AgentPool, AgentStatus, CancelToken, Domain,
    DomainAgent, EngineConfig, EntityRef, FailureKind, InvestigationEngine, InvestigationRequest,
    InvestigationStatus, InvestigationStore, ProgressSink, TimeWindow,
};
use ice_state::fakes::MemoryInvestigationStore;

/// Succeeds immediately.
struct OkAgent(Domain);

#[async_trait]
impl DomainAgent for OkAgent {
    fn domain(&self) -> Domain {
        self.0
    }

    async fn analyze(
        &self,
        _ctx: &AgentContext,
        _cancel: &CancelToken,
        _progress: &ProgressSink,
    ) -> Result<AgentOutcome, AgentError> {
        Ok(AgentOutcome::complete(
            serde_json::json!({ "risk_indicator": 0.2 }),
            0.7,
        ))
    }
}

/// Rate-limited for the first `failures` attempts, then succeeds.
struct FlakyAgent {
    domain: Domain,
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl DomainAgent for FlakyAgent {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn analyze(
        &self,
        _ctx: &AgentContext,
        _cancel: &CancelToken,
        _progress: &ProgressSink,
    ) -> Result<AgentOutcome, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(AgentError::RateLimited)
        } else {
            Ok(AgentOutcome::complete(
                serde_json::json!({ "risk_indicator": 0.4 }),
                0.6,
            ))
        }
    }
}

/// Sleeps past every per-attempt timeout.
struct StallingAgent(Domain);

#[async_trait]
impl DomainAgent for StallingAgent {
    fn domain(&self) -> Domain {
        self.0
    }

    async fn analyze(
        &self,
        _ctx: &AgentContext,
        _cancel: &CancelToken,
        _progress: &ProgressSink,
    ) -> Result<AgentOutcome, AgentError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(AgentOutcome::complete(serde_json::json!({}), 0.5))
    }
}

/// Fails with an unclassified provider error every time.
struct BrokenAgent {
    domain: Domain,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl DomainAgent for BrokenAgent {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn analyze(
        &self,
        _ctx: &AgentContext,
        _cancel: &CancelToken,
        _progress: &ProgressSink,
    ) -> Result<AgentOutcome, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AgentError::Unknown("provider returned garbage".into()))
    }
}

fn request() -> InvestigationRequest {
    InvestigationRequest::new(
        EntityRef {
            entity_id: "acct-3".into(),
            entity_kind: "merchant".into(),
        },
        TimeWindow::last_days(14),
    )
}

fn fast_controls() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.orchestrator.node.timeout_ms = 100;
    config.orchestrator.node.max_retries = 2;
    config.orchestrator.node.backoff_base_ms = 10;
    config
}

fn engine(pool: AgentPool, config: EngineConfig) -> InvestigationEngine {
    let store: Arc<dyn InvestigationStore> = Arc::new(MemoryInvestigationStore::new());
    InvestigationEngine::new(store, Arc::new(pool), config).unwrap()
}

fn ok_pool_except(domain: Domain) -> AgentPool {
    let mut pool = AgentPool::new();
    for d in Domain::INDEPENDENT {
        if d != domain {
            pool.register(Arc::new(OkAgent(d)));
        }
    }
    pool
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let mut pool = ok_pool_except(Domain::Logs);
    pool.register(Arc::new(FlakyAgent {
        domain: Domain::Logs,
        failures: 2,
        calls: AtomicU32::new(0),
    }));
    let engine = engine(pool, fast_controls());

    let state = engine.run_investigation(request()).await.unwrap();

    assert_eq!(state.status, InvestigationStatus::Completed);
    let logs = &state.results[&Domain::Logs];
    assert_eq!(logs.status, AgentStatus::Success);
    // Two rate-limited attempts, success on the third.
    assert_eq!(logs.attempt, 3);
    assert!(!state.degraded, "a recovered node leaves nothing degraded");
}

#[tokio::test]
async fn transient_failure_exhausts_retries() {
    let mut pool = ok_pool_except(Domain::Logs);
    pool.register(Arc::new(FlakyAgent {
        domain: Domain::Logs,
        failures: 10,
        calls: AtomicU32::new(0),
    }));
    let engine = engine(pool, fast_controls());

    let state = engine.run_investigation(request()).await.unwrap();

    assert_eq!(state.status, InvestigationStatus::Completed);
    assert!(state.degraded);
    let logs = &state.results[&Domain::Logs];
    assert_eq!(logs.status, AgentStatus::Failed);
    assert_eq!(logs.failure, Some(FailureKind::RateLimited));
    assert_eq!(logs.attempt, 3);
}

#[tokio::test]
async fn stalled_node_times_out_without_blocking_others() {
    let mut pool = ok_pool_except(Domain::Location);
    pool.register(Arc::new(StallingAgent(Domain::Location)));
    let engine = engine(pool, fast_controls());

    let state = engine.run_investigation(request()).await.unwrap();

    assert_eq!(state.status, InvestigationStatus::Completed);
    assert!(state.degraded);

    let stalled = &state.results[&Domain::Location];
    assert_eq!(stalled.status, AgentStatus::Failed);
    assert_eq!(stalled.failure, Some(FailureKind::Timeout));
    assert_eq!(stalled.attempt, 3);

    // Bulkhead: the other four resolved normally.
    for d in Domain::INDEPENDENT {
        if d != Domain::Location {
            assert_eq!(state.results[&d].status, AgentStatus::Success);
        }
    }
}

#[tokio::test]
async fn unknown_failures_are_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut pool = ok_pool_except(Domain::Device);
    pool.register(Arc::new(BrokenAgent {
        domain: Domain::Device,
        calls: Arc::clone(&calls),
    }));
    let engine = engine(pool, fast_controls());

    let state = engine.run_investigation(request()).await.unwrap();

    let device = &state.results[&Domain::Device];
    assert_eq!(device.status, AgentStatus::Failed);
    assert_eq!(device.failure, Some(FailureKind::Unknown));
    assert_eq!(device.attempt, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry for unknown failures");
}

#[tokio::test]
async fn reduced_worker_pool_still_completes() {
    let mut config = fast_controls();
    config.orchestrator.worker_pool_size = 2;

    let mut pool = AgentPool::new();
    for d in Domain::INDEPENDENT {
        pool.register(Arc::new(OkAgent(d)));
    }
    let engine = engine(pool, config);

    let state = engine.run_investigation(request()).await.unwrap();
    assert_eq!(state.status, InvestigationStatus::Completed);
    assert_eq!(state.results.len(), 5);
    assert!(!state.degraded);
}
