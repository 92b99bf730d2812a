//! The engine facade: the four-call contract the surrounding layers use.
//!
//! `start_investigation` / `get_investigation_state` /
//! `cancel_investigation` / `subscribe_to_events` are the entire surface
//! the web/CRUD layer needs. The engine wires the store, hub, agent pool,
//! and feature cache together at start-up and owns the per-investigation
//! cancel registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::error;

use ice_state::{
    Domain, EntityRef, InvestigationId, InvestigationState, InvestigationStatus,
    InvestigationStore, StateMutation, TimeWindow,
};

use crate::cache::FeatureCache;
use crate::config::EngineConfig;
use crate::domain::{AgentPool, CancelSource, ContextEnhancer};
use crate::error::{IceError, Result};
use crate::hub::{AgentHub, EventHandler, EventKindTag, IceEvent, IceEventKind, SubscriptionHandle};
use crate::obs;
use crate::orchestrator::{update_with_retry, Orchestrator};

/// One investigation request.
#[derive(Debug, Clone)]
pub struct InvestigationRequest {
    pub entity: EntityRef,
    pub window: TimeWindow,
    /// Caller metadata carried through to the stored state untouched.
    pub tags: serde_json::Value,
}

impl InvestigationRequest {
    pub fn new(entity: EntityRef, window: TimeWindow) -> Self {
        Self {
            entity,
            window,
            tags: serde_json::Value::Null,
        }
    }

    pub fn with_tags(mut self, tags: serde_json::Value) -> Self {
        self.tags = tags;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.entity.entity_id.trim().is_empty() {
            return Err(IceError::InvalidConfig(
                "entity_id must not be empty".into(),
            ));
        }
        if self.window.from > self.window.to {
            return Err(IceError::InvalidConfig(
                "time window must not end before it starts".into(),
            ));
        }
        Ok(())
    }
}

/// Investigation engine: store + hub + agent pool + feature cache under one
/// validated configuration.
pub struct InvestigationEngine {
    store: Arc<dyn InvestigationStore>,
    hub: Arc<AgentHub>,
    pool: Arc<AgentPool>,
    cache: Arc<FeatureCache>,
    enhancer: Option<Arc<dyn ContextEnhancer>>,
    config: EngineConfig,
    cancels: Arc<Mutex<HashMap<String, Arc<CancelSource>>>>,
}

impl std::fmt::Debug for InvestigationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvestigationEngine")
            .field("config", &self.config)
            .field("has_enhancer", &self.enhancer.is_some())
            .finish_non_exhaustive()
    }
}

impl InvestigationEngine {
    /// Build an engine. Fails fast on invalid configuration or a pool
    /// missing any independent domain (the risk agent is optional).
    pub fn new(
        store: Arc<dyn InvestigationStore>,
        pool: Arc<AgentPool>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        for domain in Domain::INDEPENDENT {
            if !pool.contains(domain) {
                return Err(IceError::MissingAgent(domain));
            }
        }
        Ok(Self {
            store,
            hub: Arc::new(AgentHub::new(config.hub.clone())),
            pool,
            cache: Arc::new(FeatureCache::new(Duration::from_millis(config.cache_ttl_ms))),
            enhancer: None,
            config,
            cancels: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Install the hybrid-intelligence context enhancer.
    pub fn with_enhancer(mut self, enhancer: Arc<dyn ContextEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// The process-scoped feature cache, for injection into agent
    /// implementations that share derived features.
    pub fn feature_cache(&self) -> Arc<FeatureCache> {
        Arc::clone(&self.cache)
    }

    pub fn hub(&self) -> Arc<AgentHub> {
        Arc::clone(&self.hub)
    }

    fn make_orchestrator(&self) -> Orchestrator {
        let orchestrator = Orchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.hub),
            Arc::clone(&self.pool),
            self.config.clone(),
        );
        match &self.enhancer {
            Some(enhancer) => orchestrator.with_enhancer(Arc::clone(enhancer)),
            None => orchestrator,
        }
    }

    fn register_cancel(&self, id: &InvestigationId) -> Arc<CancelSource> {
        let cancel = Arc::new(CancelSource::new());
        self.cancels
            .lock()
            .unwrap()
            .insert(id.0.clone(), Arc::clone(&cancel));
        cancel
    }

    /// Start an investigation and return its id; the orchestration runs as
    /// a background task. Per-node failures never propagate here.
    pub async fn start_investigation(
        &self,
        request: InvestigationRequest,
    ) -> Result<InvestigationId> {
        request.validate()?;
        let state = self
            .store
            .create(request.entity, request.window, request.tags)
            .await?;
        let id = state.investigation_id.clone();
        let cancel = self.register_cancel(&id);

        let orchestrator = self.make_orchestrator();
        let store = Arc::clone(&self.store);
        let cancels = Arc::clone(&self.cancels);
        let cas = self.config.cas.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            let outcome = orchestrator.run(&task_id, cancel).await;
            cancels.lock().unwrap().remove(&task_id.0);
            if let Err(err) = outcome {
                error!(investigation_id = %task_id, error = %err, "investigation run failed");
                mark_failed(&store, &task_id, &cas).await;
            }
        });

        Ok(id)
    }

    /// Run an investigation to its terminal state and return it. Same
    /// pipeline as [`Self::start_investigation`], awaited in place.
    pub async fn run_investigation(
        &self,
        request: InvestigationRequest,
    ) -> Result<InvestigationState> {
        request.validate()?;
        let state = self
            .store
            .create(request.entity, request.window, request.tags)
            .await?;
        let id = state.investigation_id.clone();
        let cancel = self.register_cancel(&id);

        let outcome = self.make_orchestrator().run(&id, cancel).await;
        self.cancels.lock().unwrap().remove(&id.0);
        match outcome {
            Ok(state) => Ok(state),
            Err(err) => {
                error!(investigation_id = %id, error = %err, "investigation run failed");
                mark_failed(&self.store, &id, &self.config.cas).await;
                Err(err)
            }
        }
    }

    pub async fn get_investigation_state(
        &self,
        id: &InvestigationId,
    ) -> Result<InvestigationState> {
        Ok(self.store.get(id).await?)
    }

    /// Cancel an investigation: the store transitions to CANCELLED and the
    /// cancel signal is broadcast to any running node tasks. Idempotent on
    /// terminal investigations.
    pub async fn cancel_investigation(&self, id: &InvestigationId) -> Result<InvestigationState> {
        obs::emit_cancel_requested(&id.0);
        let prior = self.store.get(id).await?;
        let state = self.store.cancel(id).await?;

        if let Some(cancel) = self.cancels.lock().unwrap().get(&id.0).cloned() {
            cancel.cancel();
        }

        if !prior.status.is_terminal() {
            self.hub.publish(&IceEvent::new(
                id.clone(),
                None,
                IceEventKind::StateTransition {
                    from: prior.status,
                    to: InvestigationStatus::Cancelled,
                },
                serde_json::json!({}),
            ));
        }
        Ok(state)
    }

    /// Subscribe a handler to one investigation's events.
    ///
    /// `kinds = None` receives every event type.
    pub fn subscribe_to_events(
        &self,
        id: &InvestigationId,
        kinds: Option<BTreeSet<EventKindTag>>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionHandle {
        self.hub.subscribe(id, kinds, handler)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.hub.unsubscribe(handle);
    }
}

/// Best-effort transition to FAILED after an infrastructure error.
async fn mark_failed(
    store: &Arc<dyn InvestigationStore>,
    id: &InvestigationId,
    cas: &crate::config::CasRetryConfig,
) {
    match store.get(id).await {
        Ok(current) if !current.status.is_terminal() => {
            if let Err(err) = update_with_retry(
                store,
                id,
                StateMutation::Transition {
                    to: InvestigationStatus::Failed,
                },
                cas,
            )
            .await
            {
                error!(investigation_id = %id, error = %err, "failed to mark investigation FAILED");
            }
        }
        Ok(_) => {}
        Err(err) => {
            error!(investigation_id = %id, error = %err, "could not read state while failing investigation");
        }
    }
}
