//! Agent pool and the context-enhancer extension point.

use std::collections::BTreeMap;
use std::sync::Arc;

use ice_state::Domain;

use super::agent::{AgentContext, DomainAgent};

/// Registry of one agent per investigative dimension.
///
/// The orchestrator resolves agents exclusively through this pool and the
/// [`DomainAgent`] trait; it never sees a concrete implementation.
#[derive(Default)]
pub struct AgentPool {
    agents: BTreeMap<Domain, Arc<dyn DomainAgent>>,
}

impl AgentPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its own domain, replacing any previous one.
    pub fn with_agent(mut self, agent: Arc<dyn DomainAgent>) -> Self {
        self.agents.insert(agent.domain(), agent);
        self
    }

    pub fn register(&mut self, agent: Arc<dyn DomainAgent>) {
        self.agents.insert(agent.domain(), agent);
    }

    pub fn get(&self, domain: Domain) -> Option<Arc<dyn DomainAgent>> {
        self.agents.get(&domain).cloned()
    }

    pub fn contains(&self, domain: Domain) -> bool {
        self.agents.contains_key(&domain)
    }

    /// Domains with a registered agent, in deterministic order.
    pub fn domains(&self) -> Vec<Domain> {
        self.agents.keys().copied().collect()
    }
}

/// Attaches supplementary guidance metadata to a node's input before
/// dispatch, without altering the node's interface contract.
///
/// This is the hook an external hybrid-intelligence layer uses to tune
/// agent behavior; the orchestrator stays ignorant of agent internals.
pub trait ContextEnhancer: Send + Sync {
    fn enhance(&self, domain: Domain, ctx: &mut AgentContext);
}
