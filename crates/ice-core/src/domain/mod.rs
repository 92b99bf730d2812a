//! Domain agent capability layer: the contract every investigative
//! dimension implements, plus the pool the orchestrator dispatches from.

mod agent;
mod pool;

pub use agent::{
    AgentContext, AgentError, AgentOutcome, CancelSource, CancelToken, DomainAgent, ProgressSink,
};
pub use pool::{AgentPool, ContextEnhancer};
