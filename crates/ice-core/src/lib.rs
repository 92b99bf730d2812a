//! ICE Core Library
//!
//! Orchestration core for multi-agent fraud investigations: the agent
//! communication hub, the domain agent capability layer, the concurrent
//! dispatch graph, and the confidence/risk scoring pipeline. Persistence
//! lives in the `ice-state` crate; this crate drives it exclusively
//! through the CAS-protected store API.

pub mod cache;
pub mod config;
pub mod consolidate;
pub mod domain;
pub mod engine;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod risk;
pub mod telemetry;

pub use cache::FeatureCache;
pub use config::{
    CasRetryConfig, ConsolidatorConfig, EngineConfig, HubConfig, NodeControls, OrchestratorConfig,
    RiskConfig,
};
pub use consolidate::{consolidate, FALLBACK_CONFIDENCE};
pub use domain::{
    AgentContext, AgentError, AgentOutcome, AgentPool, CancelSource, CancelToken, ContextEnhancer,
    DomainAgent, ProgressSink,
};
pub use engine::{InvestigationEngine, InvestigationRequest};
pub use error::{IceError, Result};
pub use hub::{
    AgentHub, EventHandler, EventKindTag, IceEvent, IceEventKind, SubscriptionHandle,
};
pub use orchestrator::Orchestrator;
pub use risk::{assess, extract_indicator};

pub use ice_state::{
    AgentResult, AgentStatus, AuditEntry, ConsolidatedConfidence, Domain, EntityRef, FailureKind,
    FallbackLevel, InvestigationId, InvestigationState, InvestigationStatus, InvestigationStore,
    NarrativeEntry, RiskAssessment, StateMutation, TimeWindow,
};

pub use metrics::METRICS;
pub use obs::{
    emit_cancel_requested, emit_consolidated, emit_investigation_finished,
    emit_investigation_started, emit_node_finished, emit_state_transition, InvestigationSpan,
};
pub use telemetry::init_tracing;

/// ICE version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
