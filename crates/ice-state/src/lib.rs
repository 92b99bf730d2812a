//! Ice-State: Investigation State Persistence for ICE
//!
//! This crate is the persistence layer for the Investigation Core Engine.
//! It owns the investigation lifecycle state machine and exposes the single
//! write path for investigation state: versioned compare-and-swap updates
//! with an append-only audit log.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: data integrity, optimistic concurrency, audit retention.
//!
//! ## Key Components
//!
//! - `InvestigationStore`: the CAS-protected store trait
//! - `MemoryInvestigationStore`: in-memory fake for tests and embedding
//! - `SurrealInvestigationStore`: SurrealDB backend
//! - `InvestigationState` / `StateMutation`: the state machine itself

mod error;
pub mod fakes;
mod investigation;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use investigation::{
    AgentResult, AgentStatus, ConsolidatedConfidence, Domain, EntityRef, FailureKind,
    FallbackLevel, InvestigationId, InvestigationState, InvestigationStatus, NarrativeEntry,
    RiskAssessment, StateMutation, TimeWindow,
};
pub use schema::{AuditEntryRow, InvestigationRow};
pub use storage_traits::{AuditEntry, InvestigationStore, StateDigest, StorageResult};
pub use surreal_store::SurrealInvestigationStore;

/// Result type for ice-state operations
pub type Result<T> = std::result::Result<T, StateError>;
