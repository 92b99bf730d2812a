//! Structured observability hooks for the investigation lifecycle.
//!
//! Provides an investigation-scoped tracing span (`InvestigationSpan` RAII
//! guard) plus emission functions for the key lifecycle events. Events are
//! emitted at `info!` level; verbosity is controlled through `RUST_LOG`.

use tracing::info;

/// RAII guard that enters an investigation-scoped tracing span.
///
/// While held, all tracing calls carry the investigation id.
pub struct InvestigationSpan {
    _span: tracing::span::EnteredSpan,
}

impl InvestigationSpan {
    pub fn enter(investigation_id: &str) -> Self {
        let span = tracing::info_span!("ice.investigation", investigation_id = %investigation_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: investigation started for an entity.
pub fn emit_investigation_started(investigation_id: &str, entity_id: &str) {
    info!(
        event = "investigation.started",
        investigation_id = %investigation_id,
        entity_id = %entity_id,
    );
}

/// Emit event: investigation reached a terminal status.
pub fn emit_investigation_finished(
    investigation_id: &str,
    status: &str,
    degraded: bool,
    duration_ms: u64,
) {
    info!(
        event = "investigation.finished",
        investigation_id = %investigation_id,
        status = %status,
        degraded = degraded,
        duration_ms = duration_ms,
    );
}

/// Emit event: one domain node resolved.
pub fn emit_node_finished(
    investigation_id: &str,
    domain: &str,
    status: &str,
    attempts: u32,
    duration_ms: u64,
) {
    info!(
        event = "node.finished",
        investigation_id = %investigation_id,
        domain = %domain,
        status = %status,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

/// Emit event: confidence consolidation completed.
pub fn emit_consolidated(investigation_id: &str, score: f64, fallback: bool) {
    info!(
        event = "consolidation.finished",
        investigation_id = %investigation_id,
        score = score,
        fallback = fallback,
    );
}

/// Emit event: lifecycle status transition.
pub fn emit_state_transition(investigation_id: &str, from: &str, to: &str) {
    info!(
        event = "state.transition",
        investigation_id = %investigation_id,
        from = %from,
        to = %to,
    );
}

/// Emit event: cancellation requested (warning level).
pub fn emit_cancel_requested(investigation_id: &str) {
    tracing::warn!(event = "investigation.cancel_requested", investigation_id = %investigation_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn investigation_span_enters_without_panic() {
        let _span = InvestigationSpan::enter("test-investigation-id");
    }
}
