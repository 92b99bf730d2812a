//! Engine configuration.
//!
//! One [`EngineConfig`] is built at engine start-up and validated once;
//! each section covers one pipeline stage. All sections are serializable
//! so deployments can load them from structured config.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ice_state::Domain;

use crate::error::IceError;

/// Per-node execution controls: timeout, retry, backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeControls {
    /// Maximum wall-clock time for a single attempt (milliseconds).
    pub timeout_ms: u64,
    /// Maximum number of retries for transient failures (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for NodeControls {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 2,
            backoff_base_ms: 250,
        }
    }
}

/// Orchestrator-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Concurrent node tasks; defaults to the independent-domain count and
    /// may only be configured lower.
    pub worker_pool_size: usize,
    /// Controls applied to every node.
    pub node: NodeControls,
    /// Investigation-level deadline; on expiry stragglers are cancelled and
    /// consolidation runs in degraded mode.
    pub deadline_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: Domain::INDEPENDENT.len(),
            node: NodeControls::default(),
            deadline_ms: 60_000,
        }
    }
}

/// Confidence consolidation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsolidatorConfig {
    /// Per-domain weights over the independent domains; redistributed
    /// proportionally across domains that report a valid confidence.
    pub weights: BTreeMap<Domain, f64>,
    /// Below this many valid domains the result is flagged as fallback.
    pub min_valid_domains: usize,
}

impl Default for ConsolidatorConfig {
    fn default() -> Self {
        let share = 1.0 / Domain::INDEPENDENT.len() as f64;
        Self {
            weights: Domain::INDEPENDENT.iter().map(|d| (*d, share)).collect(),
            min_valid_domains: 1,
        }
    }
}

/// Risk calculation and narrative configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskConfig {
    /// Per-domain indicator weights (all six domains participate).
    pub weights: BTreeMap<Domain, f64>,
    /// Minimum contribution magnitude for a narrative entry.
    pub significance_threshold: f64,
    /// Floor of the confidence trust multiplier; at zero confidence the raw
    /// risk score is scaled by this factor rather than erased.
    pub min_trust: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let mut weights: BTreeMap<Domain, f64> =
            Domain::INDEPENDENT.iter().map(|d| (*d, 0.15)).collect();
        weights.insert(Domain::Risk, 0.25);
        Self {
            weights,
            significance_threshold: 0.05,
            min_trust: 0.5,
        }
    }
}

/// Event hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubConfig {
    /// Bounded per-subscriber queue; on overflow the oldest undelivered
    /// event is dropped.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

/// Retry policy for compare-and-swap state updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CasRetryConfig {
    /// Bounded attempts; the conflict surfaces to the caller afterwards.
    pub max_attempts: u32,
    /// Base delay for jittered exponential backoff (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for CasRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 20,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub orchestrator: OrchestratorConfig,
    pub consolidator: ConsolidatorConfig,
    pub risk: RiskConfig,
    pub hub: HubConfig,
    pub cas: CasRetryConfig,
    /// TTL for the process-scoped feature cache (milliseconds).
    pub cache_ttl_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            consolidator: ConsolidatorConfig::default(),
            risk: RiskConfig::default(),
            hub: HubConfig::default(),
            cas: CasRetryConfig::default(),
            cache_ttl_ms: 300_000,
        }
    }
}

fn check_weights(weights: &BTreeMap<Domain, f64>, section: &str) -> Result<(), IceError> {
    if weights.is_empty() {
        return Err(IceError::InvalidConfig(format!(
            "{section}: weight map must not be empty"
        )));
    }
    let mut total = 0.0;
    for (domain, w) in weights {
        if !w.is_finite() || *w < 0.0 {
            return Err(IceError::InvalidConfig(format!(
                "{section}: weight for {domain} must be finite and non-negative, got {w}"
            )));
        }
        total += w;
    }
    if total <= 0.0 {
        return Err(IceError::InvalidConfig(format!(
            "{section}: at least one weight must be positive"
        )));
    }
    Ok(())
}

impl EngineConfig {
    /// Validate the whole configuration; called once by the engine.
    pub fn validate(&self) -> Result<(), IceError> {
        let pool = self.orchestrator.worker_pool_size;
        if pool == 0 || pool > Domain::INDEPENDENT.len() {
            return Err(IceError::InvalidConfig(format!(
                "worker_pool_size must be in 1..={}, got {pool}",
                Domain::INDEPENDENT.len()
            )));
        }
        if self.orchestrator.node.timeout_ms == 0 {
            return Err(IceError::InvalidConfig(
                "node timeout_ms must be positive".into(),
            ));
        }
        if self.orchestrator.deadline_ms == 0 {
            return Err(IceError::InvalidConfig(
                "deadline_ms must be positive".into(),
            ));
        }

        check_weights(&self.consolidator.weights, "consolidator")?;
        if self.consolidator.min_valid_domains > Domain::INDEPENDENT.len() {
            return Err(IceError::InvalidConfig(format!(
                "min_valid_domains must be at most {}",
                Domain::INDEPENDENT.len()
            )));
        }

        check_weights(&self.risk.weights, "risk")?;
        if !(0.0..=1.0).contains(&self.risk.significance_threshold) {
            return Err(IceError::InvalidConfig(
                "significance_threshold must be in [0,1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.risk.min_trust) {
            return Err(IceError::InvalidConfig(
                "min_trust must be in [0,1]".into(),
            ));
        }

        if self.hub.queue_capacity == 0 {
            return Err(IceError::InvalidConfig(
                "hub queue_capacity must be positive".into(),
            ));
        }
        if self.cas.max_attempts == 0 {
            return Err(IceError::InvalidConfig(
                "cas max_attempts must be positive".into(),
            ));
        }
        if self.cache_ttl_ms == 0 {
            return Err(IceError::InvalidConfig(
                "cache_ttl_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn default_consolidator_weights_sum_to_one() {
        let cfg = ConsolidatorConfig::default();
        let total: f64 = cfg.weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(cfg.weights.len(), 5);
    }

    #[test]
    fn zero_pool_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.orchestrator.worker_pool_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_pool_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.orchestrator.worker_pool_size = 8;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_weight_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.consolidator.weights.insert(Domain::Device, -0.1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn all_zero_weights_rejected() {
        let mut cfg = EngineConfig::default();
        for w in cfg.consolidator.weights.values_mut() {
            *w = 0.0;
        }
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
