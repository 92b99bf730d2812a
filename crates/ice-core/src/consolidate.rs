//! Confidence consolidation: per-domain confidences into one
//! investigation-level score.
//!
//! Four deterministic stages — extract, validate, calculate, apply — over
//! the five independent domains. `BTreeMap` ordering fixes the evaluation
//! order of the weighted sum, so identical inputs produce bit-identical
//! output and re-running is safe.

use std::collections::BTreeMap;

use ice_state::{AgentResult, ConsolidatedConfidence, Domain, FallbackLevel};

use crate::config::ConsolidatorConfig;

/// Score reported when no domain yields a valid confidence. Sits below the
/// 0.5 neutral point so a zero-information investigation reads as low-trust.
pub const FALLBACK_CONFIDENCE: f64 = 0.25;

/// Combine the per-domain results into one [`ConsolidatedConfidence`].
///
/// Never fails: with zero valid confidences the fixed
/// [`FALLBACK_CONFIDENCE`] is returned and flagged, so the investigation
/// always reaches a scored terminal state.
pub fn consolidate(
    results: &BTreeMap<Domain, AgentResult>,
    config: &ConsolidatorConfig,
) -> ConsolidatedConfidence {
    let extracted = extract(results);
    let valid = validate(extracted);
    calculate(&valid, config)
}

/// Stage 1: pull `(domain, confidence)` pairs from the independent domains.
/// Absent, FAILED, and CANCELLED results produce no pair.
fn extract(results: &BTreeMap<Domain, AgentResult>) -> Vec<(Domain, f64)> {
    results
        .values()
        .filter(|r| r.domain.is_independent() && r.is_resolved())
        .filter_map(|r| r.confidence.map(|c| (r.domain, c)))
        .collect()
}

/// Stage 2: confidences outside [0,1] or non-finite are treated as absent.
fn validate(pairs: Vec<(Domain, f64)>) -> BTreeMap<Domain, f64> {
    pairs
        .into_iter()
        .filter(|(_, c)| c.is_finite() && (0.0..=1.0).contains(c))
        .collect()
}

/// Stages 3 and 4: redistribute weights across valid domains, compute the
/// weighted sum, and tag fallback conditions.
fn calculate(valid: &BTreeMap<Domain, f64>, config: &ConsolidatorConfig) -> ConsolidatedConfidence {
    if valid.is_empty() {
        return ConsolidatedConfidence {
            score: FALLBACK_CONFIDENCE,
            weights_used: BTreeMap::new(),
            fallback: true,
            fallback_level: Some(FallbackLevel::NoValidConfidence),
        };
    }

    let configured_total: f64 = valid
        .keys()
        .map(|d| config.weights.get(d).copied().unwrap_or(0.0))
        .sum();

    // Proportional redistribution over the valid domains; when none of them
    // carries configured weight, split evenly so the used weights still sum
    // to 1.
    let weights_used: BTreeMap<Domain, f64> = if configured_total > 0.0 {
        valid
            .keys()
            .map(|d| {
                let w = config.weights.get(d).copied().unwrap_or(0.0);
                (*d, w / configured_total)
            })
            .collect()
    } else {
        let share = 1.0 / valid.len() as f64;
        valid.keys().map(|d| (*d, share)).collect()
    };

    let mut score = 0.0;
    for (domain, confidence) in valid {
        score += weights_used[domain] * confidence;
    }
    let score = score.clamp(0.0, 1.0);

    let below_minimum = valid.len() < config.min_valid_domains;
    ConsolidatedConfidence {
        score,
        weights_used,
        fallback: below_minimum,
        fallback_level: below_minimum.then_some(FallbackLevel::BelowMinimum),
    }
}
