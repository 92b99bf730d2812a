//! Final risk scoring and the deterministic narrative.
//!
//! Per-domain risk indicators are combined under configured weights with
//! the same proportional redistribution as consolidation; the consolidated
//! confidence then scales the result as a trust multiplier. The narrative
//! is a fixed-shape ranked list, not free text, so output is reproducible.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use ice_state::{AgentResult, ConsolidatedConfidence, Domain, NarrativeEntry, RiskAssessment};

use crate::config::RiskConfig;

/// Read a domain's risk indicator from its findings payload.
///
/// Indicators live under the `"risk_indicator"` key; anything non-numeric
/// or outside [0,1] drops the domain from the combination.
pub fn extract_indicator(result: &AgentResult) -> Option<f64> {
    if !result.is_resolved() {
        return None;
    }
    result
        .findings
        .get("risk_indicator")
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite() && (0.0..=1.0).contains(v))
}

/// Compute the final bounded risk score and its narrative.
pub fn assess(
    results: &BTreeMap<Domain, AgentResult>,
    consolidated: &ConsolidatedConfidence,
    config: &RiskConfig,
) -> RiskAssessment {
    let indicators: BTreeMap<Domain, f64> = results
        .values()
        .filter_map(|r| extract_indicator(r).map(|i| (r.domain, i)))
        .collect();

    if indicators.is_empty() {
        return RiskAssessment {
            score: 0.0,
            narrative: Vec::new(),
        };
    }

    let configured_total: f64 = indicators
        .keys()
        .map(|d| config.weights.get(d).copied().unwrap_or(0.0))
        .sum();

    let weights_used: BTreeMap<Domain, f64> = if configured_total > 0.0 {
        indicators
            .keys()
            .map(|d| {
                let w = config.weights.get(d).copied().unwrap_or(0.0);
                (*d, w / configured_total)
            })
            .collect()
    } else {
        let share = 1.0 / indicators.len() as f64;
        indicators.keys().map(|d| (*d, share)).collect()
    };

    let mut raw = 0.0;
    for (domain, indicator) in &indicators {
        raw += weights_used[domain] * indicator;
    }
    let raw = raw.clamp(0.0, 1.0);

    // Confidence scales trust in the signal; it never erases it. At zero
    // confidence the raw score keeps `min_trust` of its weight.
    let trust = config.min_trust + (1.0 - config.min_trust) * consolidated.score;
    let score = (raw * trust).clamp(0.0, 1.0);

    let narrative = narrative(&indicators, &weights_used, config);
    RiskAssessment { score, narrative }
}

/// Rank the significant contributions: contribution descending, domain name
/// ascending on exact ties.
fn narrative(
    indicators: &BTreeMap<Domain, f64>,
    weights_used: &BTreeMap<Domain, f64>,
    config: &RiskConfig,
) -> Vec<NarrativeEntry> {
    let mut entries: Vec<NarrativeEntry> = indicators
        .iter()
        .map(|(domain, indicator)| {
            let contribution = weights_used[domain] * indicator;
            NarrativeEntry {
                domain: *domain,
                contribution,
                summary: format!(
                    "{} signals at indicator {:.2} contributed {:.2} of the weighted risk",
                    domain, indicator, contribution
                ),
            }
        })
        .filter(|e| e.contribution >= config.significance_threshold)
        .collect();

    entries.sort_by(|a, b| {
        b.contribution
            .partial_cmp(&a.contribution)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.domain.as_str().cmp(b.domain.as_str()))
    });
    entries
}
