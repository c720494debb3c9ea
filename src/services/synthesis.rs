//! Merging sage outcomes into one answer.
//!
//! Everything here is pure: the same set of outcomes, in any order,
//! produces the same [`Synthesis`].

use std::collections::HashSet;

use super::collaboration::AgentOutcome;
use crate::domain::models::{AuditEntry, ConsultationResponse, ResponseQuality};

/// Merged view of a consultation's outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub quality: ResponseQuality,
    pub confidence: f64,
    /// Usable responses ordered by slot name.
    pub responses: Vec<ConsultationResponse>,
    pub sources: Vec<String>,
    pub suggestions: Vec<String>,
    pub next_actions: Vec<String>,
    /// One entry per selected sage, ordered by name.
    pub audit: Vec<AuditEntry>,
}

/// Trim, lowercase and collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop exact repeats, keeping the first occurrence.
pub fn dedup_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Drop repeats by normalized text, keeping the first spelling.
pub fn dedup_normalized<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            let key = normalize_text(item);
            !key.is_empty() && seen.insert(key)
        })
        .collect()
}

/// Mean confidence of the contributing responses scaled by the fraction of
/// dispatched sages that contributed. Sages skipped before dispatch do not
/// count as dispatched.
///
/// Confidences are summed in slot order, so the result is bit-identical
/// for any permutation of `outcomes`.
pub fn combined_confidence(outcomes: &[AgentOutcome]) -> f64 {
    let dispatched = outcomes.iter().filter(|o| !o.is_pre_dispatch_skip()).count();
    let mut slots: Vec<(&str, f64)> = outcomes
        .iter()
        .filter_map(|o| o.response().map(|r| (o.agent.as_str(), r.confidence)))
        .collect();
    slots.sort_by(|a, b| a.0.cmp(b.0).then(a.1.total_cmp(&b.1)));
    let confidences: Vec<f64> = slots.into_iter().map(|(_, confidence)| confidence).collect();
    if dispatched == 0 || confidences.is_empty() {
        return 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
    #[allow(clippy::cast_precision_loss)]
    let completion = confidences.len() as f64 / dispatched as f64;
    (mean * completion).clamp(0.0, 1.0)
}

/// Merge outcomes deterministically.
pub fn synthesize(outcomes: &[AgentOutcome]) -> Synthesis {
    let mut ordered: Vec<&AgentOutcome> = outcomes.iter().collect();
    ordered.sort_by(|a, b| a.agent.cmp(&b.agent));

    let responses: Vec<ConsultationResponse> = ordered
        .iter()
        .filter_map(|o| o.response())
        .cloned()
        .collect();

    let sources = dedup_preserving_order(responses.iter().flat_map(|r| r.sources.iter().cloned()));
    let suggestions = dedup_normalized(responses.iter().flat_map(|r| r.suggestions.iter().cloned()));
    let next_actions =
        dedup_normalized(responses.iter().flat_map(|r| r.next_actions.iter().cloned()));

    let quality = if !ordered.is_empty() && responses.len() == ordered.len() {
        ResponseQuality::Complete
    } else {
        ResponseQuality::Degraded
    };

    let audit = ordered
        .iter()
        .map(|o| AuditEntry {
            agent: o.agent.clone(),
            disposition: o.disposition(),
        })
        .collect();

    Synthesis {
        quality,
        confidence: combined_confidence(outcomes),
        responses,
        sources,
        suggestions,
        next_actions,
        audit,
    }
}
