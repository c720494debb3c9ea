//! Keyword-heuristic sages.
//!
//! These are deliberately simple: each sage scores a query by how many of
//! its domain keywords appear in the content and answers with canned
//! guidance for that domain. They exist so the orchestrator can be driven
//! end-to-end from the command line without any external service.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::domain::errors::AgentError;
use crate::domain::models::{
    AgentStatus, ConsultationQuery, ConsultationResponse, HealthReport, PerformanceMetrics,
    QueryKind, PREVIOUS_RESULTS_KEY,
};
use crate::domain::ports::Sage;

/// Static description of one keyword sage.
#[derive(Debug, Clone)]
pub struct KeywordProfile {
    pub name: &'static str,
    pub capabilities: &'static [QueryKind],
    pub keywords: &'static [&'static str],
    pub sources: &'static [&'static str],
    pub suggestions: &'static [&'static str],
    pub next_actions: &'static [&'static str],
}

const KNOWLEDGE: KeywordProfile = KeywordProfile {
    name: "knowledge",
    capabilities: &[QueryKind::KnowledgeLookup, QueryKind::InformationSearch],
    keywords: &["how", "what", "why", "explain", "docs", "documentation", "guide", "api"],
    sources: &["handbook/architecture.md", "handbook/runbooks.md"],
    suggestions: &["Link the relevant handbook section in the answer"],
    next_actions: &["Review the referenced documentation"],
};

const TASK: KeywordProfile = KeywordProfile {
    name: "task",
    capabilities: &[QueryKind::TaskPlanning, QueryKind::IncidentAnalysis],
    keywords: &["plan", "estimate", "schedule", "deadline", "milestone", "task", "sprint"],
    sources: &["planning/backlog"],
    suggestions: &["Split the work into independently shippable tasks"],
    next_actions: &["Create tasks for each milestone"],
};

const INCIDENT: KeywordProfile = KeywordProfile {
    name: "incident",
    capabilities: &[QueryKind::IncidentAnalysis, QueryKind::TaskPlanning],
    keywords: &["incident", "outage", "error", "latency", "down", "crash", "alert", "rollback"],
    sources: &["monitoring/alerts", "postmortems/index"],
    suggestions: &["Check recent deploys against the incident start time"],
    next_actions: &["Open an incident channel", "Capture a timeline"],
};

const SEARCH: KeywordProfile = KeywordProfile {
    name: "search",
    capabilities: &[QueryKind::InformationSearch, QueryKind::KnowledgeLookup],
    keywords: &["search", "find", "where", "locate", "list", "lookup"],
    sources: &["index/global"],
    suggestions: &["Narrow the search with a team or service filter"],
    next_actions: &["Refine the query with exact identifiers"],
};

/// Profiles of the built-in sages.
pub const BUILTIN_PROFILES: [KeywordProfile; 4] = [KNOWLEDGE, TASK, INCIDENT, SEARCH];

/// Confidence reported when no keyword matched.
const BASELINE_CONFIDENCE: f64 = 0.3;
/// Confidence reported for empty input.
const EMPTY_INPUT_CONFIDENCE: f64 = 0.05;
/// Matches needed for full confidence.
const SATURATION_MATCHES: usize = 3;

/// A sage answering from a keyword profile.
pub struct KeywordSage {
    profile: KeywordProfile,
    metrics: Arc<RwLock<PerformanceMetrics>>,
}

impl KeywordSage {
    pub fn new(profile: KeywordProfile) -> Self {
        Self {
            profile,
            metrics: Arc::new(RwLock::new(PerformanceMetrics::default())),
        }
    }

    fn matched_keywords(&self, content: &str) -> Vec<&'static str> {
        let lowered = content.to_lowercase();
        let words: BTreeSet<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        self.profile
            .keywords
            .iter()
            .copied()
            .filter(|k| words.contains(k))
            .collect()
    }

    fn confidence_for(matches: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let ratio = matches.min(SATURATION_MATCHES) as f64 / SATURATION_MATCHES as f64;
        (1.0 - BASELINE_CONFIDENCE).mul_add(ratio, BASELINE_CONFIDENCE)
    }
}

/// Every built-in keyword sage.
pub fn builtin_sages() -> Vec<Arc<KeywordSage>> {
    BUILTIN_PROFILES
        .iter()
        .cloned()
        .map(|p| Arc::new(KeywordSage::new(p)))
        .collect()
}

#[async_trait]
impl Sage for KeywordSage {
    fn name(&self) -> &str {
        self.profile.name
    }

    async fn process_consultation(
        &self,
        query: &ConsultationQuery,
    ) -> Result<ConsultationResponse, AgentError> {
        let started = Instant::now();

        if query.content.trim().is_empty() {
            let response = ConsultationResponse::builder(query.id, self.profile.name)
                .content(json!({ "summary": "No content to analyse." }))
                .confidence(EMPTY_INPUT_CONFIDENCE)
                .suggestion("Provide a description of what you need")
                .build();
            self.metrics.write().await.record(true, 0, None);
            return Ok(response);
        }

        let matched = self.matched_keywords(&query.content);
        let prior = query
            .context
            .get(PREVIOUS_RESULTS_KEY)
            .and_then(Value::as_array)
            .map_or(0, Vec::len);

        let summary = if matched.is_empty() {
            format!("The {} sage found nothing specific to add.", self.profile.name)
        } else {
            format!(
                "The {} sage matched {} and recommends the guidance below.",
                self.profile.name,
                matched.join(", ")
            )
        };

        let mut builder = ConsultationResponse::builder(query.id, self.profile.name)
            .content(json!({
                "summary": summary,
                "matched_keywords": matched,
                "prior_results_seen": prior,
            }))
            .confidence(Self::confidence_for(matched.len()));

        if !matched.is_empty() {
            builder = builder.sources(self.profile.sources.iter().copied());
            for suggestion in self.profile.suggestions {
                builder = builder.suggestion(*suggestion);
            }
            for action in self.profile.next_actions {
                builder = builder.next_action(*action);
            }
        }

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.metrics.write().await.record(true, elapsed, None);
        Ok(builder.processing_time_ms(elapsed).build())
    }

    async fn health_check(&self) -> HealthReport {
        HealthReport {
            status: AgentStatus::Idle,
            metrics: self.metrics.read().await.clone(),
        }
    }

    fn capabilities(&self) -> BTreeSet<QueryKind> {
        self.profile.capabilities.iter().copied().collect()
    }
}
