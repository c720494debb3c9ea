//! Responses produced by sages and by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::collaboration::{CollaborationPattern, ConsultationPhase};
use super::recovery::RecoveryStrategy;
use crate::domain::errors::FailureKind;

/// A single sage's answer to a consultation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationResponse {
    pub query_id: Uuid,
    pub agent_name: String,
    pub content: Value,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub next_actions: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ConsultationResponse {
    pub fn builder(query_id: Uuid, agent_name: impl Into<String>) -> ConsultationResponseBuilder {
        ConsultationResponseBuilder::new(query_id, agent_name)
    }

    /// Names listed under the `delegate_to` metadata key.
    pub fn delegates(&self) -> Vec<String> {
        match self.metadata.get("delegate_to") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Copy re-targeted at another query (used for cached fallbacks).
    pub fn retarget(&self, query_id: Uuid, confidence_factor: f64) -> Self {
        let mut copy = self.clone();
        copy.query_id = query_id;
        copy.confidence = (self.confidence * confidence_factor).clamp(0.0, 1.0);
        copy.processing_time_ms = 0;
        copy
    }
}

/// Consuming builder for [`ConsultationResponse`].
#[derive(Debug, Clone)]
pub struct ConsultationResponseBuilder {
    response: ConsultationResponse,
}

impl ConsultationResponseBuilder {
    fn new(query_id: Uuid, agent_name: impl Into<String>) -> Self {
        Self {
            response: ConsultationResponse {
                query_id,
                agent_name: agent_name.into(),
                content: Value::Null,
                confidence: 0.0,
                processing_time_ms: 0,
                sources: Vec::new(),
                suggestions: Vec::new(),
                next_actions: Vec::new(),
                metadata: Map::new(),
            },
        }
    }

    pub fn content(mut self, content: Value) -> Self {
        self.response.content = content;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.response.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    pub fn processing_time_ms(mut self, ms: u64) -> Self {
        self.response.processing_time_ms = ms;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.response.sources.push(source.into());
        self
    }

    pub fn sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.response.sources.extend(sources.into_iter().map(Into::into));
        self
    }

    pub fn suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.response.suggestions.push(suggestion.into());
        self
    }

    pub fn next_action(mut self, action: impl Into<String>) -> Self {
        self.response.next_actions.push(action.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.response.metadata.insert(key.into(), value);
        self
    }

    /// Set the `delegate_to` list read by the hierarchical pattern.
    pub fn delegate_to<I, S>(self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<Value> = agents
            .into_iter()
            .map(|a| Value::String(a.into()))
            .collect();
        self.metadata("delegate_to", Value::Array(names))
    }

    pub fn build(self) -> ConsultationResponse {
        self.response
    }
}

/// Overall quality of a collaborative response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseQuality {
    /// Every selected sage contributed.
    Complete,
    /// At least one selected sage could not contribute.
    Degraded,
}

/// Why a sage was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CircuitOpen,
    Maintenance,
    UnknownHealth,
    DeadlineExceeded,
    Cancelled,
    NotDesignated,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::Maintenance => "maintenance",
            Self::UnknownHealth => "unknown_health",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::NotDesignated => "not_designated",
        }
    }

    /// Whether the skip happened before dispatch (not counted as attempted).
    pub fn is_pre_dispatch(&self) -> bool {
        matches!(self, Self::CircuitOpen | Self::Maintenance | Self::UnknownHealth)
    }
}

/// What happened to one selected sage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum AuditDisposition {
    Contributed,
    Recovered {
        strategy: RecoveryStrategy,
        responder: String,
    },
    Skipped {
        reason: SkipReason,
    },
    TimedOut,
    Failed {
        kind: FailureKind,
        diagnostic: String,
    },
}

impl AuditDisposition {
    pub fn contributed(&self) -> bool {
        matches!(self, Self::Contributed | Self::Recovered { .. })
    }

    /// Short label such as `skipped: circuit_open`.
    pub fn label(&self) -> String {
        match self {
            Self::Contributed => "contributed".to_string(),
            Self::Recovered { strategy, responder } => {
                format!("recovered: {} via {}", strategy.as_str(), responder)
            }
            Self::Skipped { reason } => format!("skipped: {}", reason.as_str()),
            Self::TimedOut => "timed_out".to_string(),
            Self::Failed { kind, .. } => format!("failed: {}", kind.as_str()),
        }
    }
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub agent: String,
    #[serde(flatten)]
    pub disposition: AuditDisposition,
}

/// Which sages were consulted, skipped, or failed over, plus the phases
/// the consultation went through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub entries: Vec<AuditEntry>,
    pub phases: Vec<ConsultationPhase>,
}

impl AuditTrail {
    pub fn entry(&self, agent: &str) -> Option<&AuditEntry> {
        self.entries.iter().find(|e| e.agent == agent)
    }

    pub fn contributors(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.disposition.contributed())
            .map(|e| e.agent.as_str())
            .collect()
    }

    pub fn skipped(&self) -> Vec<(&str, SkipReason)> {
        self.entries
            .iter()
            .filter_map(|e| match e.disposition {
                AuditDisposition::Skipped { reason } => Some((e.agent.as_str(), reason)),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| {
                matches!(
                    e.disposition,
                    AuditDisposition::Failed { .. } | AuditDisposition::TimedOut
                )
            })
            .collect()
    }
}

/// The orchestrator's answer to a consultation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborativeResponse {
    pub query_id: Uuid,
    pub pattern: CollaborationPattern,
    pub quality: ResponseQuality,
    pub phase: ConsultationPhase,
    pub confidence: f64,
    /// Contributing responses ordered by agent name.
    pub responses: Vec<ConsultationResponse>,
    pub sources: Vec<String>,
    pub suggestions: Vec<String>,
    pub next_actions: Vec<String>,
    pub audit: AuditTrail,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CollaborativeResponse {
    pub fn is_degraded(&self) -> bool {
        self.quality == ResponseQuality::Degraded
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.responses.iter().map(|r| r.agent_name.as_str()).collect()
    }
}
