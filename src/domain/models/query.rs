//! Consultation query domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::errors::ConsultationError;

/// Metadata key marking a query as a cross-agent fallback re-issue.
pub const FALLBACK_FOR_KEY: &str = "fallback_for";

/// Kind of consultation being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Knowledge and documentation lookup.
    KnowledgeLookup,
    /// Task planning and estimation.
    TaskPlanning,
    /// Incident root-cause analysis.
    IncidentAnalysis,
    /// Information search and ranking.
    InformationSearch,
    /// Open-ended collaboration across sages.
    GeneralCollaboration,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KnowledgeLookup => "knowledge_lookup",
            Self::TaskPlanning => "task_planning",
            Self::IncidentAnalysis => "incident_analysis",
            Self::InformationSearch => "information_search",
            Self::GeneralCollaboration => "general_collaboration",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "knowledge_lookup" | "knowledge" => Some(Self::KnowledgeLookup),
            "task_planning" | "task" => Some(Self::TaskPlanning),
            "incident_analysis" | "incident" => Some(Self::IncidentAnalysis),
            "information_search" | "search" => Some(Self::InformationSearch),
            "general_collaboration" | "general" => Some(Self::GeneralCollaboration),
            _ => None,
        }
    }

    /// All kinds in declaration order.
    pub fn all() -> [Self; 5] {
        [
            Self::KnowledgeLookup,
            Self::TaskPlanning,
            Self::IncidentAnalysis,
            Self::InformationSearch,
            Self::GeneralCollaboration,
        ]
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority of a consultation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// A consultation request.
///
/// Queries are never mutated once built. When a sage needs annotated
/// context (prior results in a chain) or a fallback marker, a derived copy
/// is produced with [`ConsultationQuery::with_context`] or
/// [`ConsultationQuery::as_fallback_for`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationQuery {
    pub id: Uuid,
    pub kind: QueryKind,
    pub content: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub requester: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Consultation deadline in milliseconds; orchestrator default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ConsultationQuery {
    pub fn new(kind: QueryKind, content: impl Into<String>, requester: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            priority: Priority::default(),
            context: Map::new(),
            requester: requester.into(),
            created_at: Utc::now(),
            metadata: Map::new(),
            timeout_ms: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Derived copy carrying a replacement context map.
    pub fn with_context(&self, context: Map<String, Value>) -> Self {
        Self {
            context,
            ..self.clone()
        }
    }

    /// Derived copy marked as a cross-agent fallback for `origin`.
    pub fn as_fallback_for(&self, origin: &str) -> Self {
        let mut derived = self.clone();
        derived
            .metadata
            .insert(FALLBACK_FOR_KEY.to_string(), Value::String(origin.to_string()));
        derived
    }

    /// Whether this query is already a fallback re-issue.
    pub fn is_fallback(&self) -> bool {
        self.metadata.contains_key(FALLBACK_FOR_KEY)
    }

    /// Context value as a list of strings (missing or malformed → empty).
    pub fn context_str_list(&self, key: &str) -> Vec<String> {
        match self.context.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    /// Reject malformed queries before any sage is contacted.
    pub fn validate(&self, max_content_length: usize) -> Result<(), ConsultationError> {
        if self.id.is_nil() {
            return Err(ConsultationError::Validation(
                "query id cannot be nil".to_string(),
            ));
        }
        if self.content.trim().is_empty() {
            return Err(ConsultationError::Validation(
                "content cannot be empty".to_string(),
            ));
        }
        if self.content.len() > max_content_length {
            return Err(ConsultationError::Validation(format!(
                "content length {} exceeds maximum {}",
                self.content.len(),
                max_content_length
            )));
        }
        if self.requester.trim().is_empty() {
            return Err(ConsultationError::Validation(
                "requester cannot be empty".to_string(),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(ConsultationError::Validation(
                "timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
