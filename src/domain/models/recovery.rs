//! Error recovery outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::response::ConsultationResponse;
use crate::domain::errors::{FailureKind, FailureSeverity};

/// Which recovery path produced (or failed to produce) a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// The per-kind handler retried the same sage.
    Retry,
    /// The sage's registered fallback answered.
    AgentFallback,
    /// Another sage with an overlapping capability answered.
    CrossAgentFallback,
    /// Nothing recovered.
    None,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::AgentFallback => "agent_fallback",
            Self::CrossAgentFallback => "cross_agent_fallback",
            Self::None => "none",
        }
    }
}

/// One step taken while recovering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub strategy: RecoveryStrategy,
    /// Sage (or fallback) that was tried.
    pub target: String,
    pub succeeded: bool,
    pub detail: String,
}

impl RecoveryAttempt {
    pub fn succeeded(strategy: RecoveryStrategy, target: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            strategy,
            target: target.into(),
            succeeded: true,
            detail: detail.into(),
        }
    }

    pub fn failed(strategy: RecoveryStrategy, target: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            strategy,
            target: target.into(),
            succeeded: false,
            detail: detail.into(),
        }
    }
}

/// Result of recovering one failed invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecoveryResult {
    pub recovered: bool,
    pub response: Option<ConsultationResponse>,
    pub strategy: RecoveryStrategy,
    pub kind: FailureKind,
    pub severity: FailureSeverity,
    /// Last diagnostic, for the audit trail.
    pub diagnostic: String,
    pub attempts: Vec<RecoveryAttempt>,
}

impl ErrorRecoveryResult {
    pub fn recovered(
        response: ConsultationResponse,
        strategy: RecoveryStrategy,
        kind: FailureKind,
        diagnostic: impl Into<String>,
        attempts: Vec<RecoveryAttempt>,
    ) -> Self {
        Self {
            recovered: true,
            response: Some(response),
            strategy,
            kind,
            severity: kind.severity(),
            diagnostic: diagnostic.into(),
            attempts,
        }
    }

    pub fn unrecovered(kind: FailureKind, diagnostic: impl Into<String>, attempts: Vec<RecoveryAttempt>) -> Self {
        Self {
            recovered: false,
            response: None,
            strategy: RecoveryStrategy::None,
            kind,
            severity: kind.severity(),
            diagnostic: diagnostic.into(),
            attempts,
        }
    }

    /// Name of the sage (or fallback) that produced the response.
    pub fn responder(&self) -> Option<&str> {
        self.response.as_ref().map(|r| r.agent_name.as_str())
    }
}

/// Append-only record of one recovery, kept for failure analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub query_id: Uuid,
    pub agent: String,
    pub kind: FailureKind,
    pub severity: FailureSeverity,
    pub error: String,
    pub recovered: bool,
    pub strategy: RecoveryStrategy,
    pub attempts: Vec<RecoveryAttempt>,
}

impl RecoveryRecord {
    pub fn from_result(query_id: Uuid, agent: &str, error: &str, result: &ErrorRecoveryResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            query_id,
            agent: agent.to_string(),
            kind: result.kind,
            severity: result.severity,
            error: error.to_string(),
            recovered: result.recovered,
            strategy: result.strategy,
            attempts: result.attempts.clone(),
        }
    }
}
