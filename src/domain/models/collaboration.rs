//! Collaboration patterns and the consultation lifecycle.

use serde::{Deserialize, Serialize};

use super::query::Priority;

/// Strategy used to combine several sages' answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationPattern {
    /// Strict order, each sage sees the earlier results.
    Sequential,
    /// Concurrent dispatch under one shared deadline.
    Parallel,
    /// A supervisor designates the downstream sages.
    Hierarchical,
    /// Resolved at runtime from priority and healthy sage count.
    Adaptive,
}

impl CollaborationPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Hierarchical => "hierarchical",
            Self::Adaptive => "adaptive",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            "hierarchical" => Some(Self::Hierarchical),
            "adaptive" => Some(Self::Adaptive),
            _ => None,
        }
    }

    /// Resolve `Adaptive` into a concrete pattern; other patterns are returned unchanged.
    ///
    /// Critical and high priority prefer parallel for lowest latency across
    /// several opinions; low priority is treated as exploratory and runs
    /// sequentially so context accumulates. Medium goes parallel only when
    /// at least three healthy sages are available.
    pub fn resolve(self, priority: Priority, healthy_agents: usize) -> Self {
        match self {
            Self::Adaptive => match priority {
                Priority::Critical | Priority::High => Self::Parallel,
                Priority::Low => Self::Sequential,
                Priority::Medium if healthy_agents >= 3 => Self::Parallel,
                Priority::Medium => Self::Sequential,
            },
            concrete => concrete,
        }
    }
}

impl std::fmt::Display for CollaborationPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationPhase {
    Received,
    RequirementAnalyzed,
    Dispatched,
    Synthesizing,
    Completed,
    Degraded,
}

impl ConsultationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Degraded)
    }

    /// Check whether a transition is allowed.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::RequirementAnalyzed)
                | (Self::RequirementAnalyzed, Self::Dispatched)
                | (Self::Dispatched, Self::Synthesizing)
                | (Self::Synthesizing, Self::Completed | Self::Degraded)
        )
    }
}
