//! Domain errors for the sage council.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by sages, the circuit breaker and recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ResourceExhaustion,
    DataCorruption,
    NetworkFailure,
    ModelError,
    CircuitOpen,
    Validation,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::DataCorruption => "data_corruption",
            Self::NetworkFailure => "network_failure",
            Self::ModelError => "model_error",
            Self::CircuitOpen => "circuit_open",
            Self::Validation => "validation",
        }
    }

    /// Severity used for journaling and log levels.
    pub fn severity(&self) -> FailureSeverity {
        match self {
            Self::CircuitOpen | Self::Validation => FailureSeverity::Low,
            Self::Timeout | Self::NetworkFailure => FailureSeverity::Medium,
            Self::ResourceExhaustion | Self::ModelError => FailureSeverity::High,
            Self::DataCorruption => FailureSeverity::Critical,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Error raised by a sage invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct AgentError {
    pub kind: FailureKind,
    pub message: String,
}

impl AgentError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NetworkFailure, message)
    }

    pub fn resource_exhaustion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ResourceExhaustion, message)
    }

    pub fn data_corruption(message: impl Into<String>) -> Self {
        Self::new(FailureKind::DataCorruption, message)
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ModelError, message)
    }

    /// Synthetic error produced when a circuit blocks a call.
    pub fn circuit_open(agent: &str) -> Self {
        Self::new(
            FailureKind::CircuitOpen,
            format!("circuit open for sage '{agent}'"),
        )
    }
}

/// The only error a caller of `consult` can observe.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsultationError {
    #[error("Invalid consultation query: {0}")]
    Validation(String),
}

/// Errors from building a sage registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Sage already registered: {0}")]
    DuplicateSage(String),

    #[error("Sage name cannot be empty")]
    EmptyName,

    #[error("Sage '{0}' advertises no capabilities")]
    NoCapabilities(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(FailureKind::DataCorruption.severity() > FailureKind::Timeout.severity());
        assert_eq!(FailureKind::CircuitOpen.severity(), FailureSeverity::Low);
    }

    #[test]
    fn test_agent_error_display() {
        let err = AgentError::network("connection reset");
        assert_eq!(err.to_string(), "network_failure: connection reset");
        assert_eq!(AgentError::circuit_open("knowledge").kind, FailureKind::CircuitOpen);
    }
}
