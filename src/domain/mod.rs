//! Domain layer for the sage council
//!
//! This module contains the consultation models, the failure taxonomy and
//! the sage port every agent implements.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{AgentError, ConsultationError, FailureKind, FailureSeverity, RegistryError};
