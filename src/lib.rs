//! Sage Council - consultation orchestrator
//!
//! Routes consultation queries to a registry of specialized sages, runs them
//! under a collaboration pattern, and merges their answers. Per-sage circuit
//! breakers, a TTL-bounded health store and a recovery manager keep one
//! misbehaving sage from taking down a consultation.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, failure taxonomy and the [`Sage`] port
//! - **Service Layer** (`services`): circuit breaking, health, recovery,
//!   collaboration and the orchestrator
//! - **Adapters** (`adapters`): built-in keyword sages and a scripted mock
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sage_council::{adapters::sages::builtin_sages, Config, ConsultationOrchestrator,
//!     ConsultationQuery, QueryKind, Sage, SageRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = SageRegistry::from_sages(
//!         builtin_sages().into_iter().map(|s| s as Arc<dyn Sage>),
//!     )?;
//!     let council = ConsultationOrchestrator::new(&Config::default(), registry);
//!     let query = ConsultationQuery::new(QueryKind::IncidentAnalysis, "checkout is down", "me");
//!     let answer = council.consult(query).await?;
//!     println!("{:.2}", answer.confidence);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{AgentError, ConsultationError, FailureKind, RegistryError};
pub use domain::models::{
    AgentStatus, CollaborationPattern, CollaborativeResponse, Config, ConsultationQuery,
    ConsultationResponse, Priority, QueryKind, ResponseQuality,
};
pub use domain::ports::Sage;
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ConsultationOrchestrator, SageRegistry};
