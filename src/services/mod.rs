//! Services coordinating sages: circuit breaking, health tracking,
//! recovery, collaboration and the orchestrator itself.

pub mod circuit_breaker;
pub mod collaboration;
pub mod error_recovery;
pub mod health_store;
pub mod orchestrator;
pub mod recovery_journal;
pub mod sage_registry;
pub mod synthesis;

pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerService, CircuitCheckResult, CircuitState, CircuitStats,
};
pub use collaboration::{
    AgentOutcome, CollaborationExecutor, ExecutionPlan, ExecutionReport, OutcomeStatus,
};
pub use error_recovery::{ErrorRecoveryManager, FallbackHandler, FallbackStrategy};
pub use health_store::{HealthSnapshot, HealthStateStore};
pub use orchestrator::{ConsultationOrchestrator, Requirements, SystemHealth};
pub use recovery_journal::{JournalFilter, JournalSummary, RecoveryJournal};
pub use sage_registry::SageRegistry;
pub use synthesis::{synthesize, Synthesis};
