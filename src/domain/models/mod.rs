pub mod collaboration;
pub mod config;
pub mod context;
pub mod health;
pub mod query;
pub mod recovery;
pub mod response;

pub use collaboration::{CollaborationPattern, ConsultationPhase};
pub use config::{
    CircuitBreakerSettings, Config, HealthConfig, LoggingConfig, OrchestratorConfig,
    RecoveryConfig,
};
pub use context::{ConsultationContext, ContextDelta, PREVIOUS_RESULTS_KEY};
pub use health::{AgentHealthRecord, AgentStatus, HealthReport, PerformanceMetrics};
pub use query::{ConsultationQuery, Priority, QueryKind, FALLBACK_FOR_KEY};
pub use recovery::{ErrorRecoveryResult, RecoveryAttempt, RecoveryRecord, RecoveryStrategy};
pub use response::{
    AuditDisposition, AuditEntry, AuditTrail, CollaborativeResponse, ConsultationResponse,
    ConsultationResponseBuilder, ResponseQuality, SkipReason,
};
