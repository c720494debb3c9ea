//! Sage port - the agent capability contract.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::errors::AgentError;
use crate::domain::models::{ConsultationQuery, ConsultationResponse, HealthReport, QueryKind};

/// Trait for consultation agents ("sages").
///
/// Implementations must not fail on malformed input: they return a
/// low-confidence response explaining the problem instead. Failures are
/// reserved for internal problems (timeouts, exhausted resources, corrupt
/// data, network or model errors).
#[async_trait]
pub trait Sage: Send + Sync {
    /// Unique sage name, used as the registry and circuit key.
    fn name(&self) -> &str;

    /// Answer a consultation.
    async fn process_consultation(
        &self,
        query: &ConsultationQuery,
    ) -> Result<ConsultationResponse, AgentError>;

    /// Report liveness without blocking on the main workload.
    async fn health_check(&self) -> HealthReport;

    /// Query kinds this sage can answer.
    fn capabilities(&self) -> BTreeSet<QueryKind>;
}
